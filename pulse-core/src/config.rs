use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};

use crate::error::PulseError;
use crate::schema::ColumnSchema;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PulseConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub schema: ColumnSchema,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/pulse.sock".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Largest CSV body accepted by `POST /datasets`.
    pub max_upload_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8766,
            max_upload_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Knobs of the filter engine and the aggregator.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DashboardConfig {
    pub default_sla_seconds: u32,
    pub sla_min_seconds: u32,
    pub sla_max_seconds: u32,
    pub top_n: usize,
    pub min_handover_sessions: usize,
    pub detail_limit: usize,
    pub returns_intent: String,
    pub returns_stages: Vec<String>,
    pub all_sentinel: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            default_sla_seconds: 20,
            sla_min_seconds: 1,
            sla_max_seconds: 120,
            top_n: 5,
            min_handover_sessions: 60,
            detail_limit: 300,
            returns_intent: "Returns".to_string(),
            returns_stages: ["Start", "Verification", "Authorization", "Collection", "Refund"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            all_sentinel: "All".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.sla_min_seconds == 0 || self.sla_min_seconds > self.sla_max_seconds {
            return Err(config_error(format!(
                "dashboard SLA bounds {}..={} are invalid",
                self.sla_min_seconds, self.sla_max_seconds
            )));
        }
        if !(self.sla_min_seconds..=self.sla_max_seconds).contains(&self.default_sla_seconds) {
            return Err(config_error(format!(
                "dashboard.default_sla_seconds {} is outside {}..={}",
                self.default_sla_seconds, self.sla_min_seconds, self.sla_max_seconds
            )));
        }
        if self.returns_stages.is_empty() {
            return Err(config_error("dashboard.returns_stages must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// Dataset preloaded by the server at startup.
    pub default_dataset: Option<String>,
    /// Parsed datasets kept in memory; older ones are dropped past this.
    pub max_cached_datasets: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            default_dataset: None,
            max_cached_datasets: 16,
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<(), PulseError> {
        if self.max_cached_datasets == 0 {
            return Err(config_error("data.max_cached_datasets must be at least 1"));
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> PulseError {
    PulseError::Config(ConfigError::Message(msg.into()))
}

impl PulseConfig {
    pub fn load(path: &str) -> Result<Self, PulseError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        let config: PulseConfig = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PulseError> {
        self.schema.validate()?;
        self.dashboard.validate()?;
        self.data.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use std::io::Write;

    fn write_toml(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("pulse-config-{}-{}.toml", name, std::process::id()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = PulseConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dashboard.default_sla_seconds, 20);
        assert_eq!(config.dashboard.returns_stages.len(), 5);
        assert_eq!(config.http.port, 8766);
    }

    #[test]
    fn test_load_partial_file() {
        let path = write_toml(
            "partial",
            r#"
[schema]
timestamp = "ts"
queue = ""

[dashboard]
default_sla_seconds = 30
"#,
        );
        let config = PulseConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.schema.column(Field::Timestamp), Some("ts"));
        assert_eq!(config.schema.column(Field::Queue), None);
        assert_eq!(config.dashboard.default_sla_seconds, 30);
        assert_eq!(config.dashboard.top_n, 5);
        assert_eq!(config.service.socket_path, "/tmp/pulse.sock");
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_rejects_default_sla_out_of_bounds() {
        let path = write_toml(
            "badsla",
            r#"
[dashboard]
default_sla_seconds = 500
"#,
        );
        let err = PulseConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_cache_capacity_default_and_zero_rejected() {
        assert_eq!(PulseConfig::default().data.max_cached_datasets, 16);

        let path = write_toml(
            "nocache",
            r#"
[data]
max_cached_datasets = 0
"#,
        );
        let err = PulseConfig::load(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("max_cached_datasets"), "{}", err);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PulseConfig::load("/nonexistent/pulse-config.toml").unwrap_err();
        assert!(matches!(err, PulseError::Config(_)));
    }
}
