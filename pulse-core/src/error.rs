use thiserror::Error;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Type error in column '{column}' at line {line}: {message}")]
    Type {
        column: String,
        line: u64,
        message: String,
    },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PulseError {
    /// True for errors caused by the caller's input rather than the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PulseError::Parse(_) | PulseError::Type { .. } | PulseError::InvalidFilter(_)
        )
    }
}
