use pulse_core::{Dashboard, PulseConfig};
use pulse_ingest::{DatasetCache, DatasetLoader};

/// Shared by the socket server and the HTTP API.
pub struct AppState {
    pub config: PulseConfig,
    pub cache: DatasetCache,
    pub dashboard: Dashboard,
}

impl AppState {
    pub fn new(config: PulseConfig) -> Self {
        let cache = DatasetCache::with_capacity(
            DatasetLoader::new(config.schema.clone()),
            config.data.max_cached_datasets,
        );
        let dashboard = Dashboard::from_config(&config);
        Self {
            config,
            cache,
            dashboard,
        }
    }
}
