pub mod cache;
pub mod loader;

pub use cache::{CacheStats, DatasetCache, DatasetKey, Loaded};
pub use loader::DatasetLoader;
