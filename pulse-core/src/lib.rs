pub mod config;
pub mod error;
pub mod filter;
pub mod ipc;
pub mod metrics;
pub mod models;
pub mod schema;
pub mod view;

pub use config::{DashboardConfig, PulseConfig};
pub use error::PulseError;
pub use filter::{AppliedFilters, DateRange, FilterEngine, FilterOptions, FilterParams, FilteredView};
pub use metrics::{
    BreakdownRow, FunnelStage, IntentHandover, IntentVolume, Kpis, Metric, MetricsAggregator,
    QueueSla,
};
pub use models::{ColumnSet, Dataset, SessionRecord, SessionView};
pub use schema::{ColumnSchema, Field};
pub use view::{Dashboard, DashboardView};
