//! Render pipeline: dataset + filter parameters -> view model.
//!
//! `Dashboard::render` is the single entry point a caller invokes on every
//! parameter change. It has no hidden state; the same inputs produce the same
//! `DashboardView`.

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::{DashboardConfig, PulseConfig};
use crate::error::PulseError;
use crate::filter::{AppliedFilters, FilterEngine, FilterOptions, FilterParams};
use crate::metrics::{
    BreakdownRow, FunnelStage, IntentHandover, IntentVolume, Kpis, Metric, MetricsAggregator,
    QueueSla,
};
use crate::models::{Dataset, SessionRecord};
use crate::schema::Field;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyVolume {
    pub date: NaiveDate,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRates {
    pub date: NaiveDate,
    pub resolution_rate: Metric,
    pub handover_rate: Metric,
}

/// Everything the presentation layer needs for one render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardView {
    pub filters: AppliedFilters,
    pub kpis: Kpis,
    pub daily_volume: Vec<DailyVolume>,
    pub daily_rates: Vec<DailyRates>,
    pub by_channel: Option<Vec<BreakdownRow>>,
    pub by_segment: Option<Vec<BreakdownRow>>,
    pub sla_by_queue: Option<Vec<QueueSla>>,
    pub returns_funnel: Option<Vec<FunnelStage>>,
    pub top_intents: Option<Vec<IntentVolume>>,
    pub top_handover_intents: Option<Vec<IntentHandover>>,
    pub recent_sessions: Vec<SessionRecord>,
}

pub struct Dashboard {
    filters: FilterEngine,
    metrics: MetricsAggregator,
}

impl Dashboard {
    pub fn new(config: DashboardConfig) -> Self {
        Self {
            filters: FilterEngine::new(config.clone()),
            metrics: MetricsAggregator::new(config),
        }
    }

    pub fn from_config(config: &PulseConfig) -> Self {
        Self::new(config.dashboard.clone())
    }

    pub fn filter_engine(&self) -> &FilterEngine {
        &self.filters
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn options(&self, dataset: &Dataset) -> FilterOptions {
        self.filters.options(dataset)
    }

    pub fn render(
        &self,
        dataset: &Dataset,
        params: &FilterParams,
    ) -> Result<DashboardView, PulseError> {
        let start = Instant::now();
        let filtered = self.filters.apply(dataset, params)?;
        let view = &filtered.view;
        let m = &self.metrics;

        let trend = m.daily_trend(view, filtered.range);
        let daily_volume = trend
            .iter()
            .map(|p| DailyVolume {
                date: p.date,
                sessions: p.sessions,
            })
            .collect();
        let daily_rates = trend
            .iter()
            .map(|p| DailyRates {
                date: p.date,
                resolution_rate: p.resolution_rate,
                handover_rate: p.handover_rate,
            })
            .collect();

        let rendered = DashboardView {
            kpis: m.kpis(&filtered),
            daily_volume,
            daily_rates,
            by_channel: m.breakdown(view, Field::Channel),
            by_segment: m.breakdown(view, Field::Segment),
            sla_by_queue: m.sla_by_queue(&filtered),
            returns_funnel: m.returns_funnel(view),
            top_intents: m.top_intents_by_volume(view),
            top_handover_intents: m.top_intents_by_handover(view),
            recent_sessions: m.recent_sessions(view),
            filters: filtered.applied.clone(),
        };

        tracing::debug!(
            "Rendered dashboard: {} of {} sessions in {}µs",
            view.len(),
            dataset.len(),
            start.elapsed().as_micros()
        );

        Ok(rendered)
    }
}
