//! Filter engine
//!
//! Turns a loaded [`Dataset`] plus user-selected [`FilterParams`] into a
//! [`FilteredView`]: the matching rows, the effective date range, the SLA
//! threshold and the queue capability flag.
//!
//! - Date range is inclusive on both ends at calendar-day granularity, so the
//!   end date covers every time of day up to the start of the next day.
//!   The effective range is clipped to the days the dataset spans.
//! - A dimension set to the "All" sentinel, or not set, is a no-op.
//! - Dimensions compose with AND; the result never depends on their order.
//! - A filter on a dimension whose column is absent is skipped, not an error.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::config::DashboardConfig;
use crate::error::PulseError;
use crate::models::{Dataset, SessionView};
use crate::schema::Field;

/// Parameters chosen by the user on each render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub channel: Option<String>,
    pub segment: Option<String>,
    pub intent: Option<String>,
    pub queue: Option<String>,
    pub sla_seconds: Option<u32>,
}

/// Inclusive calendar-day range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, PulseError> {
        if start > end {
            return Err(PulseError::InvalidFilter(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        let day = ts.date();
        day >= self.start && day <= self.end
    }

    /// Every calendar day from start to end, inclusive.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

/// Echo of the filters that actually constrained the view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFilters {
    pub range: Option<DateRange>,
    pub channel: Option<String>,
    pub segment: Option<String>,
    pub intent: Option<String>,
    pub queue: Option<String>,
    pub sla_seconds: u32,
    pub has_queue: bool,
}

/// Output of [`FilterEngine::apply`].
#[derive(Debug, Clone)]
pub struct FilteredView<'a> {
    pub view: SessionView<'a>,
    pub range: Option<DateRange>,
    pub sla_seconds: u32,
    pub has_queue: bool,
    pub applied: AppliedFilters,
}

/// Values offered to the user for each filter control.
///
/// A dimension is `None` when its column is unavailable. The sentinel is not
/// part of the lists; callers prepend it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterOptions {
    pub all_sentinel: String,
    pub channels: Option<Vec<String>>,
    pub segments: Option<Vec<String>>,
    pub intents: Option<Vec<String>>,
    pub queues: Option<Vec<String>>,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub sla_min_seconds: u32,
    pub sla_max_seconds: u32,
    pub default_sla_seconds: u32,
}

const DIMENSIONS: [Field; 4] = [Field::Channel, Field::Segment, Field::Intent, Field::Queue];

pub struct FilterEngine {
    config: DashboardConfig,
}

impl FilterEngine {
    pub fn new(config: DashboardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Apply `params` to `dataset`, returning a new view. The dataset is never modified.
    pub fn apply<'a>(
        &self,
        dataset: &'a Dataset,
        params: &FilterParams,
    ) -> Result<FilteredView<'a>, PulseError> {
        let sla_seconds = self.resolve_sla(params.sla_seconds)?;
        let range = self.resolve_range(dataset, params)?;
        let has_queue = dataset.columns().contains(Field::Queue);

        let mut view = match range {
            Some(range) => dataset.view().retain(|r| range.contains(r.timestamp)),
            None => dataset.view().retain(|_| false),
        };

        let mut applied = AppliedFilters {
            range,
            sla_seconds,
            has_queue,
            ..AppliedFilters::default()
        };

        for field in DIMENSIONS {
            let Some(value) = self.selected(dimension_value(params, field)) else {
                continue;
            };
            if !dataset.columns().contains(field) {
                tracing::debug!("Skipping {} filter '{}': column not in dataset", field, value);
                continue;
            }
            view = view.retain(|r| r.category(field) == Some(value));
            *applied_slot(&mut applied, field) = Some(value.to_string());
        }

        Ok(FilteredView {
            view,
            range,
            sla_seconds,
            has_queue,
            applied,
        })
    }

    /// Distinct values per dimension plus the date and SLA bounds.
    pub fn options(&self, dataset: &Dataset) -> FilterOptions {
        let distinct = |field: Field| -> Option<Vec<String>> {
            if !dataset.columns().contains(field) {
                return None;
            }
            let values: BTreeSet<&str> = dataset
                .records()
                .iter()
                .filter_map(|r| r.category(field))
                .collect();
            Some(values.into_iter().map(str::to_string).collect())
        };
        let span = dataset.date_span();

        FilterOptions {
            all_sentinel: self.config.all_sentinel.clone(),
            channels: distinct(Field::Channel),
            segments: distinct(Field::Segment),
            intents: distinct(Field::Intent),
            queues: distinct(Field::Queue),
            min_date: span.map(|(min, _)| min),
            max_date: span.map(|(_, max)| max),
            sla_min_seconds: self.config.sla_min_seconds,
            sla_max_seconds: self.config.sla_max_seconds,
            default_sla_seconds: self.config.default_sla_seconds,
        }
    }

    fn selected<'p>(&self, value: Option<&'p str>) -> Option<&'p str> {
        value.filter(|v| *v != self.config.all_sentinel)
    }

    fn resolve_sla(&self, requested: Option<u32>) -> Result<u32, PulseError> {
        let sla = requested.unwrap_or(self.config.default_sla_seconds);
        let bounds = self.config.sla_min_seconds..=self.config.sla_max_seconds;
        if !bounds.contains(&sla) {
            return Err(PulseError::InvalidFilter(format!(
                "SLA of {}s is outside {}..={}s",
                sla,
                bounds.start(),
                bounds.end()
            )));
        }
        Ok(sla)
    }

    /// The requested range clipped to the dataset span, so the trend never
    /// covers days outside the data. `None` when no day of the dataset is
    /// selected, which includes the empty dataset.
    fn resolve_range(
        &self,
        dataset: &Dataset,
        params: &FilterParams,
    ) -> Result<Option<DateRange>, PulseError> {
        if let (Some(start), Some(end)) = (params.start, params.end) {
            DateRange::new(start, end)?;
        }
        let Some((min, max)) = dataset.date_span() else {
            return Ok(None);
        };
        let start = params.start.map_or(min, |d| d.max(min));
        let end = params.end.map_or(max, |d| d.min(max));
        if start > end {
            tracing::debug!("Date range {:?}..{:?} is outside the data", params.start, params.end);
            return Ok(None);
        }
        Ok(Some(DateRange { start, end }))
    }
}

fn dimension_value(params: &FilterParams, field: Field) -> Option<&str> {
    match field {
        Field::Channel => params.channel.as_deref(),
        Field::Segment => params.segment.as_deref(),
        Field::Intent => params.intent.as_deref(),
        Field::Queue => params.queue.as_deref(),
        _ => None,
    }
}

fn applied_slot(applied: &mut AppliedFilters, field: Field) -> &mut Option<String> {
    match field {
        Field::Channel => &mut applied.channel,
        Field::Segment => &mut applied.segment,
        Field::Intent => &mut applied.intent,
        _ => &mut applied.queue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{at, day, record, sample_dataset};
    use crate::models::ColumnSet;

    fn engine() -> FilterEngine {
        FilterEngine::new(DashboardConfig::default())
    }

    fn ids(view: &SessionView<'_>) -> Vec<String> {
        view.rows().iter().map(|r| r.session_id.clone()).collect()
    }

    #[test]
    fn test_all_sentinel_is_identity() {
        let dataset = sample_dataset();
        let params = FilterParams {
            channel: Some("All".to_string()),
            segment: Some("All".to_string()),
            intent: Some("All".to_string()),
            queue: Some("All".to_string()),
            ..FilterParams::default()
        };
        let filtered = engine().apply(&dataset, &params).unwrap();
        assert_eq!(filtered.view, dataset.view());

        let unset = engine().apply(&dataset, &FilterParams::default()).unwrap();
        assert_eq!(unset.view, dataset.view());
        assert_eq!(unset.applied.channel, None);
    }

    #[test]
    fn test_filters_commute() {
        let dataset = sample_dataset();
        let engine = engine();

        let by_channel = FilterParams {
            channel: Some("web".to_string()),
            ..FilterParams::default()
        };
        let by_segment = FilterParams {
            segment: Some("ES".to_string()),
            ..FilterParams::default()
        };
        let both = FilterParams {
            channel: Some("web".to_string()),
            segment: Some("ES".to_string()),
            ..FilterParams::default()
        };

        let channel_first = engine.apply(&dataset, &by_channel).unwrap().view;
        let channel_then_segment = channel_first.retain(|r| r.segment.as_deref() == Some("ES"));
        let segment_first = engine.apply(&dataset, &by_segment).unwrap().view;
        let segment_then_channel = segment_first.retain(|r| r.channel.as_deref() == Some("web"));
        let combined = engine.apply(&dataset, &both).unwrap().view;

        assert_eq!(ids(&channel_then_segment), ids(&segment_then_channel));
        assert_eq!(ids(&combined), ids(&channel_then_segment));
        assert!(!combined.is_empty());
    }

    #[test]
    fn test_single_day_range_covers_whole_day() {
        let records = vec![
            record(at(2024, 3, 9, 23, 59, 59), "before"),
            record(at(2024, 3, 10, 0, 0, 0), "midnight"),
            record(at(2024, 3, 10, 23, 59, 59), "last-second"),
            record(at(2024, 3, 11, 0, 0, 0), "next-day"),
        ];
        let dataset = Dataset::new(records, ColumnSet::all());
        let params = FilterParams {
            start: Some(day(2024, 3, 10)),
            end: Some(day(2024, 3, 10)),
            ..FilterParams::default()
        };

        let filtered = engine().apply(&dataset, &params).unwrap();
        assert_eq!(ids(&filtered.view), vec!["midnight", "last-second"]);
    }

    #[test]
    fn test_default_range_is_dataset_span() {
        let dataset = sample_dataset();
        let filtered = engine().apply(&dataset, &FilterParams::default()).unwrap();
        let (min, max) = dataset.date_span().unwrap();
        assert_eq!(filtered.range, Some(DateRange { start: min, end: max }));
        assert_eq!(filtered.sla_seconds, 20);
    }

    #[test]
    fn test_range_clipped_to_dataset_span() {
        let dataset = sample_dataset();
        let params = FilterParams {
            start: Some(day(1, 1, 1)),
            end: Some(day(9999, 12, 31)),
            ..FilterParams::default()
        };
        let filtered = engine().apply(&dataset, &params).unwrap();
        assert_eq!(
            filtered.range,
            Some(DateRange {
                start: day(2024, 3, 1),
                end: day(2024, 3, 4)
            })
        );
        assert_eq!(filtered.view.len(), dataset.len());

        let params = FilterParams {
            start: Some(day(2024, 3, 2)),
            end: Some(day(2030, 1, 1)),
            ..FilterParams::default()
        };
        let filtered = engine().apply(&dataset, &params).unwrap();
        assert_eq!(filtered.range.unwrap().start, day(2024, 3, 2));
        assert_eq!(filtered.range.unwrap().end, day(2024, 3, 4));
        assert_eq!(ids(&filtered.view), vec!["s3", "s4", "s5"]);
    }

    #[test]
    fn test_range_outside_data_selects_nothing() {
        let dataset = sample_dataset();
        for (start, end) in [
            (Some(day(2025, 1, 1)), Some(day(2025, 2, 1))),
            (Some(day(2025, 1, 1)), None),
            (None, Some(day(2020, 1, 1))),
        ] {
            let params = FilterParams {
                start,
                end,
                ..FilterParams::default()
            };
            let filtered = engine().apply(&dataset, &params).unwrap();
            assert!(filtered.range.is_none());
            assert!(filtered.view.is_empty());
        }
    }

    #[test]
    fn test_start_after_end_rejected() {
        let dataset = sample_dataset();
        let params = FilterParams {
            start: Some(day(2024, 3, 5)),
            end: Some(day(2024, 3, 1)),
            ..FilterParams::default()
        };
        let err = engine().apply(&dataset, &params).unwrap_err();
        assert!(matches!(err, PulseError::InvalidFilter(_)));
    }

    #[test]
    fn test_sla_bounds_enforced() {
        let dataset = sample_dataset();
        for sla in [0, 121] {
            let params = FilterParams {
                sla_seconds: Some(sla),
                ..FilterParams::default()
            };
            assert!(engine().apply(&dataset, &params).is_err(), "sla {} should fail", sla);
        }
        for sla in [1, 120] {
            let params = FilterParams {
                sla_seconds: Some(sla),
                ..FilterParams::default()
            };
            assert_eq!(engine().apply(&dataset, &params).unwrap().sla_seconds, sla);
        }
    }

    #[test]
    fn test_queue_filter_skipped_without_queue_column() {
        let records = sample_dataset().records().to_vec();
        let dataset = Dataset::new(records, ColumnSet::all().without(Field::Queue));
        let params = FilterParams {
            queue: Some("billing".to_string()),
            ..FilterParams::default()
        };

        let filtered = engine().apply(&dataset, &params).unwrap();
        assert!(!filtered.has_queue);
        assert_eq!(filtered.view.len(), dataset.len());
        assert_eq!(filtered.applied.queue, None);
    }

    #[test]
    fn test_queue_filter_applied_with_queue_column() {
        let dataset = sample_dataset();
        let params = FilterParams {
            queue: Some("billing".to_string()),
            ..FilterParams::default()
        };
        let filtered = engine().apply(&dataset, &params).unwrap();
        assert!(filtered.has_queue);
        assert!(filtered
            .view
            .rows()
            .iter()
            .all(|r| r.queue.as_deref() == Some("billing")));
        assert_eq!(filtered.applied.queue.as_deref(), Some("billing"));
    }

    #[test]
    fn test_no_match_yields_empty_view() {
        let dataset = sample_dataset();
        let params = FilterParams {
            intent: Some("Nonexistent".to_string()),
            ..FilterParams::default()
        };
        let filtered = engine().apply(&dataset, &params).unwrap();
        assert!(filtered.view.is_empty());
        assert_eq!(dataset.len(), sample_dataset().len());
    }

    #[test]
    fn test_empty_dataset_has_no_range() {
        let dataset = Dataset::new(Vec::new(), ColumnSet::all());
        let filtered = engine().apply(&dataset, &FilterParams::default()).unwrap();
        assert!(filtered.range.is_none());
        assert!(filtered.view.is_empty());
    }

    #[test]
    fn test_options_sorted_and_distinct() {
        let dataset = sample_dataset();
        let options = engine().options(&dataset);
        let channels = options.channels.unwrap();
        let mut sorted = channels.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(channels, sorted);
        assert!(options.queues.is_some());
        assert_eq!(options.all_sentinel, "All");
        assert!(options.min_date <= options.max_date);
    }

    #[test]
    fn test_options_hide_queue_when_absent() {
        let records = sample_dataset().records().to_vec();
        let dataset = Dataset::new(records, ColumnSet::all().without(Field::Queue));
        assert!(engine().options(&dataset).queues.is_none());
    }
}
