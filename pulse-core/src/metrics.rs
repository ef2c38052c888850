//! Metrics aggregator
//!
//! Scalar KPIs and small grouped tables computed from a filtered session view.
//! Every function is pure and deterministic for a given row order.
//!
//! Two "empty" states are kept apart:
//!   - `Metric::NoData`      the column exists but there is nothing to average
//!   - `Metric::Unavailable` the column is absent from the schema or the file
//!
//! Tables whose grouping column is absent come back as `None`.
//!
//! Null policy: rows with an empty flag, CSAT or NPS cell are left out of that
//! metric's denominator. A missing response time counts as an SLA miss.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::DashboardConfig;
use crate::filter::{DateRange, FilteredView};
use crate::models::{SessionRecord, SessionView};
use crate::schema::Field;

/// A scalar KPI value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Metric {
    Value(f64),
    NoData,
    Unavailable,
}

impl Metric {
    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Value(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, Metric::Unavailable)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub sessions: usize,
    pub resolution_rate: Metric,
    pub handover_rate: Metric,
    pub fcr_rate: Metric,
    pub mean_csat: Metric,
    pub nps: Metric,
    pub sla_compliance: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub sessions: usize,
    pub resolution_rate: Metric,
    pub handover_rate: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub key: String,
    pub sessions: usize,
    pub resolution_rate: Metric,
    pub handover_rate: Metric,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSla {
    pub queue: String,
    pub sessions: usize,
    pub sla_compliance: Metric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelStage {
    pub stage: String,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVolume {
    pub intent: String,
    pub sessions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentHandover {
    pub intent: String,
    pub sessions: usize,
    pub handover_rate: f64,
}

/// Observed/hit counter for a 0/1 flag or a boolean predicate.
#[derive(Debug, Clone, Copy, Default)]
struct Ratio {
    observed: usize,
    hits: usize,
}

impl Ratio {
    fn push_flag(&mut self, flag: Option<u8>) {
        if let Some(v) = flag {
            self.observed += 1;
            if v == 1 {
                self.hits += 1;
            }
        }
    }

    fn push(&mut self, hit: bool) {
        self.observed += 1;
        if hit {
            self.hits += 1;
        }
    }

    fn percent(&self) -> Metric {
        if self.observed == 0 {
            return Metric::NoData;
        }
        Metric::Value(self.hits as f64 / self.observed as f64 * 100.0)
    }
}

/// Per-group accumulator shared by the trend and breakdown tables.
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    sessions: usize,
    resolved: Ratio,
    handover: Ratio,
    within_sla: Ratio,
}

impl Tally {
    fn push(&mut self, record: &SessionRecord, sla_seconds: Option<u32>) {
        self.sessions += 1;
        self.resolved.push_flag(record.resolved);
        self.handover.push_flag(record.handover);
        if let Some(sla) = sla_seconds {
            self.within_sla.push(within_sla(record, sla));
        }
    }
}

fn within_sla(record: &SessionRecord, sla_seconds: u32) -> bool {
    record
        .response_time_sec
        .is_some_and(|t| t <= f64::from(sla_seconds))
}

fn gated(available: bool, metric: Metric) -> Metric {
    if available {
        metric
    } else {
        Metric::Unavailable
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Metric {
    let (count, sum) = values.fold((0usize, 0.0f64), |(n, s), v| (n + 1, s + v));
    if count == 0 {
        Metric::NoData
    } else {
        Metric::Value(sum / count as f64)
    }
}

pub struct MetricsAggregator {
    config: DashboardConfig,
}

impl MetricsAggregator {
    pub fn new(config: DashboardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn session_count(&self, view: &SessionView<'_>) -> usize {
        view.len()
    }

    pub fn resolution_rate(&self, view: &SessionView<'_>) -> Metric {
        flag_rate(view, Field::Resolved)
    }

    pub fn handover_rate(&self, view: &SessionView<'_>) -> Metric {
        flag_rate(view, Field::Handover)
    }

    pub fn fcr_rate(&self, view: &SessionView<'_>) -> Metric {
        flag_rate(view, Field::FirstContactResolution)
    }

    pub fn mean_csat(&self, view: &SessionView<'_>) -> Metric {
        gated(
            view.has(Field::Csat),
            mean(view.rows().iter().filter_map(|r| r.csat)),
        )
    }

    /// Net promoter score over non-null ratings: promoters score 9-10,
    /// detractors 0-6, passives only enlarge the denominator.
    pub fn nps_score(&self, view: &SessionView<'_>) -> Metric {
        if !view.has(Field::Nps) {
            return Metric::Unavailable;
        }
        let mut promoters = 0usize;
        let mut detractors = 0usize;
        let mut total = 0usize;
        for score in view.rows().iter().filter_map(|r| r.nps) {
            total += 1;
            if score >= 9.0 {
                promoters += 1;
            } else if score <= 6.0 {
                detractors += 1;
            }
        }
        if total == 0 {
            return Metric::NoData;
        }
        let promoter_fraction = promoters as f64 / total as f64;
        let detractor_fraction = detractors as f64 / total as f64;
        Metric::Value((promoter_fraction - detractor_fraction) * 100.0)
    }

    pub fn sla_compliance(&self, view: &SessionView<'_>, sla_seconds: u32) -> Metric {
        if !view.has(Field::ResponseTimeSec) {
            return Metric::Unavailable;
        }
        let mut ratio = Ratio::default();
        for r in view.rows() {
            ratio.push(within_sla(r, sla_seconds));
        }
        ratio.percent()
    }

    pub fn kpis(&self, filtered: &FilteredView<'_>) -> Kpis {
        let view = &filtered.view;
        Kpis {
            sessions: self.session_count(view),
            resolution_rate: self.resolution_rate(view),
            handover_rate: self.handover_rate(view),
            fcr_rate: self.fcr_rate(view),
            mean_csat: self.mean_csat(view),
            nps: self.nps_score(view),
            sla_compliance: self.sla_compliance(view, filtered.sla_seconds),
        }
    }

    /// One point per calendar day of `range`, zero-session days included.
    /// Without a range the view's own first and last day are used.
    pub fn daily_trend(&self, view: &SessionView<'_>, range: Option<DateRange>) -> Vec<DailyPoint> {
        let mut by_day: BTreeMap<NaiveDate, Tally> = BTreeMap::new();
        for r in view.rows() {
            by_day.entry(r.date()).or_default().push(r, None);
        }

        let range = match range {
            Some(range) => range,
            None => match (by_day.keys().next(), by_day.keys().next_back()) {
                (Some(&start), Some(&end)) => DateRange { start, end },
                _ => return Vec::new(),
            },
        };

        let has_resolved = view.has(Field::Resolved);
        let has_handover = view.has(Field::Handover);
        range
            .days()
            .map(|date| {
                let tally = by_day.get(&date).copied().unwrap_or_default();
                DailyPoint {
                    date,
                    sessions: tally.sessions,
                    resolution_rate: gated(has_resolved, tally.resolved.percent()),
                    handover_rate: gated(has_handover, tally.handover.percent()),
                }
            })
            .collect()
    }

    /// Session count and rates per value of `field`, largest group first,
    /// ties in ascending key order. `None` when the column is absent.
    pub fn breakdown(&self, view: &SessionView<'_>, field: Field) -> Option<Vec<BreakdownRow>> {
        if !view.has(field) {
            return None;
        }
        let groups = group_by(view, field, None);
        let has_resolved = view.has(Field::Resolved);
        let has_handover = view.has(Field::Handover);

        let mut rows: Vec<BreakdownRow> = groups
            .into_iter()
            .map(|(key, tally)| BreakdownRow {
                key: key.to_string(),
                sessions: tally.sessions,
                resolution_rate: gated(has_resolved, tally.resolved.percent()),
                handover_rate: gated(has_handover, tally.handover.percent()),
            })
            .collect();
        // stable: BTreeMap order breaks ties
        rows.sort_by(|a, b| b.sessions.cmp(&a.sessions));
        Some(rows)
    }

    /// SLA compliance per queue, in queue-name order. `None` without the
    /// queue capability.
    pub fn sla_by_queue(&self, filtered: &FilteredView<'_>) -> Option<Vec<QueueSla>> {
        if !filtered.has_queue {
            return None;
        }
        let view = &filtered.view;
        let has_response_time = view.has(Field::ResponseTimeSec);
        let groups = group_by(view, Field::Queue, Some(filtered.sla_seconds));
        Some(
            groups
                .into_iter()
                .map(|(queue, tally)| QueueSla {
                    queue: queue.to_string(),
                    sessions: tally.sessions,
                    sla_compliance: gated(has_response_time, tally.within_sla.percent()),
                })
                .collect(),
        )
    }

    /// Returns-intent sessions counted per funnel stage, in the configured
    /// stage order. Stages outside the vocabulary are ignored.
    pub fn returns_funnel(&self, view: &SessionView<'_>) -> Option<Vec<FunnelStage>> {
        if !view.has(Field::Intent) || !view.has(Field::ReturnsStage) {
            return None;
        }
        let mut counts: Vec<FunnelStage> = self
            .config
            .returns_stages
            .iter()
            .map(|stage| FunnelStage {
                stage: stage.clone(),
                sessions: 0,
            })
            .collect();

        let returns = view
            .rows()
            .iter()
            .filter(|r| r.intent.as_deref() == Some(self.config.returns_intent.as_str()));
        for r in returns {
            let Some(stage) = r.returns_stage.as_deref() else {
                continue;
            };
            if let Some(slot) = counts.iter_mut().find(|s| s.stage == stage) {
                slot.sessions += 1;
            }
        }
        Some(counts)
    }

    pub fn top_intents_by_volume(&self, view: &SessionView<'_>) -> Option<Vec<IntentVolume>> {
        if !view.has(Field::Intent) {
            return None;
        }
        let mut rows: Vec<IntentVolume> = group_by(view, Field::Intent, None)
            .into_iter()
            .map(|(intent, tally)| IntentVolume {
                intent: intent.to_string(),
                sessions: tally.sessions,
            })
            .collect();
        rows.sort_by(|a, b| b.sessions.cmp(&a.sessions));
        rows.truncate(self.config.top_n);
        Some(rows)
    }

    /// Intents with the highest handover rate among groups of at least
    /// `min_handover_sessions` sessions.
    pub fn top_intents_by_handover(&self, view: &SessionView<'_>) -> Option<Vec<IntentHandover>> {
        if !view.has(Field::Intent) || !view.has(Field::Handover) {
            return None;
        }
        let mut rows: Vec<IntentHandover> = group_by(view, Field::Intent, None)
            .into_iter()
            .filter(|(_, tally)| tally.sessions >= self.config.min_handover_sessions)
            .filter_map(|(intent, tally)| {
                tally.handover.percent().value().map(|rate| IntentHandover {
                    intent: intent.to_string(),
                    sessions: tally.sessions,
                    handover_rate: rate,
                })
            })
            .collect();
        rows.sort_by(|a, b| b.handover_rate.total_cmp(&a.handover_rate));
        rows.truncate(self.config.top_n);
        Some(rows)
    }

    /// Most recent sessions first, capped at `detail_limit`.
    pub fn recent_sessions(&self, view: &SessionView<'_>) -> Vec<SessionRecord> {
        let mut rows: Vec<&SessionRecord> = view.rows().to_vec();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.into_iter()
            .take(self.config.detail_limit)
            .cloned()
            .collect()
    }
}

fn flag_rate(view: &SessionView<'_>, field: Field) -> Metric {
    if !view.has(field) {
        return Metric::Unavailable;
    }
    let mut ratio = Ratio::default();
    for r in view.rows() {
        ratio.push_flag(r.flag(field));
    }
    ratio.percent()
}

/// Rows grouped by a categorical field in ascending key order. Rows with an
/// empty key are dropped.
fn group_by<'a>(
    view: &SessionView<'a>,
    field: Field,
    sla_seconds: Option<u32>,
) -> BTreeMap<&'a str, Tally> {
    let mut groups: BTreeMap<&'a str, Tally> = BTreeMap::new();
    for r in view.rows().iter().copied() {
        if let Some(key) = r.category(field) {
            groups.entry(key).or_default().push(r, sla_seconds);
        }
    }
    groups
}
