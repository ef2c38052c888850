use std::sync::Arc;

use anyhow::bail;
use chrono::NaiveDate;
use pulse_core::ipc::{PulseRequest, PulseResponse};
use pulse_core::{ColumnSet, DashboardView, FilterOptions, FilterParams};
use pulse_ingest::Loaded;
use serde::Serialize;

use crate::state::AppState;

/// What a caller gets back after loading a dataset.
#[derive(Debug, Serialize)]
pub struct LoadSummary {
    pub dataset: String,
    pub rows: usize,
    pub columns: ColumnSet,
    pub min_date: Option<NaiveDate>,
    pub max_date: Option<NaiveDate>,
    pub cached: bool,
}

impl From<Loaded> for LoadSummary {
    fn from(loaded: Loaded) -> Self {
        let span = loaded.dataset.date_span();
        Self {
            dataset: loaded.key.to_string(),
            rows: loaded.dataset.len(),
            columns: loaded.dataset.columns().clone(),
            min_date: span.map(|(lo, _)| lo),
            max_date: span.map(|(_, hi)| hi),
            cached: loaded.cached,
        }
    }
}

pub fn load_bytes(state: &AppState, bytes: &[u8]) -> anyhow::Result<LoadSummary> {
    Ok(state.cache.load_bytes(bytes)?.into())
}

pub fn load_path(state: &AppState, path: &str) -> anyhow::Result<LoadSummary> {
    let loaded = state.cache.load_path(path)?;
    tracing::info!("Loaded {} as dataset {}", path, loaded.key.short());
    Ok(loaded.into())
}

pub fn load_dataset(
    state: &AppState,
    path: Option<&str>,
    csv: Option<&str>,
) -> anyhow::Result<LoadSummary> {
    match (path, csv) {
        (_, Some(body)) => load_bytes(state, body.as_bytes()),
        (Some(path), None) => load_path(state, path),
        (None, None) => bail!("load requires either 'path' or 'csv'"),
    }
}

pub fn dataset_options(state: &AppState, key: &str) -> anyhow::Result<FilterOptions> {
    let dataset = state.cache.require(key)?;
    Ok(state.dashboard.options(&dataset))
}

pub fn render_dataset(
    state: &AppState,
    key: &str,
    params: &FilterParams,
) -> anyhow::Result<DashboardView> {
    let dataset = state.cache.require(key)?;
    Ok(state.dashboard.render(&dataset, params)?)
}

pub fn health_body(state: &AppState) -> serde_json::Value {
    let stats = state.cache.stats();
    serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "socket": state.config.service.socket_path,
        "datasets": stats.entries,
        "cache": stats,
    })
}

/// Parsing and rendering are CPU bound; keep them off the async workers.
pub async fn blocking<T, F>(state: &Arc<AppState>, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&AppState) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || f(&state)).await?
}

fn respond<T: Serialize>(result: anyhow::Result<T>) -> PulseResponse {
    match result.and_then(|v| Ok(serde_json::to_value(v)?)) {
        Ok(data) => PulseResponse::ok(data),
        Err(e) => PulseResponse::err(e.to_string()),
    }
}

pub async fn handle_request(request: PulseRequest, state: &Arc<AppState>) -> PulseResponse {
    match request {
        PulseRequest::Ping => PulseResponse::pong(),
        PulseRequest::Health => PulseResponse::ok(health_body(state)),
        PulseRequest::Load { path, csv } => respond(
            blocking(state, move |s| {
                load_dataset(s, path.as_deref(), csv.as_deref())
            })
            .await,
        ),
        PulseRequest::Options { dataset } => respond(dataset_options(state, &dataset)),
        PulseRequest::Render { dataset, filters } => respond(
            blocking(state, move |s| render_dataset(s, &dataset, &filters)).await,
        ),
    }
}
