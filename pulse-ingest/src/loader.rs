//! CSV dataset loader
//!
//! Reads a session export with a header row and resolves every mapped field of
//! the [`ColumnSchema`] against that header. Cells are trimmed; an empty cell
//! is a null.
//!
//! Failure policy (the whole load aborts, no partial dataset):
//!   - timestamp or session id column missing, or a timestamp that does not
//!     parse: `PulseError::Parse`
//!   - a flag that is not 0/1 (fractions included), a numeric cell that is
//!     not a finite number, a negative duration, or a score outside its
//!     scale (CSAT 1-5, NPS 0-10): `PulseError::Type`

use std::collections::BTreeMap;
use std::io::Read;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use pulse_core::{ColumnSchema, ColumnSet, Dataset, Field, PulseError, SessionRecord};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const DURATION: RangeInclusive<f64> = 0.0..=f64::INFINITY;
const CSAT_SCALE: RangeInclusive<f64> = 1.0..=5.0;
const NPS_SCALE: RangeInclusive<f64> = 0.0..=10.0;

/// Naive formats tried in order before falling back to offset-aware parsing.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
];

pub struct DatasetLoader {
    schema: ColumnSchema,
}

impl DatasetLoader {
    pub fn new(schema: ColumnSchema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &ColumnSchema {
        &self.schema
    }

    pub fn load_path(&self, path: impl AsRef<Path>) -> Result<Dataset, PulseError> {
        let bytes = std::fs::read(path.as_ref())?;
        self.load_bytes(&bytes)
    }

    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Dataset, PulseError> {
        let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        self.load_reader(bytes)
    }

    pub fn load_reader<R: Read>(&self, reader: R) -> Result<Dataset, PulseError> {
        let start = Instant::now();
        let mut rdr = ReaderBuilder::new()
            .has_headers(true)
            .trim(Trim::All)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| PulseError::Parse(format!("cannot read CSV header: {}", e)))?
            .clone();
        let layout = Layout::resolve(&self.schema, &headers)?;

        let mut records = Vec::new();
        let mut row = StringRecord::new();
        loop {
            match rdr.read_record(&mut row) {
                Ok(true) => {
                    let line = row.position().map(|p| p.line()).unwrap_or(0);
                    records.push(layout.parse_row(&row, line)?);
                }
                Ok(false) => break,
                Err(e) => return Err(PulseError::Parse(format!("malformed CSV: {}", e))),
            }
        }

        let dataset = Dataset::new(records, layout.columns());
        tracing::info!(
            "Parsed dataset: {} rows, {} mapped columns in {}ms",
            dataset.len(),
            dataset.columns().len(),
            start.elapsed().as_millis()
        );
        Ok(dataset)
    }
}

/// Position of every mapped field found in the header.
struct Layout {
    positions: BTreeMap<Field, (usize, String)>,
}

impl Layout {
    fn resolve(schema: &ColumnSchema, headers: &StringRecord) -> Result<Self, PulseError> {
        let mut positions = BTreeMap::new();
        for field in Field::ALL {
            let Some(name) = schema.column(field) else {
                continue;
            };
            match headers.iter().position(|h| h == name) {
                Some(idx) => {
                    positions.insert(field, (idx, name.to_string()));
                }
                None if field.is_required() => {
                    return Err(PulseError::Parse(format!(
                        "required {} column '{}' not found in CSV header",
                        field, name
                    )));
                }
                None => tracing::debug!("Optional {} column '{}' not in CSV", field, name),
            }
        }
        Ok(Self { positions })
    }

    fn columns(&self) -> ColumnSet {
        self.positions.keys().copied().collect()
    }

    fn cell<'r>(&self, row: &'r StringRecord, field: Field) -> Option<&'r str> {
        let (idx, _) = self.positions.get(&field)?;
        row.get(*idx).filter(|s| !s.is_empty())
    }

    fn column_name(&self, field: Field) -> &str {
        self.positions
            .get(&field)
            .map(|(_, name)| name.as_str())
            .unwrap_or_else(|| field.as_str())
    }

    fn type_error(&self, field: Field, line: u64, message: String) -> PulseError {
        PulseError::Type {
            column: self.column_name(field).to_string(),
            line,
            message,
        }
    }

    fn text(&self, row: &StringRecord, field: Field) -> Option<String> {
        self.cell(row, field).map(str::to_string)
    }

    fn flag(&self, row: &StringRecord, field: Field, line: u64) -> Result<Option<u8>, PulseError> {
        self.cell(row, field)
            .map(|raw| parse_flag(raw).map_err(|m| self.type_error(field, line, m)))
            .transpose()
    }

    fn number(
        &self,
        row: &StringRecord,
        field: Field,
        line: u64,
        bounds: &RangeInclusive<f64>,
    ) -> Result<Option<f64>, PulseError> {
        self.cell(row, field)
            .map(|raw| parse_number(raw, bounds).map_err(|m| self.type_error(field, line, m)))
            .transpose()
    }

    fn parse_row(&self, row: &StringRecord, line: u64) -> Result<SessionRecord, PulseError> {
        let raw_ts = self.cell(row, Field::Timestamp).unwrap_or("");
        let timestamp = parse_timestamp(raw_ts).ok_or_else(|| {
            PulseError::Parse(format!(
                "line {}: cannot parse '{}' in column '{}' as a date-time",
                line,
                raw_ts,
                self.column_name(Field::Timestamp)
            ))
        })?;

        Ok(SessionRecord {
            timestamp,
            session_id: self.text(row, Field::SessionId).unwrap_or_default(),
            channel: self.text(row, Field::Channel),
            segment: self.text(row, Field::Segment),
            queue: self.text(row, Field::Queue),
            intent: self.text(row, Field::Intent),
            resolved: self.flag(row, Field::Resolved, line)?,
            handover: self.flag(row, Field::Handover, line)?,
            first_contact_resolution: self.flag(row, Field::FirstContactResolution, line)?,
            response_time_sec: self.number(row, Field::ResponseTimeSec, line, &DURATION)?,
            aht_sec: self.number(row, Field::AhtSec, line, &DURATION)?,
            csat: self.number(row, Field::Csat, line, &CSAT_SCALE)?,
            nps: self.number(row, Field::Nps, line, &NPS_SCALE)?,
            returns_stage: self.text(row, Field::ReturnsStage),
        })
    }
}

/// Parse a timestamp cell. Offset-aware values keep their wall-clock time.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.naive_local());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Accepts 0/1 (also written 0.0/1.0) and true/false.
fn parse_flag(raw: &str) -> Result<u8, String> {
    if raw.eq_ignore_ascii_case("true") {
        return Ok(1);
    }
    if raw.eq_ignore_ascii_case("false") {
        return Ok(0);
    }
    match raw.parse::<f64>() {
        Ok(v) if v == 0.0 => Ok(0),
        Ok(v) if v == 1.0 => Ok(1),
        _ => Err(format!("'{}' is not a 0/1 flag", raw)),
    }
}

/// Finite numbers inside `bounds`. Durations only have a lower bound.
fn parse_number(raw: &str, bounds: &RangeInclusive<f64>) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("'{}' is not a number", raw))?;
    if !value.is_finite() {
        return Err(format!("'{}' is not a finite number", raw));
    }
    if bounds.contains(&value) {
        return Ok(value);
    }
    if bounds.end().is_infinite() {
        Err(format!("'{}' must not be negative", raw))
    } else {
        Err(format!(
            "'{}' is outside the {}-{} scale",
            raw,
            bounds.start(),
            bounds.end()
        ))
    }
}
