use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::schema::Field;

/// One chatbot interaction session, as loaded from a CSV row.
///
/// Flags are stored as 0/1. Every optional field is `None` both when the
/// column is absent and when the cell is empty; `Dataset::columns` tells
/// the two apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: NaiveDateTime,
    pub session_id: String,
    pub channel: Option<String>,
    pub segment: Option<String>,
    pub queue: Option<String>,
    pub intent: Option<String>,
    pub resolved: Option<u8>,
    pub handover: Option<u8>,
    pub first_contact_resolution: Option<u8>,
    pub response_time_sec: Option<f64>,
    pub aht_sec: Option<f64>,
    pub csat: Option<f64>,
    pub nps: Option<f64>,
    pub returns_stage: Option<String>,
}

impl SessionRecord {
    pub fn new(timestamp: NaiveDateTime, session_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            session_id: session_id.into(),
            channel: None,
            segment: None,
            queue: None,
            intent: None,
            resolved: None,
            handover: None,
            first_contact_resolution: None,
            response_time_sec: None,
            aht_sec: None,
            csat: None,
            nps: None,
            returns_stage: None,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Categorical value for a string-typed field.
    pub fn category(&self, field: Field) -> Option<&str> {
        match field {
            Field::Channel => self.channel.as_deref(),
            Field::Segment => self.segment.as_deref(),
            Field::Queue => self.queue.as_deref(),
            Field::Intent => self.intent.as_deref(),
            Field::ReturnsStage => self.returns_stage.as_deref(),
            Field::SessionId => Some(self.session_id.as_str()),
            _ => None,
        }
    }

    pub fn flag(&self, field: Field) -> Option<u8> {
        match field {
            Field::Resolved => self.resolved,
            Field::Handover => self.handover,
            Field::FirstContactResolution => self.first_contact_resolution,
            _ => None,
        }
    }

    pub fn number(&self, field: Field) -> Option<f64> {
        match field {
            Field::ResponseTimeSec => self.response_time_sec,
            Field::AhtSec => self.aht_sec,
            Field::Csat => self.csat,
            Field::Nps => self.nps,
            _ => None,
        }
    }
}
