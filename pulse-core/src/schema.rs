//! Column schema: maps logical session fields to the literal CSV header names.
//!
//! Only `timestamp` and `session_id` are mandatory. Every other entry may be
//! omitted from the file (falls back to the default export header) or set to an
//! empty string, which disables the field entirely.

use serde::{Deserialize, Serialize};

use crate::error::PulseError;

/// Logical fields of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Timestamp,
    Channel,
    Segment,
    Queue,
    Intent,
    Resolved,
    Handover,
    FirstContactResolution,
    ResponseTimeSec,
    AhtSec,
    Csat,
    Nps,
    ReturnsStage,
    SessionId,
}

impl Field {
    pub const ALL: [Field; 14] = [
        Field::Timestamp,
        Field::Channel,
        Field::Segment,
        Field::Queue,
        Field::Intent,
        Field::Resolved,
        Field::Handover,
        Field::FirstContactResolution,
        Field::ResponseTimeSec,
        Field::AhtSec,
        Field::Csat,
        Field::Nps,
        Field::ReturnsStage,
        Field::SessionId,
    ];

    /// The three 0/1 flag fields.
    pub const FLAGS: [Field; 3] = [
        Field::Resolved,
        Field::Handover,
        Field::FirstContactResolution,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Timestamp => "timestamp",
            Field::Channel => "channel",
            Field::Segment => "segment",
            Field::Queue => "queue",
            Field::Intent => "intent",
            Field::Resolved => "resolved",
            Field::Handover => "handover",
            Field::FirstContactResolution => "first_contact_resolution",
            Field::ResponseTimeSec => "response_time_sec",
            Field::AhtSec => "aht_sec",
            Field::Csat => "csat",
            Field::Nps => "nps",
            Field::ReturnsStage => "returns_stage",
            Field::SessionId => "session_id",
        }
    }

    pub fn is_required(&self) -> bool {
        matches!(self, Field::Timestamp | Field::SessionId)
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnSchema {
    pub timestamp: String,
    pub session_id: String,
    pub channel: Option<String>,
    pub segment: Option<String>,
    pub queue: Option<String>,
    pub intent: Option<String>,
    pub resolved: Option<String>,
    pub handover: Option<String>,
    pub first_contact_resolution: Option<String>,
    pub response_time_sec: Option<String>,
    pub aht_sec: Option<String>,
    pub csat: Option<String>,
    pub nps: Option<String>,
    pub returns_stage: Option<String>,
}

impl Default for ColumnSchema {
    fn default() -> Self {
        Self {
            timestamp: "fecha_interaccion".to_string(),
            session_id: "id_sesion".to_string(),
            channel: Some("canal".to_string()),
            segment: Some("pais".to_string()),
            queue: Some("cola".to_string()),
            intent: Some("motivo_consulta".to_string()),
            resolved: Some("resuelto_chatbot".to_string()),
            handover: Some("transferido_agente".to_string()),
            first_contact_resolution: Some("fcr".to_string()),
            response_time_sec: Some("tiempo_respuesta_seg".to_string()),
            aht_sec: Some("aht_seg".to_string()),
            csat: Some("csat".to_string()),
            nps: Some("nps".to_string()),
            returns_stage: Some("funnel_devoluciones".to_string()),
        }
    }
}

impl ColumnSchema {
    /// Literal column name for `field`, or `None` when the field is not mapped.
    pub fn column(&self, field: Field) -> Option<&str> {
        let name = match field {
            Field::Timestamp => Some(&self.timestamp),
            Field::SessionId => Some(&self.session_id),
            Field::Channel => self.channel.as_ref(),
            Field::Segment => self.segment.as_ref(),
            Field::Queue => self.queue.as_ref(),
            Field::Intent => self.intent.as_ref(),
            Field::Resolved => self.resolved.as_ref(),
            Field::Handover => self.handover.as_ref(),
            Field::FirstContactResolution => self.first_contact_resolution.as_ref(),
            Field::ResponseTimeSec => self.response_time_sec.as_ref(),
            Field::AhtSec => self.aht_sec.as_ref(),
            Field::Csat => self.csat.as_ref(),
            Field::Nps => self.nps.as_ref(),
            Field::ReturnsStage => self.returns_stage.as_ref(),
        };
        name.map(|s| s.trim()).filter(|s| !s.is_empty())
    }

    pub fn validate(&self) -> Result<(), PulseError> {
        for field in [Field::Timestamp, Field::SessionId] {
            if self.column(field).is_none() {
                return Err(PulseError::Config(config::ConfigError::Message(format!(
                    "schema.{} must name a column",
                    field
                ))));
            }
        }
        Ok(())
    }
}
