use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::{EventId, PackageId, RepresentationId};

/// Aggregated outcome of an action recorded as provenance.
///
/// The numeric codes are stable: `0` error, `1` success, `2` partial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    Failure,
    Success,
    PartialSuccess,
}

impl EventOutcome {
    pub fn code(self) -> u8 {
        match self {
            Self::Failure => 0,
            Self::Success => 1,
            Self::PartialSuccess => 2,
        }
    }

    pub fn from_code(code: u8) -> Result<Self, TypeError> {
        match code {
            0 => Ok(Self::Failure),
            1 => Ok(Self::Success),
            2 => Ok(Self::PartialSuccess),
            other => Err(TypeError::UnknownOutcome(other)),
        }
    }

    /// Fold another outcome into this one. Success survives only if both
    /// sides succeeded; failure dominates partial success.
    pub fn degrade(self, other: Self) -> Self {
        match (self, other) {
            (Self::Failure, _) | (_, Self::Failure) => Self::Failure,
            (Self::PartialSuccess, _) | (_, Self::PartialSuccess) => Self::PartialSuccess,
            _ => Self::Success,
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Failure => "failure",
            Self::Success => "success",
            Self::PartialSuccess => "partial_success",
        };
        f.write_str(s)
    }
}

/// Immutable provenance record of an action taken on content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreservationEvent {
    pub id: EventId,
    pub package_id: PackageId,
    pub representation_id: Option<RepresentationId>,
    pub event_type: String,
    pub outcome: EventOutcome,
    /// Relative paths of the source files the action altered.
    pub affected_file_ids: Vec<String>,
    /// Free-form details, e.g. the id of a derived representation.
    pub details: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub agent: String,
}

/// Structured operation-log record, persisted one JSON object per line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EventId,
    pub action_component: String,
    pub action_method: String,
    pub related_object_id: Option<String>,
    pub username: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub datetime: DateTime<Utc>,
    pub duration_ms: u64,
}

impl LogEntry {
    pub fn new(component: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: EventId::generate(),
            action_component: component.into(),
            action_method: method.into(),
            related_object_id: None,
            username: None,
            parameters: BTreeMap::new(),
            datetime: Utc::now(),
            duration_ms: 0,
        }
    }
}
