use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::round::RoundId;

/// Terminal verdict for one scan event, or for the absence of one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    Valid,
    OutOfWindow,
    OutOfRadius,
    TooSoon,
    Duplicate,
    Missed,
}

impl Classification {
    pub const ALL: [Classification; 6] = [
        Classification::Valid,
        Classification::OutOfWindow,
        Classification::OutOfRadius,
        Classification::TooSoon,
        Classification::Duplicate,
        Classification::Missed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Valid => "VALID",
            Classification::OutOfWindow => "OUT_OF_WINDOW",
            Classification::OutOfRadius => "OUT_OF_RADIUS",
            Classification::TooSoon => "TOO_SOON",
            Classification::Duplicate => "DUPLICATE",
            Classification::Missed => "MISSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Diagnostic only; never feeds back into classification.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Deviation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_outside_window: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meters_from_point: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub outcome_id: Uuid,
    pub scan_event_id: Option<Uuid>,
    pub scan_point_id: String,
    pub factory_id: String,
    pub round_id: Option<RoundId>,
    pub guard_id: Option<String>,
    pub classification: Classification,
    #[serde(default)]
    pub deviation: Deviation,
    pub occurred_at: DateTime<Utc>,
    pub service_date: NaiveDate,
}

impl ScanOutcome {
    pub fn for_event_id(event_id: Uuid) -> Uuid {
        crate::derive_id(&["outcome", &event_id.to_string()])
    }

    pub fn missed_id(round_id: &RoundId, scan_point_id: &str) -> Uuid {
        crate::derive_id(&["missed", &round_id.to_string(), scan_point_id])
    }

    pub fn is_valid(&self) -> bool {
        self.classification == Classification::Valid
    }
}
