use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RoundId
// ---------------------------------------------------------------------------

/// `(route, service date, shift index)`, rendered `"<route>:<YYYY-MM-DD>:<shift>"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoundId {
    pub route_id: String,
    pub service_date: NaiveDate,
    pub shift_index: u32,
}

impl RoundId {
    pub fn new(route_id: impl Into<String>, service_date: NaiveDate, shift_index: u32) -> Self {
        Self {
            route_id: route_id.into(),
            service_date,
            shift_index,
        }
    }

    /// Inverse of `Display`. Route ids may themselves contain `:`.
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.rsplitn(3, ':');
        let shift = parts.next()?.parse().ok()?;
        let date = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let route = parts.next()?;
        if route.is_empty() {
            return None;
        }
        Some(Self::new(route, date, shift))
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.route_id,
            self.service_date.format("%Y-%m-%d"),
            self.shift_index
        )
    }
}

impl TryFrom<String> for RoundId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("invalid round id '{value}'"))
    }
}

impl From<RoundId> for String {
    fn from(value: RoundId) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// RoundRecord
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    Open,
    Complete,
    Closed,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Open => "OPEN",
            RoundStatus::Complete => "COMPLETE",
            RoundStatus::Closed => "CLOSED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OPEN" => Some(RoundStatus::Open),
            "COMPLETE" => Some(RoundStatus::Complete),
            "CLOSED" => Some(RoundStatus::Closed),
            _ => None,
        }
    }
}

/// Lifecycle state of one round.
///
/// `expected_points` is a snapshot taken from the configuration in force at
/// `starts_at` and never changes afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_id: RoundId,
    pub factory_id: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// `ends_at + grace margin`; the sweep may close the round from here on.
    pub closes_at: DateTime<Utc>,
    pub expected_points: Vec<String>,
    /// scan point id -> outcome id of its single VALID outcome.
    #[serde(default)]
    pub valid_points: BTreeMap<String, Uuid>,
    #[serde(default)]
    pub accountable_guard: Option<String>,
    pub status: RoundStatus,
}

impl RoundRecord {
    pub fn route_id(&self) -> &str {
        &self.round_id.route_id
    }

    pub fn service_date(&self) -> NaiveDate {
        self.round_id.service_date
    }

    pub fn shift_index(&self) -> u32 {
        self.round_id.shift_index
    }

    pub fn is_closed(&self) -> bool {
        self.status == RoundStatus::Closed
    }

    pub fn has_valid(&self, scan_point_id: &str) -> bool {
        self.valid_points.contains_key(scan_point_id)
    }

    /// Expected points still lacking a VALID outcome, in snapshot order.
    pub fn unsatisfied_points(&self) -> impl Iterator<Item = &str> {
        self.expected_points
            .iter()
            .map(String::as_str)
            .filter(|p| !self.valid_points.contains_key(*p))
    }

    /// Record the round's VALID outcome for a point and promote to COMPLETE
    /// when nothing remains outstanding. Closed rounds are left untouched.
    pub fn record_valid(&mut self, scan_point_id: &str, outcome_id: Uuid) {
        if self.is_closed() {
            return;
        }
        self.valid_points
            .entry(scan_point_id.to_string())
            .or_insert(outcome_id);
        if !self.expected_points.is_empty() && self.unsatisfied_points().next().is_none() {
            self.status = RoundStatus::Complete;
        }
    }
}
