use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::TimeWindow;
use crate::geo::GeoPoint;

/// Waiting time applied when an admin payload omits `cooldown_secs` (15 min).
pub const DEFAULT_COOLDOWN_SECS: u64 = 900;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub building: String,
    #[serde(default)]
    pub area: String,
    #[serde(default)]
    pub floor: String,
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PatrolLogic {
    #[serde(default = "TimeWindow::all_day")]
    pub expected_window: TimeWindow,
    #[serde(default)]
    pub minimum_gap_secs: u64,
}

impl Default for PatrolLogic {
    fn default() -> Self {
        Self {
            expected_window: TimeWindow::all_day(),
            minimum_gap_secs: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationRules {
    #[serde(default)]
    pub gps_required: bool,
    #[serde(default)]
    pub allowed_radius_meters: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default)]
    pub offline_allowed: bool,
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            gps_required: false,
            allowed_radius_meters: 0.0,
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            offline_allowed: false,
        }
    }
}

/// One configuration version of a physical checkpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    pub id: String,
    pub factory_id: String,
    pub route_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Location,
    pub sequence_order: u32,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub patrol_logic: PatrolLogic,
    #[serde(default)]
    pub validation: ValidationRules,
    #[serde(default)]
    pub status: PointStatus,
}

fn default_required() -> bool {
    true
}

impl ScanPoint {
    pub fn is_active(&self) -> bool {
        self.status == PointStatus::Active
    }

    /// Re-scan bound: the stricter of `minimum_gap_secs` and `cooldown_secs`.
    pub fn effective_gap_secs(&self) -> u64 {
        self.patrol_logic
            .minimum_gap_secs
            .max(self.validation.cooldown_secs)
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        self.location.coordinates
    }
}

/// One entry of a point's append-only configuration history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanPointVersion {
    /// 1-based, dense per point.
    pub version: u32,
    pub effective_from: DateTime<Utc>,
    pub point: ScanPoint,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_payload_gets_defaults() {
        let p: ScanPoint = serde_json::from_str(
            r#"{"id":"P1","factory_id":"F1","route_id":"R1","sequence_order":1}"#,
        )
        .unwrap();
        assert!(p.required);
        assert!(p.is_active());
        assert_eq!(p.validation.cooldown_secs, DEFAULT_COOLDOWN_SECS);
        assert_eq!(p.patrol_logic.expected_window, TimeWindow::all_day());
        assert_eq!(p.effective_gap_secs(), DEFAULT_COOLDOWN_SECS);
        assert!(p.coordinates().is_none());
    }

    #[test]
    fn effective_gap_takes_the_stricter_bound() {
        let mut p: ScanPoint = serde_json::from_str(
            r#"{"id":"P1","factory_id":"F1","route_id":"R1","sequence_order":1,
                "patrol_logic":{"minimum_gap_secs":1200},
                "validation":{"cooldown_secs":60}}"#,
        )
        .unwrap();
        assert_eq!(p.effective_gap_secs(), 1200);
        p.patrol_logic.minimum_gap_secs = 10;
        assert_eq!(p.effective_gap_secs(), 60);
    }

    #[test]
    fn status_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&PointStatus::Inactive).unwrap(),
            "\"INACTIVE\""
        );
    }
}
