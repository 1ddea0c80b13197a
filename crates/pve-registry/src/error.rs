use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    EmptyId {
        field: &'static str,
    },
    /// Another active point of the same factory+route already holds this slot.
    SequenceCollision {
        factory_id: String,
        route_id: String,
        sequence_order: u32,
        existing_id: String,
    },
    InvalidRadius {
        value: f64,
    },
    GpsWithoutCoordinates {
        id: String,
    },
    CoordinatesOutOfRange {
        lat: f64,
        lon: f64,
    },
    /// History is append-only; a version may not be back-dated.
    EffectiveDateRegression {
        id: String,
        latest: DateTime<Utc>,
        got: DateTime<Utc>,
    },
    /// Point ids are global; a point cannot move between factories.
    FactoryMismatch {
        id: String,
        existing: String,
        got: String,
    },
    /// Route ids are global too: rounds, shift overrides and the assigned
    /// guard are keyed by route alone.
    RouteFactoryMismatch {
        route_id: String,
        existing: String,
        got: String,
    },
    UnknownScanPoint {
        id: String,
    },
    /// Rounds up to the factory's sweep watermark are closed; their
    /// configuration can no longer change.
    ClosedPeriod {
        watermark: DateTime<Utc>,
        got: DateTime<Utc>,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::EmptyId { field } => write!(f, "'{field}' must not be empty"),
            RegistryError::SequenceCollision {
                factory_id,
                route_id,
                sequence_order,
                existing_id,
            } => write!(
                f,
                "sequence_order {sequence_order} on route '{route_id}' of factory \
                 '{factory_id}' is already used by active point '{existing_id}'"
            ),
            RegistryError::InvalidRadius { value } => {
                write!(f, "allowed_radius_meters must be finite and >= 0, got {value}")
            }
            RegistryError::GpsWithoutCoordinates { id } => {
                write!(f, "point '{id}' requires GPS but has no coordinates")
            }
            RegistryError::CoordinatesOutOfRange { lat, lon } => {
                write!(f, "coordinates out of range: lat={lat} lon={lon}")
            }
            RegistryError::EffectiveDateRegression { id, latest, got } => write!(
                f,
                "effective_from {} precedes latest version of '{id}' ({})",
                got.to_rfc3339(),
                latest.to_rfc3339()
            ),
            RegistryError::FactoryMismatch { id, existing, got } => write!(
                f,
                "point '{id}' belongs to factory '{existing}', not '{got}'"
            ),
            RegistryError::RouteFactoryMismatch {
                route_id,
                existing,
                got,
            } => write!(
                f,
                "route '{route_id}' belongs to factory '{existing}', not '{got}'"
            ),
            RegistryError::UnknownScanPoint { id } => write!(f, "unknown scan point '{id}'"),
            RegistryError::ClosedPeriod { watermark, got } => write!(
                f,
                "effective_from {} falls before rounds closed up to {}",
                got.to_rfc3339(),
                watermark.to_rfc3339()
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

impl RegistryError {
    /// Stable machine-readable tag for API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::UnknownScanPoint { .. } => "unknown_scan_point",
            RegistryError::SequenceCollision { .. } => "sequence_collision",
            RegistryError::EffectiveDateRegression { .. } => "effective_date_regression",
            RegistryError::ClosedPeriod { .. } => "closed_period",
            _ => "validation",
        }
    }
}
