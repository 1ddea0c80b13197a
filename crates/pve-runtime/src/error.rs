use pve_db::StoreError;
use pve_ingest::IngestError;
use pve_registry::RegistryError;
use pve_schemas::{RejectionReason, RoundId};
use thiserror::Error;

/// Failure taxonomy at the service boundary.
///
/// A retransmitted scan is not an error; it comes back as a successful
/// result flagged `duplicate`.
#[derive(Debug, Error)]
pub enum PatrolError {
    /// Bad input shape. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown scan point '{id}'")]
    UnknownScanPoint { id: String },

    #[error("scan point '{id}' is inactive")]
    InactiveScanPoint { id: String },

    #[error("round {round_id} is already closed")]
    RoundAlreadyClosed { round_id: RoundId },

    /// A configuration change that conflicts with stored state.
    #[error("configuration conflict: {message}")]
    ConfigConflict { kind: &'static str, message: String },

    /// Store still failing after the retry budget.
    #[error("storage failure after {attempts} attempt(s): {source}")]
    StorageFailure {
        attempts: u32,
        #[source]
        source: StoreError,
    },
}

impl PatrolError {
    pub fn kind(&self) -> &'static str {
        match self {
            PatrolError::Validation(_) => "validation",
            PatrolError::UnknownScanPoint { .. } => "unknown_scan_point",
            PatrolError::InactiveScanPoint { .. } => "inactive_scan_point",
            PatrolError::RoundAlreadyClosed { .. } => "round_already_closed",
            PatrolError::ConfigConflict { kind, .. } => kind,
            PatrolError::StorageFailure { .. } => "storage_failure",
        }
    }

    /// Business rejection of an accepted event, as an error value.
    pub fn from_rejection(reason: &RejectionReason, scan_point_id: &str) -> Self {
        match reason {
            RejectionReason::UnknownScanPoint => PatrolError::UnknownScanPoint {
                id: scan_point_id.to_string(),
            },
            RejectionReason::InactiveScanPoint => PatrolError::InactiveScanPoint {
                id: scan_point_id.to_string(),
            },
            RejectionReason::RoundAlreadyClosed { round_id } => PatrolError::RoundAlreadyClosed {
                round_id: round_id.clone(),
            },
        }
    }
}

impl From<IngestError> for PatrolError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::UnknownScanPoint { id } => PatrolError::UnknownScanPoint { id },
            IngestError::Malformed(m) => PatrolError::Validation(m.to_string()),
        }
    }
}

impl From<RegistryError> for PatrolError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownScanPoint { id } => PatrolError::UnknownScanPoint { id },
            other => match other.kind() {
                "validation" => PatrolError::Validation(other.to_string()),
                kind => PatrolError::ConfigConflict {
                    kind,
                    message: other.to_string(),
                },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn rejections_map_to_kinds() {
        let round_id = RoundId::new("R1", NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), 1);
        let cases = [
            (RejectionReason::UnknownScanPoint, "unknown_scan_point"),
            (RejectionReason::InactiveScanPoint, "inactive_scan_point"),
            (
                RejectionReason::RoundAlreadyClosed { round_id },
                "round_already_closed",
            ),
        ];
        for (reason, kind) in cases {
            assert_eq!(PatrolError::from_rejection(&reason, "P1").kind(), kind);
        }
    }

    #[test]
    fn malformed_input_is_a_validation_error() {
        let err: PatrolError = IngestError::Malformed(pve_ingest::MalformedEvent::EmptyField {
            field: "guard_id",
        })
        .into();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("guard_id"));
    }
}
