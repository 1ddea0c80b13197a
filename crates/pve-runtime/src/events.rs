use pve_schemas::{RoundId, ScanOutcome};
use serde::{Deserialize, Serialize};

/// Published after every committed state change. Subscribers that fall
/// behind lose messages; nothing here is needed for correctness.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    Outcome {
        outcome: ScanOutcome,
    },
    RoundsClosed {
        factory_id: String,
        round_ids: Vec<RoundId>,
        missed: usize,
    },
    Log {
        level: String,
        msg: String,
    },
}
