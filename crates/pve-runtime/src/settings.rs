use pve_config::{PatrolConfig, RetryPolicy};
use pve_ingest::IngestPolicy;

/// Runtime knobs taken from [`PatrolConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeSettings {
    pub ingest: IngestPolicy,
    pub storage_retry: RetryPolicy,
    pub max_rounds_per_run: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&PatrolConfig::default())
    }
}

impl RuntimeSettings {
    pub fn from_config(cfg: &PatrolConfig) -> Self {
        Self {
            ingest: IngestPolicy {
                max_future_skew_secs: cfg.ingest.max_future_skew_secs,
            },
            storage_retry: cfg.ingest.storage_retry.clone(),
            max_rounds_per_run: cfg.sweep.max_rounds_per_run,
        }
    }
}
