//! pve-registry
//!
//! ScanPoint Registry: effective-dated configuration of every checkpoint.
//!
//! Each point keeps an append-only list of versions. Reads at an instant use
//! the version in force at that instant, so later admin edits never
//! reclassify history. Deactivation appends an Inactive version.
//!
//! Deterministic, pure logic. No IO.

mod error;
mod registry;

pub use error::RegistryError;
pub use registry::ScanPointRegistry;
