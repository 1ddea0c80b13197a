//! Command handlers for the pve CLI.
//!
//! Shared helpers live here; replay has its own module.

pub mod replay;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use pve_config::{ConfigMode, LoadedConfig, PatrolConfig, UnusedKeyPolicy};
use pve_registry::ScanPointRegistry;
use pve_schemas::ScanPoint;
use std::fs;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Parse a CLI `--mode` string into a [`ConfigMode`].
pub fn parse_config_mode(mode: &str) -> Result<ConfigMode> {
    match mode.trim().to_uppercase().as_str() {
        "DAEMON" => Ok(ConfigMode::Daemon),
        "REPLAY" => Ok(ConfigMode::Replay),
        other => anyhow::bail!("invalid --mode '{}'. expected one of: DAEMON | REPLAY", other),
    }
}

pub fn parse_instant(flag: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("{flag} must be RFC 3339, got '{raw}'"))
}

/// Layered config, or built-in defaults when no path is given.
pub fn load_config(paths: &[String]) -> Result<(Option<LoadedConfig>, PatrolConfig)> {
    if paths.is_empty() {
        return Ok((None, PatrolConfig::default()));
    }
    let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
    let loaded = pve_config::load_layered_yaml(&path_refs)?;
    let cfg = loaded.patrol()?;
    Ok((Some(loaded), cfg))
}

/// JSON array of scan points. A UTF-8 BOM is tolerated.
pub fn read_points(path: &str) -> Result<Vec<ScanPoint>> {
    let bytes = fs::read(path).with_context(|| format!("read points file failed: {path}"))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    serde_json::from_slice(bytes).with_context(|| format!("points file must be a JSON array of scan points: {path}"))
}

/// Load every point at `effective_from`, stopping at the first problem.
pub fn build_registry(points: Vec<ScanPoint>, effective_from: DateTime<Utc>) -> Result<ScanPointRegistry> {
    let mut registry = ScanPointRegistry::new();
    for p in points {
        let id = p.id.clone();
        registry
            .upsert(p, effective_from)
            .with_context(|| format!("scan point '{id}' rejected"))?;
    }
    Ok(registry)
}

// ---------------------------------------------------------------------------
// config-check
// ---------------------------------------------------------------------------

pub fn config_check(mode: &str, fail_on_unused: bool, paths: &[String]) -> Result<()> {
    let mode = parse_config_mode(mode)?;
    let (loaded, _cfg) = load_config(paths)?;
    let Some(loaded) = loaded else {
        anyhow::bail!("at least one config path is required");
    };
    let policy = if fail_on_unused {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let report = pve_config::report_unused_keys(mode, &loaded.config_json, policy)?;
    println!("config_hash={}", loaded.config_hash);
    println!("mode={}", report.mode);
    println!("unused_keys={}", report.unused_leaf_pointers.len());
    for ptr in &report.unused_leaf_pointers {
        println!("unused={ptr}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// points validate
// ---------------------------------------------------------------------------

pub fn points_validate(path: &str, effective_from: Option<&str>) -> Result<()> {
    let effective_from = match effective_from {
        Some(raw) => parse_instant("--effective-from", raw)?,
        None => Utc::now(),
    };
    let points = read_points(path)?;
    let n = points.len();
    let registry = build_registry(points, effective_from)?;
    let factories = registry.factories();
    let routes: usize = factories.iter().map(|f| registry.routes(f).len()).sum();
    println!(
        "valid=true points={} factories={} routes={}",
        n,
        factories.len(),
        routes
    );
    Ok(())
}
