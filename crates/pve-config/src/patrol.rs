//! Typed view over the merged config document.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;
use pve_schemas::{ShiftDef, TimeOfDay};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// IANA zone name; every window and shift is local to it.
    pub timezone: String,
    /// Delay after a shift ends before the sweep may close its round.
    pub grace_margin_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".to_string(),
            grace_margin_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based).
    pub fn delay_ms(&self, retry: u32) -> u64 {
        let shift = retry.saturating_sub(1).min(16);
        self.base_delay_ms.saturating_mul(1u64 << shift)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_future_skew_secs: u64,
    pub storage_retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_future_skew_secs: 300,
            storage_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub max_rounds_per_run: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            max_rounds_per_run: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteSchedule {
    /// Replaces the default shift table for this route when present.
    pub shifts: Option<Vec<ShiftDef>>,
    /// Guard accountable for every round of the route.
    pub assigned_guard: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub default_shifts: Vec<ShiftDef>,
    pub routes: BTreeMap<String, RouteSchedule>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            default_shifts: default_shift_table(),
            routes: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Name of the env var holding the connection string (never the value).
    pub url_env: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "PVE_DATABASE_URL".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    pub engine: EngineConfig,
    pub ingest: IngestConfig,
    pub sweep: SweepConfig,
    pub schedule: ScheduleConfig,
    pub database: DatabaseConfig,
}

impl PatrolConfig {
    /// Deserialize and validate. Unknown keys are ignored here; the unused-key
    /// report is where they surface.
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let cfg: PatrolConfig = serde_json::from_value(config_json.clone())
            .context("config does not match the patrol config shape")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.timezone()?;
        validate_shifts("schedule.default_shifts", &self.schedule.default_shifts)?;
        for (route, sched) in &self.schedule.routes {
            if let Some(shifts) = &sched.shifts {
                validate_shifts(&format!("schedule.routes.{route}.shifts"), shifts)?;
            }
            if matches!(&sched.assigned_guard, Some(g) if g.trim().is_empty()) {
                bail!("CONFIG_INVALID schedule.routes.{route}.assigned_guard is blank");
            }
        }
        if self.ingest.storage_retry.max_attempts == 0 {
            bail!("CONFIG_INVALID ingest.storage_retry.max_attempts must be >= 1");
        }
        if self.sweep.interval_secs == 0 {
            bail!("CONFIG_INVALID sweep.interval_secs must be >= 1");
        }
        if self.sweep.max_rounds_per_run == 0 {
            bail!("CONFIG_INVALID sweep.max_rounds_per_run must be >= 1");
        }
        if self.database.url_env.trim().is_empty() {
            bail!("CONFIG_INVALID database.url_env is blank");
        }
        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        Tz::from_str(self.engine.timezone.trim())
            .map_err(|_| anyhow::anyhow!("CONFIG_INVALID unknown time zone '{}'", self.engine.timezone))
    }

    /// Route override when configured, else the default table.
    pub fn shifts_for_route(&self, route_id: &str) -> &[ShiftDef] {
        self.schedule
            .routes
            .get(route_id)
            .and_then(|r| r.shifts.as_deref())
            .unwrap_or(&self.schedule.default_shifts)
    }

    pub fn assigned_guard(&self, route_id: &str) -> Option<&str> {
        self.schedule
            .routes
            .get(route_id)
            .and_then(|r| r.assigned_guard.as_deref())
    }
}

fn validate_shifts(path: &str, shifts: &[ShiftDef]) -> Result<()> {
    if shifts.is_empty() {
        bail!("CONFIG_INVALID {path} must list at least one shift");
    }
    let mut seen = BTreeSet::new();
    for s in shifts {
        if !seen.insert(s.index) {
            bail!("CONFIG_INVALID {path} repeats shift index {}", s.index);
        }
    }
    Ok(())
}

/// The 35 daily round slots (09:00 to 09:00 next morning): hourly through the
/// day, half-hourly overnight.
pub fn default_shift_table() -> Vec<ShiftDef> {
    const SLOTS: &[(u32, (u32, u32), (u32, u32))] = &[
        (1, (9, 0), (10, 0)),
        (2, (10, 0), (11, 0)),
        (3, (11, 0), (12, 0)),
        (4, (12, 0), (13, 0)),
        (5, (13, 0), (14, 0)),
        (6, (14, 0), (15, 0)),
        (7, (15, 0), (16, 0)),
        (8, (16, 0), (17, 0)),
        (9, (17, 0), (19, 0)),
        (10, (19, 0), (19, 30)),
        (11, (19, 30), (20, 0)),
        (12, (20, 0), (20, 30)),
        (13, (20, 30), (21, 0)),
        (14, (21, 0), (21, 30)),
        (15, (21, 30), (22, 0)),
        (16, (22, 0), (22, 30)),
        (17, (22, 30), (23, 0)),
        (18, (23, 0), (23, 30)),
        (19, (23, 30), (0, 0)),
        (20, (0, 0), (0, 30)),
        (21, (0, 30), (1, 0)),
        (22, (1, 0), (1, 30)),
        (23, (1, 30), (2, 0)),
        (24, (2, 0), (2, 30)),
        (25, (2, 30), (3, 0)),
        (26, (3, 0), (3, 30)),
        (27, (3, 30), (4, 0)),
        (28, (4, 0), (4, 30)),
        (29, (4, 30), (5, 0)),
        (30, (5, 0), (5, 30)),
        (31, (5, 30), (6, 0)),
        (32, (6, 0), (6, 30)),
        (33, (6, 30), (7, 0)),
        (34, (7, 0), (8, 0)),
        (35, (8, 0), (9, 0)),
    ];
    SLOTS
        .iter()
        .filter_map(|&(index, (sh, sm), (eh, em))| {
            Some(ShiftDef::new(
                index,
                TimeOfDay::from_hms(sh, sm, 0)?,
                TimeOfDay::from_hms(eh, em, 0)?,
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_covers_the_whole_day_once() {
        let table = default_shift_table();
        assert_eq!(table.len(), 35);
        let covered: u32 = table.iter().map(ShiftDef::duration_secs).sum();
        assert_eq!(covered, pve_schemas::SECS_PER_DAY);
        // Every minute of the day falls in exactly one slot.
        for minute in 0..(24 * 60) {
            let t = TimeOfDay::from_secs(minute * 60).unwrap();
            assert_eq!(table.iter().filter(|s| s.contains(t)).count(), 1, "minute {minute}");
        }
    }

    #[test]
    fn retry_backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 4,
            base_delay_ms: 50,
        };
        assert_eq!(p.delay_ms(1), 50);
        assert_eq!(p.delay_ms(2), 100);
        assert_eq!(p.delay_ms(3), 200);
    }

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = PatrolConfig::from_config_json(&serde_json::json!({})).unwrap();
        assert_eq!(cfg, PatrolConfig::default());
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::Asia::Kolkata);
    }
}
