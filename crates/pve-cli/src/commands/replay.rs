//! Offline replay: scan point file + event file through the single-threaded
//! reconciler, without a store.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use pve_aggregate::Aggregator;
use pve_ingest::{IngestPolicy, Ingested, ResponseIndex};
use pve_reconcile::{Reconciler, Schedule};
use pve_runtime::PatrolError;
use pve_schemas::{
    Disposition, IngestResponse, PerformanceMetric, RawScanEvent, ScanOutcome,
};
use serde::Serialize;

use super::{build_registry, load_config, parse_instant, read_points};

pub struct ReplayArgs<'a> {
    pub points_path: &'a str,
    pub events_path: &'a str,
    pub format: Option<&'a str>,
    pub config_paths: &'a [String],
    pub until: Option<&'a str>,
    pub effective_from: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFormat {
    Jsonl,
    Csv,
}

impl EventFormat {
    pub fn resolve(explicit: Option<&str>, path: &str) -> Result<Self> {
        let raw = match explicit {
            Some(f) => f.trim().to_ascii_lowercase(),
            None => Path::new(path)
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or_default()
                .to_ascii_lowercase(),
        };
        match raw.as_str() {
            "jsonl" | "ndjson" | "json" => Ok(EventFormat::Jsonl),
            "csv" => Ok(EventFormat::Csv),
            other => bail!("unsupported event format '{other}' (expected jsonl | csv)"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReplayError {
    pub client_event_id: String,
    pub guard_id: String,
    pub scan_point_id: String,
    pub kind: &'static str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ReplayOutput {
    pub config_hash: Option<String>,
    pub events_read: usize,
    pub accepted: usize,
    pub duplicates: usize,
    pub errors: Vec<ReplayError>,
    pub closed_rounds: Vec<String>,
    pub outcomes: Vec<ScanOutcome>,
    pub performance: Vec<PerformanceMetric>,
}

pub fn read_events(path: &str, format: EventFormat) -> Result<Vec<RawScanEvent>> {
    let file = File::open(path).with_context(|| format!("open events file failed: {path}"))?;
    match format {
        EventFormat::Jsonl => {
            let mut out = Vec::new();
            for (i, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("read {path} failed"))?;
                let line = line.trim_start_matches('\u{feff}').trim();
                if line.is_empty() {
                    continue;
                }
                let ev: RawScanEvent = serde_json::from_str(line)
                    .with_context(|| format!("{path}:{}: not a scan event", i + 1))?;
                out.push(ev);
            }
            Ok(out)
        }
        EventFormat::Csv => {
            let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
            let mut out = Vec::new();
            for (i, row) in rdr.deserialize::<RawScanEvent>().enumerate() {
                // +2: header row and 1-based lines.
                out.push(row.with_context(|| format!("{path}:{}: not a scan event", i + 2))?);
            }
            Ok(out)
        }
    }
}

/// Sort key; payloads with a bad timestamp sort first and fail in ingest.
fn event_instant(raw: &RawScanEvent) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.timestamp.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Local midnight of the earliest event, in the schedule's timezone.
fn default_effective_from(schedule: &Schedule, events: &[RawScanEvent]) -> Result<DateTime<Utc>> {
    let Some(first) = events.iter().filter_map(event_instant).min() else {
        bail!("no event carries a valid timestamp; pass --effective-from");
    };
    let date: NaiveDate = schedule.local_date(first);
    let midnight = date.and_time(NaiveTime::MIN);
    schedule
        .tz()
        .from_local_datetime(&midnight)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .context("local midnight does not exist in the configured timezone")
}

pub fn run(args: ReplayArgs<'_>) -> Result<ReplayOutput> {
    let (loaded, cfg) = load_config(args.config_paths)?;
    let schedule = Schedule::from_config(&cfg)?;
    let policy = IngestPolicy {
        max_future_skew_secs: cfg.ingest.max_future_skew_secs,
    };

    let format = EventFormat::resolve(args.format, args.events_path)?;
    let mut events = read_events(args.events_path, format)?;
    events.sort_by_key(event_instant);

    let effective_from = match args.effective_from {
        Some(raw) => parse_instant("--effective-from", raw)?,
        None => default_effective_from(&schedule, &events)?,
    };
    let registry = build_registry(read_points(args.points_path)?, effective_from)?;
    let mut engine = Reconciler::new(schedule, registry);
    let agg = Aggregator::new();
    let mut responses = ResponseIndex::new();

    let mut out = ReplayOutput {
        config_hash: loaded.map(|l| l.config_hash),
        events_read: events.len(),
        accepted: 0,
        duplicates: 0,
        errors: Vec::new(),
        closed_rounds: Vec::new(),
        outcomes: Vec::new(),
        performance: Vec::new(),
    };

    for raw in &events {
        // Replay judges each event as if it arrived at its own timestamp.
        let now = event_instant(raw).unwrap_or_else(Utc::now);
        let event = match pve_ingest::ingest(engine.registry(), &responses, raw, now, policy) {
            Ok(Ingested::Accepted(ev)) => ev,
            Ok(Ingested::Duplicate(_)) => {
                out.duplicates += 1;
                continue;
            }
            Err(e) => {
                out.errors.push(error_row(raw, PatrolError::from(e)));
                continue;
            }
        };

        let disposition = match engine.process(&event) {
            Ok(outcome) => {
                agg.apply(&outcome);
                out.outcomes.push(outcome.clone());
                out.accepted += 1;
                Disposition::Classified { outcome }
            }
            Err(reason) => {
                out.errors
                    .push(error_row(raw, PatrolError::from_rejection(&reason, &event.scan_point_id)));
                Disposition::Rejected { rejection: reason }
            }
        };
        responses.record(IngestResponse {
            event_id: event.event_id,
            guard_id: event.guard_id,
            client_event_id: event.client_event_id,
            disposition,
        });
    }

    if let Some(raw) = args.until {
        let until = parse_instant("--until", raw)?;
        loop {
            let report = engine.close_expired_rounds(until, cfg.sweep.max_rounds_per_run);
            for m in &report.missed {
                agg.apply(m);
            }
            out.closed_rounds
                .extend(report.closed_rounds.iter().map(ToString::to_string));
            out.outcomes.extend(report.missed);
            if report.truncated_factories.is_empty() {
                break;
            }
        }
    }

    out.outcomes.sort_by(|a, b| {
        a.occurred_at
            .cmp(&b.occurred_at)
            .then_with(|| a.outcome_id.cmp(&b.outcome_id))
    });
    out.performance = agg.query(None, NaiveDate::MIN, NaiveDate::MAX);
    tracing::info!(
        events = out.events_read,
        accepted = out.accepted,
        duplicates = out.duplicates,
        errors = out.errors.len(),
        closed_rounds = out.closed_rounds.len(),
        "replay complete"
    );
    Ok(out)
}

fn error_row(raw: &RawScanEvent, err: PatrolError) -> ReplayError {
    ReplayError {
        client_event_id: raw.client_event_id.clone(),
        guard_id: raw.guard_id.clone(),
        scan_point_id: raw.scan_point_id.clone(),
        kind: err.kind(),
        error: err.to_string(),
    }
}
