use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{NaiveDate, NaiveDateTime, SecondsFormat, Timelike};
use dashmap::DashMap;
use pve_schemas::{Classification, ScanOutcome};

use crate::types::{
    AnalyticsOverview, DashboardChartsResponse, GuardChartData, GuardPerformanceResponse,
    GuardScan, MissedScansResponse, PatrolReportItem, PatrolReportResponse, ReportStatus,
    ScanActivity,
};
use crate::view::{DateRange, PatrolView};

// ---------------------------------------------------------------------------
// Cache plumbing
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum CacheKey {
    Overview(NaiveDate),
    ScansByGuard(DateRange),
    MissedScans(String, NaiveDate),
    GuardPerformance(NaiveDate),
    DashboardCharts(Option<String>, NaiveDate),
    PatrolReport(String, NaiveDate),
}

#[derive(Clone, Debug)]
enum Cached {
    Overview(AnalyticsOverview),
    ScansByGuard(Vec<GuardScan>),
    MissedScans(MissedScansResponse),
    GuardPerformance(GuardPerformanceResponse),
    DashboardCharts(DashboardChartsResponse),
    PatrolReport(PatrolReportResponse),
}

trait Cacheable: Clone + Sized {
    fn wrap(self) -> Cached;
    fn unwrap_ref(c: &Cached) -> Option<&Self>;
}

macro_rules! cacheable {
    ($ty:ty, $variant:ident) => {
        impl Cacheable for $ty {
            fn wrap(self) -> Cached {
                Cached::$variant(self)
            }

            fn unwrap_ref(c: &Cached) -> Option<&Self> {
                match c {
                    Cached::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

cacheable!(AnalyticsOverview, Overview);
cacheable!(Vec<GuardScan>, ScansByGuard);
cacheable!(MissedScansResponse, MissedScans);
cacheable!(GuardPerformanceResponse, GuardPerformance);
cacheable!(DashboardChartsResponse, DashboardCharts);
cacheable!(PatrolReportResponse, PatrolReport);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Upper bound on cached projections; a full cache is cleared before insert.
pub const MAX_CACHE_ENTRIES: usize = 512;

/// Cached read-side projections.
///
/// An entry is reused only while the view reports the generation it was
/// computed at. Entries from older generations are dropped as soon as a newer
/// generation is seen.
#[derive(Debug, Default)]
pub struct QueryFacade {
    cache: DashMap<CacheKey, (u64, Cached)>,
    newest: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryFacade {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    fn cached<T, V, F>(&self, view: &V, key: CacheKey, compute: F) -> T
    where
        T: Cacheable,
        V: PatrolView + ?Sized,
        F: FnOnce(&V) -> T,
    {
        let generation = view.generation();
        if let Some(entry) = self.cache.get(&key) {
            let (at, value) = entry.value();
            if *at == generation {
                if let Some(v) = T::unwrap_ref(value) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return v.clone();
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute(view);
        if self.newest.fetch_max(generation, Ordering::AcqRel) < generation {
            self.cache.retain(|_, (at, _)| *at >= generation);
        }
        if self.cache.len() >= MAX_CACHE_ENTRIES && !self.cache.contains_key(&key) {
            self.cache.clear();
        }
        self.cache.insert(key, (generation, value.clone().wrap()));
        value
    }

    pub fn overview<V: PatrolView + ?Sized>(&self, view: &V, date: NaiveDate) -> AnalyticsOverview {
        self.cached(view, CacheKey::Overview(date), |v| overview(v, date))
    }

    pub fn scans_by_guard<V: PatrolView + ?Sized>(
        &self,
        view: &V,
        range: Option<DateRange>,
    ) -> Vec<GuardScan> {
        let range = range.unwrap_or_else(DateRange::all);
        self.cached(view, CacheKey::ScansByGuard(range), |v| scans_by_guard(v, range))
    }

    pub fn missed_scans<V: PatrolView + ?Sized>(
        &self,
        view: &V,
        factory_id: &str,
        date: NaiveDate,
    ) -> MissedScansResponse {
        self.cached(
            view,
            CacheKey::MissedScans(factory_id.to_string(), date),
            |v| missed_scans(v, factory_id, date),
        )
    }

    pub fn guard_performance<V: PatrolView + ?Sized>(
        &self,
        view: &V,
        date: NaiveDate,
    ) -> GuardPerformanceResponse {
        self.cached(view, CacheKey::GuardPerformance(date), |v| GuardPerformanceResponse {
            target_date: date,
            metrics: v.metrics(None, DateRange::day(date)),
        })
    }

    pub fn dashboard_charts<V: PatrolView + ?Sized>(
        &self,
        view: &V,
        factory_id: Option<&str>,
        date: NaiveDate,
    ) -> DashboardChartsResponse {
        self.cached(
            view,
            CacheKey::DashboardCharts(factory_id.map(str::to_string), date),
            |v| dashboard_charts(v, factory_id, date),
        )
    }

    pub fn patrol_report<V: PatrolView + ?Sized>(
        &self,
        view: &V,
        factory_id: &str,
        date: NaiveDate,
    ) -> PatrolReportResponse {
        self.cached(
            view,
            CacheKey::PatrolReport(factory_id.to_string(), date),
            |v| patrol_report(v, factory_id, date),
        )
    }
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

fn valid_only(outcomes: Vec<ScanOutcome>) -> impl Iterator<Item = ScanOutcome> {
    outcomes.into_iter().filter(ScanOutcome::is_valid)
}

fn overview<V: PatrolView + ?Sized>(view: &V, date: NaiveDate) -> AnalyticsOverview {
    let total_expected_rounds = view
        .rounds(None, date)
        .iter()
        .map(|r| r.expected_points.len() as u64)
        .sum();

    let outcomes = view.outcomes(DateRange::day(date));
    let active: BTreeSet<String> = outcomes
        .iter()
        .filter(|o| o.is_valid())
        .filter_map(|o| o.guard_id.clone())
        .collect();
    let missed_scans = outcomes
        .iter()
        .filter(|o| o.classification == Classification::Missed)
        .count() as u64;
    let inactive = view
        .known_guards()
        .iter()
        .filter(|g| !active.contains(*g))
        .count() as u64;

    AnalyticsOverview {
        date,
        total_expected_rounds,
        active_guards: active.len() as u64,
        inactive_guards: inactive,
        missed_scans,
    }
}

fn count_by_guard(outcomes: impl Iterator<Item = ScanOutcome>) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for o in outcomes {
        if let Some(g) = o.guard_id {
            *counts.entry(g).or_insert(0) += 1;
        }
    }
    counts
}

fn scans_by_guard<V: PatrolView + ?Sized>(view: &V, range: DateRange) -> Vec<GuardScan> {
    count_by_guard(valid_only(view.outcomes(range)))
        .into_iter()
        .map(|(guard_name, scan_count)| GuardScan {
            guard_name,
            scan_count,
        })
        .collect()
}

fn missed_scans<V: PatrolView + ?Sized>(
    view: &V,
    factory_id: &str,
    date: NaiveDate,
) -> MissedScansResponse {
    let missed: Vec<ScanOutcome> = view
        .outcomes(DateRange::day(date))
        .into_iter()
        .filter(|o| o.factory_id == factory_id && o.classification == Classification::Missed)
        .collect();
    let points: BTreeSet<String> = missed.iter().map(|o| o.scan_point_id.clone()).collect();
    MissedScansResponse {
        factory_code: factory_id.to_string(),
        missed_scan_count: missed.len() as u64,
        missed_scan_points: points.into_iter().collect(),
    }
}

fn dashboard_charts<V: PatrolView + ?Sized>(
    view: &V,
    factory_id: Option<&str>,
    date: NaiveDate,
) -> DashboardChartsResponse {
    let tz = view.timezone();
    let valid: Vec<ScanOutcome> = valid_only(view.outcomes(DateRange::day(date)))
        .filter(|o| factory_id.map_or(true, |f| o.factory_id == f))
        .collect();

    // Keyed by the local hour's start so night shifts stay in time order.
    let mut buckets: BTreeMap<NaiveDateTime, u64> = BTreeMap::new();
    for o in &valid {
        let local = o.occurred_at.with_timezone(&tz).naive_local();
        if let Some(hour) = local.date().and_hms_opt(local.hour(), 0, 0) {
            *buckets.entry(hour).or_insert(0) += 1;
        }
    }

    DashboardChartsResponse {
        activity_data: buckets
            .into_iter()
            .map(|(hour, scans)| ScanActivity {
                time: format!("{:02}:00", hour.hour()),
                scans,
            })
            .collect(),
        guard_data: count_by_guard(valid.into_iter())
            .into_iter()
            .map(|(name, scans)| GuardChartData { name, scans })
            .collect(),
    }
}

fn patrol_report<V: PatrolView + ?Sized>(
    view: &V,
    factory_id: &str,
    date: NaiveDate,
) -> PatrolReportResponse {
    let tz = view.timezone();
    let mut rounds = view.rounds(Some(factory_id), date);
    rounds.sort_by(|a, b| {
        a.round_id
            .shift_index
            .cmp(&b.round_id.shift_index)
            .then_with(|| a.round_id.route_id.cmp(&b.round_id.route_id))
    });

    let mut items = Vec::new();
    for round in &rounds {
        for point_id in &round.expected_points {
            let qr_name = view
                .scan_point(point_id, round.starts_at)
                .map(|p| p.name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| point_id.clone());

            let mut item = PatrolReportItem {
                scan_point_id: point_id.clone(),
                qr_name,
                route_id: round.round_id.route_id.clone(),
                round: round.round_id.shift_index,
                scan_time: None,
                lat: None,
                lon: None,
                guard_name: None,
                status: if round.is_closed() {
                    ReportStatus::Missed
                } else {
                    ReportStatus::Pending
                },
            };

            if let Some(outcome) = round
                .valid_points
                .get(point_id)
                .and_then(|id| view.outcome(*id))
            {
                item.status = ReportStatus::Success;
                item.scan_time = Some(
                    outcome
                        .occurred_at
                        .with_timezone(&tz)
                        .to_rfc3339_opts(SecondsFormat::Secs, false),
                );
                item.guard_name = outcome.guard_id.clone();
                let coords = outcome
                    .scan_event_id
                    .and_then(|id| view.event(id))
                    .and_then(|e| e.coordinates);
                if let Some(c) = coords {
                    item.lat = Some(c.lat);
                    item.lon = Some(c.lon);
                }
            }
            items.push(item);
        }
    }

    PatrolReportResponse {
        factory_code: factory_id.to_string(),
        report_date: date,
        items,
    }
}
