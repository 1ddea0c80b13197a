//! Shift calendar in the facility time zone.
//!
//! Deterministic, pure logic. No IO, no wall-clock.
//!
//! A shift occurrence belongs to the local date its start falls on. Slots that
//! wrap midnight (`start >= end`) end on the following local date, so an
//! instant at 00:10 may belong to the previous day's occurrence.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use pve_config::PatrolConfig;
use pve_schemas::{RoundId, ShiftDef, TimeOfDay};

// ---------------------------------------------------------------------------
// Occurrence
// ---------------------------------------------------------------------------

/// One concrete instance of a route's shift slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShiftOccurrence {
    pub route_id: String,
    pub shift: ShiftDef,
    pub service_date: NaiveDate,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// `ends_at + grace`; from here on the sweep may close the round.
    pub closes_at: DateTime<Utc>,
}

impl ShiftOccurrence {
    pub fn round_id(&self) -> RoundId {
        RoundId::new(self.route_id.clone(), self.service_date, self.shift.index)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct RoutePlan {
    shifts: Option<Vec<ShiftDef>>,
    assigned_guard: Option<String>,
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// Shift tables per route plus the time zone and grace margin they live in.
#[derive(Clone, Debug, PartialEq)]
pub struct Schedule {
    tz: Tz,
    grace: Duration,
    default_shifts: Vec<ShiftDef>,
    routes: BTreeMap<String, RoutePlan>,
}

impl Schedule {
    pub fn new(tz: Tz, grace_margin_secs: u64, default_shifts: Vec<ShiftDef>) -> Self {
        Self {
            tz,
            grace: Duration::seconds(grace_margin_secs.min(86_400 * 365) as i64),
            default_shifts,
            routes: BTreeMap::new(),
        }
    }

    pub fn from_config(cfg: &PatrolConfig) -> Result<Self> {
        let mut s = Self::new(
            cfg.timezone()?,
            cfg.engine.grace_margin_secs,
            cfg.schedule.default_shifts.clone(),
        );
        for (route, plan) in &cfg.schedule.routes {
            s.routes.insert(
                route.clone(),
                RoutePlan {
                    shifts: plan.shifts.clone(),
                    assigned_guard: plan.assigned_guard.clone(),
                },
            );
        }
        Ok(s)
    }

    pub fn with_route_shifts(mut self, route_id: &str, shifts: Vec<ShiftDef>) -> Self {
        self.routes.entry(route_id.to_string()).or_default().shifts = Some(shifts);
        self
    }

    pub fn with_assigned_guard(mut self, route_id: &str, guard_id: &str) -> Self {
        self.routes.entry(route_id.to_string()).or_default().assigned_guard =
            Some(guard_id.to_string());
        self
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn shifts_for(&self, route_id: &str) -> &[ShiftDef] {
        self.routes
            .get(route_id)
            .and_then(|r| r.shifts.as_deref())
            .unwrap_or(&self.default_shifts)
    }

    pub fn assigned_guard(&self, route_id: &str) -> Option<&str> {
        self.routes
            .get(route_id)
            .and_then(|r| r.assigned_guard.as_deref())
    }

    /// Local calendar date and time of day of `at`.
    pub fn local_parts(&self, at: DateTime<Utc>) -> (NaiveDate, TimeOfDay) {
        let local = at.with_timezone(&self.tz).naive_local();
        (local.date(), TimeOfDay::from_naive(local.time()))
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_parts(at).0
    }

    /// Local wall time to UTC. Ambiguous times take the earlier instant;
    /// times skipped by a DST jump move forward to the first valid instant.
    fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let mut candidate = local;
        for _ in 0..4 {
            if let Some(dt) = self.tz.from_local_datetime(&candidate).earliest() {
                return dt.with_timezone(&Utc);
            }
            candidate += Duration::minutes(30);
        }
        Utc.from_utc_datetime(&local)
    }

    pub fn occurrence(
        &self,
        route_id: &str,
        shift: ShiftDef,
        service_date: NaiveDate,
    ) -> ShiftOccurrence {
        let start_local = service_date.and_time(shift.start.to_naive());
        let end_date = if shift.wraps_midnight() {
            service_date.succ_opt().unwrap_or(service_date)
        } else {
            service_date
        };
        let end_local = end_date.and_time(shift.end.to_naive());
        let starts_at = self.to_utc(start_local);
        let ends_at = self.to_utc(end_local);
        ShiftOccurrence {
            route_id: route_id.to_string(),
            shift,
            service_date,
            starts_at,
            ends_at,
            closes_at: ends_at + self.grace,
        }
    }

    /// The route's shift occurrence enclosing `at`. When slots overlap, the
    /// lowest shift index wins.
    pub fn locate(&self, route_id: &str, at: DateTime<Utc>) -> Option<ShiftOccurrence> {
        let (date, tod) = self.local_parts(at);
        let mut candidates: Vec<&ShiftDef> = self
            .shifts_for(route_id)
            .iter()
            .filter(|s| s.contains(tod))
            .collect();
        candidates.sort_by_key(|s| s.index);
        let shift = *candidates.into_iter().next()?;

        let service_date = if shift.wraps_midnight() && tod < shift.start {
            date.pred_opt()?
        } else {
            date
        };
        Some(self.occurrence(route_id, shift, service_date))
    }

    /// Every occurrence of the route with `after < closes_at <= up_to`,
    /// ordered by `(closes_at, shift index)`.
    pub fn occurrences_closing_between(
        &self,
        route_id: &str,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> Vec<ShiftOccurrence> {
        if up_to <= after {
            return Vec::new();
        }
        // A wrapping slot plus grace can close up to two local days after
        // its service date starts; widen the scan window accordingly.
        let first = self.local_date(after - self.grace) - Duration::days(2);
        let last = self.local_date(up_to);

        let mut out = Vec::new();
        let mut date = first;
        while date <= last {
            for shift in self.shifts_for(route_id) {
                let occ = self.occurrence(route_id, *shift, date);
                if occ.closes_at > after && occ.closes_at <= up_to {
                    out.push(occ);
                }
            }
            match date.succ_opt() {
                Some(d) => date = d,
                None => break,
            }
        }
        out.sort_by(|a, b| {
            a.closes_at
                .cmp(&b.closes_at)
                .then_with(|| a.shift.index.cmp(&b.shift.index))
        });
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pve_config::default_shift_table;

    fn tod(s: &str) -> TimeOfDay {
        TimeOfDay::parse(s).unwrap()
    }

    fn ist() -> Schedule {
        Schedule::new(chrono_tz::Asia::Kolkata, 300, default_shift_table())
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn locate_uses_local_time() {
        // 04:00Z = 09:30 IST -> slot 1 of 2024-03-01.
        let occ = ist().locate("R1", utc(2024, 3, 1, 4, 0)).unwrap();
        assert_eq!(occ.shift.index, 1);
        assert_eq!(occ.service_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(occ.starts_at, utc(2024, 3, 1, 3, 30));
        assert_eq!(occ.ends_at, utc(2024, 3, 1, 4, 30));
        assert_eq!(occ.closes_at, utc(2024, 3, 1, 4, 35));
        assert_eq!(occ.round_id().to_string(), "R1:2024-03-01:1");
    }

    #[test]
    fn wrapping_slot_belongs_to_start_date() {
        let night = ShiftDef::new(7, tod("22:00"), tod("06:00"));
        let s = ist().with_route_shifts("N", vec![night]);
        // 2024-03-02 01:00 IST = 2024-03-01 19:30Z.
        let occ = s.locate("N", utc(2024, 3, 1, 19, 30)).unwrap();
        assert_eq!(occ.service_date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(occ.starts_at, utc(2024, 3, 1, 16, 30));
        assert_eq!(occ.ends_at, utc(2024, 3, 2, 0, 30));
        assert!(s.locate("N", utc(2024, 3, 2, 4, 0)).is_none(), "09:30 IST is outside");
    }

    #[test]
    fn slot_nineteen_ends_at_midnight() {
        // 23:45 IST on 2024-03-01 = 18:15Z.
        let occ = ist().locate("R1", utc(2024, 3, 1, 18, 15)).unwrap();
        assert_eq!(occ.shift.index, 19);
        assert_eq!(occ.ends_at, utc(2024, 3, 1, 18, 30));
        // 00:10 IST on 2024-03-02 is slot 20 of the new date.
        let occ = ist().locate("R1", utc(2024, 3, 1, 18, 40)).unwrap();
        assert_eq!(occ.shift.index, 20);
        assert_eq!(occ.service_date, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
    }

    #[test]
    fn occurrences_closing_between_is_half_open() {
        let s = ist();
        // Slot 1 of 03-01 closes 04:35Z, slot 2 closes 05:35Z.
        let occ = s.occurrences_closing_between("R1", utc(2024, 3, 1, 4, 35), utc(2024, 3, 1, 5, 35));
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].shift.index, 2);

        let day = s.occurrences_closing_between("R1", utc(2024, 3, 1, 3, 0), utc(2024, 3, 2, 3, 0));
        assert_eq!(day.len(), 35);
        assert!(day.windows(2).all(|w| w[0].closes_at <= w[1].closes_at));

        assert!(s
            .occurrences_closing_between("R1", utc(2024, 3, 2, 0, 0), utc(2024, 3, 1, 0, 0))
            .is_empty());
    }

    #[test]
    fn overlapping_slots_lowest_index_wins() {
        let s = ist().with_route_shifts(
            "R",
            vec![
                ShiftDef::new(2, tod("09:00"), tod("12:00")),
                ShiftDef::new(1, tod("10:00"), tod("11:00")),
            ],
        );
        // 10:30 IST.
        assert_eq!(s.locate("R", utc(2024, 3, 1, 5, 0)).unwrap().shift.index, 1);
    }
}
