use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use pve_schemas::{PointStatus, ScanPoint, ScanPointVersion};

use crate::RegistryError;

/// Effective-dated scan point configuration, keyed by point id.
#[derive(Clone, Debug, Default)]
pub struct ScanPointRegistry {
    /// Versions per point, ascending by `effective_from` (ties keep insert order).
    points: BTreeMap<String, Vec<ScanPointVersion>>,
}

fn canonical_cmp(a: &ScanPoint, b: &ScanPoint) -> std::cmp::Ordering {
    a.route_id
        .cmp(&b.route_id)
        .then_with(|| a.sequence_order.cmp(&b.sequence_order))
        .then_with(|| a.id.cmp(&b.id))
}

impl ScanPointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted history without re-validating it.
    ///
    /// Versions may arrive in any order; they are re-sorted per point by
    /// `(effective_from, version)`.
    pub fn from_versions(versions: impl IntoIterator<Item = ScanPointVersion>) -> Self {
        let mut points: BTreeMap<String, Vec<ScanPointVersion>> = BTreeMap::new();
        for v in versions {
            points.entry(v.point.id.clone()).or_default().push(v);
        }
        for history in points.values_mut() {
            history.sort_by(|a, b| {
                a.effective_from
                    .cmp(&b.effective_from)
                    .then_with(|| a.version.cmp(&b.version))
            });
        }
        Self { points }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Latest version of every point of a factory, inactive ones included,
    /// ordered by route, then sequence order, then id.
    pub fn get(&self, factory_id: &str) -> Vec<&ScanPoint> {
        let mut out: Vec<&ScanPoint> = self
            .points
            .values()
            .filter_map(|h| h.last())
            .map(|v| &v.point)
            .filter(|p| p.factory_id == factory_id)
            .collect();
        out.sort_by(|a, b| canonical_cmp(a, b));
        out
    }

    pub fn get_point(&self, id: &str) -> Option<&ScanPoint> {
        self.points.get(id)?.last().map(|v| &v.point)
    }

    /// Version in force at `at`; `None` before the first version.
    pub fn resolve_at(&self, id: &str, at: DateTime<Utc>) -> Option<&ScanPoint> {
        self.points
            .get(id)?
            .iter()
            .rev()
            .find(|v| v.effective_from <= at)
            .map(|v| &v.point)
    }

    /// Active points of a route in force at `at`, in canonical order.
    pub fn route_points_at(
        &self,
        factory_id: &str,
        route_id: &str,
        at: DateTime<Utc>,
    ) -> Vec<&ScanPoint> {
        let mut out: Vec<&ScanPoint> = self
            .points
            .keys()
            .filter_map(|id| self.resolve_at(id, at))
            .filter(|p| p.factory_id == factory_id && p.route_id == route_id && p.is_active())
            .collect();
        out.sort_by(|a, b| canonical_cmp(a, b));
        out
    }

    pub fn versions(&self, id: &str) -> &[ScanPointVersion] {
        self.points.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every stored version, point by point.
    pub fn all_versions(&self) -> impl Iterator<Item = &ScanPointVersion> {
        self.points.values().flatten()
    }

    /// Factories with at least one point version.
    pub fn factories(&self) -> BTreeSet<String> {
        self.all_versions()
            .map(|v| v.point.factory_id.clone())
            .collect()
    }

    /// Every route that any version of any point of the factory has used.
    pub fn routes(&self, factory_id: &str) -> BTreeSet<String> {
        self.all_versions()
            .filter(|v| v.point.factory_id == factory_id)
            .map(|v| v.point.route_id.clone())
            .collect()
    }

    /// Earliest `effective_from` across a factory's points.
    pub fn first_effective_from(&self, factory_id: &str) -> Option<DateTime<Utc>> {
        self.all_versions()
            .filter(|v| v.point.factory_id == factory_id)
            .map(|v| v.effective_from)
            .min()
    }

    // -----------------------------------------------------------------------
    // Admin mutations
    // -----------------------------------------------------------------------

    /// Check `point` as a new version effective at `effective_from` without
    /// storing it.
    pub fn validate(
        &self,
        point: &ScanPoint,
        effective_from: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        for (field, value) in [
            ("id", &point.id),
            ("factory_id", &point.factory_id),
            ("route_id", &point.route_id),
        ] {
            if value.trim().is_empty() {
                return Err(RegistryError::EmptyId { field });
            }
        }

        let radius = point.validation.allowed_radius_meters;
        if !radius.is_finite() || radius < 0.0 {
            return Err(RegistryError::InvalidRadius { value: radius });
        }

        match point.location.coordinates {
            Some(c) if !c.is_valid() => {
                return Err(RegistryError::CoordinatesOutOfRange {
                    lat: c.lat,
                    lon: c.lon,
                })
            }
            None if point.validation.gps_required => {
                return Err(RegistryError::GpsWithoutCoordinates {
                    id: point.id.clone(),
                })
            }
            _ => {}
        }

        if let Some(latest) = self.points.get(&point.id).and_then(|h| h.last()) {
            if latest.point.factory_id != point.factory_id {
                return Err(RegistryError::FactoryMismatch {
                    id: point.id.clone(),
                    existing: latest.point.factory_id.clone(),
                    got: point.factory_id.clone(),
                });
            }
            if effective_from < latest.effective_from {
                return Err(RegistryError::EffectiveDateRegression {
                    id: point.id.clone(),
                    latest: latest.effective_from,
                    got: effective_from,
                });
            }
        }

        let route_owner = self
            .all_versions()
            .map(|v| &v.point)
            .find(|other| other.route_id == point.route_id && other.factory_id != point.factory_id);
        if let Some(other) = route_owner {
            return Err(RegistryError::RouteFactoryMismatch {
                route_id: point.route_id.clone(),
                existing: other.factory_id.clone(),
                got: point.factory_id.clone(),
            });
        }

        if point.is_active() {
            let collision = self
                .points
                .iter()
                .filter(|(id, _)| id.as_str() != point.id)
                .filter_map(|(_, h)| h.last())
                .map(|v| &v.point)
                .find(|other| {
                    other.is_active()
                        && other.factory_id == point.factory_id
                        && other.route_id == point.route_id
                        && other.sequence_order == point.sequence_order
                });
            if let Some(other) = collision {
                return Err(RegistryError::SequenceCollision {
                    factory_id: point.factory_id.clone(),
                    route_id: point.route_id.clone(),
                    sequence_order: point.sequence_order,
                    existing_id: other.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Append a new version. Returns the stored version.
    pub fn upsert(
        &mut self,
        point: ScanPoint,
        effective_from: DateTime<Utc>,
    ) -> Result<ScanPointVersion, RegistryError> {
        let v = self.prepare_upsert(point, effective_from)?;
        self.apply_version(v.clone());
        Ok(v)
    }

    /// Append an Inactive copy of the latest version.
    pub fn deactivate(
        &mut self,
        id: &str,
        effective_from: DateTime<Utc>,
    ) -> Result<ScanPointVersion, RegistryError> {
        let v = self.prepare_deactivate(id, effective_from)?;
        self.apply_version(v.clone());
        Ok(v)
    }

    /// The version `upsert`/`deactivate` would store, without storing it.
    /// Lets a caller persist first and apply second.
    pub fn prepare_upsert(
        &self,
        point: ScanPoint,
        effective_from: DateTime<Utc>,
    ) -> Result<ScanPointVersion, RegistryError> {
        self.validate(&point, effective_from)?;
        Ok(ScanPointVersion {
            version: self.versions(&point.id).len() as u32 + 1,
            effective_from,
            point,
        })
    }

    pub fn prepare_deactivate(
        &self,
        id: &str,
        effective_from: DateTime<Utc>,
    ) -> Result<ScanPointVersion, RegistryError> {
        let mut point = self
            .get_point(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownScanPoint { id: id.to_string() })?;
        point.status = PointStatus::Inactive;
        self.prepare_upsert(point, effective_from)
    }

    /// Store a version produced by `prepare_*`. Ignores stale versions so a
    /// replayed apply is harmless.
    pub fn apply_version(&mut self, version: ScanPointVersion) -> bool {
        let history = self.points.entry(version.point.id.clone()).or_default();
        if version.version as usize != history.len() + 1 {
            return false;
        }
        history.push(version);
        true
    }
}
