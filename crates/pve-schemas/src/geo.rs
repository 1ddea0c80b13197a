use serde::{Deserialize, Serialize};

/// Mean earth radius (IUGG), meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// A WGS-84 latitude/longitude pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite, `|lat| <= 90`, `|lon| <= 180`.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }

    /// Great-circle (haversine) distance in meters.
    pub fn distance_meters(&self, other: &GeoPoint) -> f64 {
        let (phi1, phi2) = (self.lat.to_radians(), other.lat.to_radians());
        let dphi = (other.lat - self.lat).to_radians();
        let dlambda = (other.lon - self.lon).to_radians();

        let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_METERS * c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_distance_to_self() {
        let p = GeoPoint::new(12.97, 77.59);
        assert!(p.distance_meters(&p).abs() < 1e-9);
    }

    #[test]
    fn small_offsets_at_equator() {
        let origin = GeoPoint::new(0.0, 0.0);
        // One degree of latitude is ~111.2 km on the mean sphere.
        let north = GeoPoint::new(1.0, 0.0);
        let d = origin.distance_meters(&north);
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");

        // ~200 m north.
        let near = GeoPoint::new(200.0 / 111_195.0, 0.0);
        let d = origin.distance_meters(&near);
        assert!((d - 200.0).abs() < 0.5, "got {d}");
    }

    #[test]
    fn validity() {
        assert!(GeoPoint::new(90.0, -180.0).is_valid());
        assert!(!GeoPoint::new(90.1, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, 181.0).is_valid());
        assert!(!GeoPoint::new(f64::NAN, 0.0).is_valid());
        assert!(!GeoPoint::new(0.0, f64::INFINITY).is_valid());
    }
}
