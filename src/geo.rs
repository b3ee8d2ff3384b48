//! Great-circle distance helpers.

use crate::types::Coordinate;

/// Earth's mean radius in kilometers.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Approximate kilometers per degree of latitude.
const KM_PER_DEGREE: f64 = 111.32;

/// Haversine distance between two coordinates in kilometers.
#[inline]
pub fn haversine_km(from: &Coordinate, to: &Coordinate) -> f64 {
    let (lat1, lon1) = (from.latitude.to_radians(), from.longitude.to_radians());
    let (lat2, lon2) = (to.latitude.to_radians(), to.longitude.to_radians());

    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// Lat/lon rectangle that fully contains a circle. Used to prune rows in SQL
/// before the exact distance check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    /// `None` when the circle reaches a pole and every longitude qualifies.
    pub lon_range: Option<(f64, f64)>,
}

impl BoundingBox {
    pub fn around(center: &Coordinate, radius_km: f64) -> Self {
        let d_lat = radius_km / KM_PER_DEGREE;
        let min_lat = (center.latitude - d_lat).max(-90.0);
        let max_lat = (center.latitude + d_lat).min(90.0);

        let cos_lat = center.latitude.to_radians().cos();
        let lon_range = if max_lat >= 90.0 || min_lat <= -90.0 || cos_lat < 1e-6 {
            None
        } else {
            let d_lon = radius_km / (KM_PER_DEGREE * cos_lat);
            if d_lon >= 180.0 {
                None
            } else {
                Some((center.longitude - d_lon, center.longitude + d_lon))
            }
        };
        Self { min_lat, max_lat, lon_range }
    }
}
