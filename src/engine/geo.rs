// ==========================================
// 医疗数据导入系统 - 地理距离
// ==========================================
// 公式: haversine，地球半径 6371 km
// ==========================================

use std::collections::HashMap;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

impl From<(f64, f64)> for GeoPoint {
    fn from((lat, lon): (f64, f64)) -> Self {
        Self { lat, lon }
    }
}

/// 两点大圆距离（km）
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lon = (b.lon - a.lon).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// 市质心索引（ibge_code → 坐标）
#[derive(Debug, Clone, Default)]
pub struct MunicipalityIndex {
    coords: HashMap<i64, GeoPoint>,
}

impl MunicipalityIndex {
    pub fn new(coords: HashMap<i64, (f64, f64)>) -> Self {
        Self {
            coords: coords.into_iter().map(|(k, v)| (k, v.into())).collect(),
        }
    }

    pub fn point(&self, municipality_code: i64) -> Option<GeoPoint> {
        self.coords.get(&municipality_code).copied()
    }

    pub fn distance_km(&self, from: i64, to: i64) -> Option<f64> {
        Some(haversine_km(self.point(from)?, self.point(to)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_distance() {
        let p = GeoPoint::new(-23.55, -46.63);
        assert!(haversine_km(p, p).abs() < 1e-9);
    }

    #[test]
    fn test_equator_longitude_offsets() {
        let origin = GeoPoint::new(0.0, 0.0);
        let near = haversine_km(origin, GeoPoint::new(0.0, 0.2689));
        let far = haversine_km(origin, GeoPoint::new(0.0, 0.2707));
        assert!((near - 29.9).abs() < 0.01, "near = {near}");
        assert!((far - 30.1).abs() < 0.01, "far = {far}");
    }

    #[test]
    fn test_sao_paulo_pair() {
        let d = haversine_km(GeoPoint::new(-23.55, -46.63), GeoPoint::new(-23.50, -46.60));
        assert!(d > 6.0 && d < 7.0, "d = {d}");
    }

    #[test]
    fn test_index_missing_municipality() {
        let index = MunicipalityIndex::new(HashMap::from([(1, (0.0, 0.0))]));
        assert!(index.distance_km(1, 2).is_none());
        assert_eq!(index.distance_km(1, 1), Some(0.0));
    }
}
