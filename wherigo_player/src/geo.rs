use wherigo_core::{GeoMath, GeoPoint};

const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// WGS84 positions on a spherical earth.
#[derive(Debug, Default, Clone, Copy)]
pub struct SphericalGeo;

impl GeoMath for SphericalGeo {
    /// Haversine distance and initial great-circle bearing.
    fn vector(&self, from: GeoPoint, to: GeoPoint) -> (f64, f64) {
        let (lat1, lat2) = (from.latitude.to_radians(), to.latitude.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (to.longitude - from.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let distance = 2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt());

        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        let bearing = y.atan2(x).to_degrees().rem_euclid(360.0);
        (distance, bearing)
    }

    /// Ray casting in latitude/longitude space. Zones are small enough for
    /// the planar approximation.
    fn contains(&self, polygon: &[GeoPoint], point: GeoPoint) -> bool {
        if polygon.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut previous = polygon[polygon.len() - 1];
        for &vertex in polygon {
            if (vertex.latitude > point.latitude) != (previous.latitude > point.latitude) {
                let crossing = (previous.longitude - vertex.longitude)
                    * (point.latitude - vertex.latitude)
                    / (previous.latitude - vertex.latitude)
                    + vertex.longitude;
                if point.longitude < crossing {
                    inside = !inside;
                }
            }
            previous = vertex;
        }
        inside
    }

    /// Nearest point on any polygon edge, found on a local equirectangular
    /// projection around `point`.
    fn vector_to_polygon(&self, polygon: &[GeoPoint], point: GeoPoint) -> (f64, f64) {
        let scale = point.latitude.to_radians().cos();
        let project = |p: GeoPoint| {
            (
                (p.longitude - point.longitude) * scale,
                p.latitude - point.latitude,
            )
        };

        let mut nearest: Option<(f64, GeoPoint)> = None;
        for (i, &start) in polygon.iter().enumerate() {
            let end = polygon[(i + 1) % polygon.len()];
            let (ax, ay) = project(start);
            let (bx, by) = project(end);
            let (dx, dy) = (bx - ax, by - ay);
            let length = dx * dx + dy * dy;
            let t = if length > 0.0 {
                (-(ax * dx + ay * dy) / length).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let (x, y) = (ax + t * dx, ay + t * dy);
            let squared = x * x + y * y;
            if nearest.map_or(true, |(best, _)| squared < best) {
                let candidate = GeoPoint {
                    latitude: start.latitude + t * (end.latitude - start.latitude),
                    longitude: start.longitude + t * (end.longitude - start.longitude),
                    altitude: 0.0,
                };
                nearest = Some((squared, candidate));
            }
        }
        match nearest {
            Some((_, target)) => self.vector(point, target),
            None => (f64::INFINITY, 0.0),
        }
    }
}
