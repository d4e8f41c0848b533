//! Geographic calculations

use crate::types::Coordinates;

/// Mean Earth radius in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calculate Haversine distance between two points in meters
pub fn haversine_distance(from: &Coordinates, to: &Coordinates) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lon = (to.lng - from.lng).to_radians();

    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c
}

/// Pick the candidate closest to `center` that lies within `radius_meters`.
///
/// Returns the index into `candidates` together with the distance.
pub fn nearest_within(
    center: &Coordinates,
    candidates: &[Coordinates],
    radius_meters: f64,
) -> Option<(usize, f64)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, point)| (i, haversine_distance(center, point)))
        .filter(|(_, distance)| *distance <= radius_meters)
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_bangalore_mysore() {
        let bangalore = Coordinates { lat: 12.9716, lng: 77.5946 };
        let mysore = Coordinates { lat: 12.2958, lng: 76.6394 };

        let distance = haversine_distance(&bangalore, &mysore);

        // Roughly 128 km as the crow flies
        assert!((distance - 128_000.0).abs() < 3_000.0, "got {distance}");
    }

    #[test]
    fn test_haversine_same_point() {
        let point = Coordinates { lat: 50.0, lng: 14.0 };
        let distance = haversine_distance(&point, &point);
        assert!(distance.abs() < 0.001);
    }

    #[test]
    fn test_haversine_is_symmetric() {
        let a = Coordinates { lat: 12.9, lng: 77.6 };
        let b = Coordinates { lat: 12.95, lng: 77.55 };
        assert!((haversine_distance(&a, &b) - haversine_distance(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_within_picks_closest_in_radius() {
        let center = Coordinates { lat: 12.9, lng: 77.6 };
        let candidates = vec![
            Coordinates { lat: 12.93, lng: 77.6 },  // ~3.3 km
            Coordinates { lat: 12.907, lng: 77.6 }, // ~780 m
            Coordinates { lat: 13.5, lng: 77.6 },   // far away
        ];

        let (index, distance) = nearest_within(&center, &candidates, 5_000.0).unwrap();
        assert_eq!(index, 1);
        assert!(distance < 1_000.0);
    }

    #[test]
    fn test_nearest_within_none_outside_radius() {
        let center = Coordinates { lat: 12.9, lng: 77.6 };
        let candidates = vec![Coordinates { lat: 13.5, lng: 77.6 }];
        assert!(nearest_within(&center, &candidates, 5_000.0).is_none());
    }

    #[test]
    fn test_nearest_within_empty_candidates() {
        let center = Coordinates { lat: 0.0, lng: 0.0 };
        assert!(nearest_within(&center, &[], 10_000.0).is_none());
    }
}
