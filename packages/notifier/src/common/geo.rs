//! Geodesic helpers for subscriber matching and message composition.
//!
//! All functions here are pure; callers decide what to do with missing
//! coordinates.

use lazy_static::lazy_static;
use regex::Regex;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coords {
    pub lat: f64,
    pub lon: f64,
}

impl Coords {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// Calculate distance between two coordinates in kilometers
///
/// Uses Haversine formula for accuracy on Earth's surface
pub fn distance_km(a: Coords, b: Coords) -> f64 {
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (dlng / 2.0).sin().powi(2);

    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}

/// Compass octant labels, clockwise from north.
const OCTANTS: [&str; 8] = [
    "север",
    "северо-восток",
    "восток",
    "юго-восток",
    "юг",
    "юго-запад",
    "запад",
    "северо-запад",
];

/// Initial bearing from `from` to `to`, in degrees [0, 360).
pub fn bearing_deg(from: Coords, to: Coords) -> f64 {
    let lat1 = from.lat.to_radians();
    let lat2 = to.lat.to_radians();
    let dlon = (to.lon - from.lon).to_radians();

    let y = dlon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Quantize a bearing into one of 8 compass octant names.
pub fn bearing_octant(from: Coords, to: Coords) -> &'static str {
    let bearing = bearing_deg(from, to);
    // 45°-wide sectors centered on the octant headings
    let idx = (((bearing + 22.5) / 45.0).floor() as usize) % 8;
    OCTANTS[idx]
}

/// Distance plus direction from a subscriber's home to a point of interest.
pub fn distance_and_direction(from: Coords, to: Coords) -> (f64, &'static str) {
    (distance_km(from, to), bearing_octant(from, to))
}

/// Human phrasing for a distance: kilometers, or meters when below 1 km.
/// Rounds to meters first so 999.6 m reads "1 км", not "1000 м".
pub fn distance_phrase(km: f64) -> String {
    let meters = (km * 1000.0).round() as i64;
    if meters < 1000 {
        format!("{} м", meters)
    } else {
        format!("{} км", (meters as f64 / 1000.0).round() as i64)
    }
}

lazy_static! {
    // "56.1234, 60.5678" and similar pairs with 3+ decimal places;
    // forum posts separate the pair with commas, semicolons or spaces.
    static ref COORDS_RE: Regex =
        Regex::new(r"(-?\d{1,3}\.\d{3,8})[,;\s]{1,5}(-?\d{1,3}\.\d{3,8})").unwrap();
}

/// Extract the first plausible coordinate pair from free text.
///
/// Returns `None` when no pair parses or the values are outside the valid
/// latitude/longitude ranges.
pub fn extract_coords(text: &str) -> Option<Coords> {
    for caps in COORDS_RE.captures_iter(text) {
        let lat: f64 = match caps[1].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        let lon: f64 = match caps[2].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) {
            return Some(Coords::new(lat, lon));
        }
    }
    None
}

/// True if the text contains at least one coordinate-looking pair.
pub fn contains_coords(text: &str) -> bool {
    extract_coords(text).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_zero_for_identical_points() {
        let p = Coords::new(56.83, 60.6);
        assert!(distance_km(p, p) < 1e-9);
    }

    #[test]
    fn test_distance_symmetric() {
        let a = Coords::new(56.83, 60.6);
        let b = Coords::new(55.75, 37.62);
        let d1 = distance_km(a, b);
        let d2 = distance_km(b, a);
        assert!((d1 - d2).abs() < 1e-9);
    }

    #[test]
    fn test_distance_one_degree_of_latitude() {
        // One degree along a meridian is ~111.2 km
        let a = Coords::new(55.0, 37.0);
        let b = Coords::new(56.0, 37.0);
        let d = distance_km(a, b);
        assert!(d > 110.5 && d < 111.7, "got {}", d);
    }

    #[test]
    fn test_bearing_due_north() {
        let from = Coords::new(55.0, 37.0);
        let to = Coords::new(56.0, 37.0);
        assert_eq!(bearing_octant(from, to), "север");

        // small longitude noise stays within the north octant
        let to_noisy = Coords::new(56.0, 37.05);
        assert_eq!(bearing_octant(from, to_noisy), "север");
    }

    #[test]
    fn test_bearing_octants_cover_compass() {
        let from = Coords::new(0.0, 0.0);
        let cases = [
            (Coords::new(1.0, 0.0), "север"),
            (Coords::new(1.0, 1.0), "северо-восток"),
            (Coords::new(0.0, 1.0), "восток"),
            (Coords::new(-1.0, 1.0), "юго-восток"),
            (Coords::new(-1.0, 0.0), "юг"),
            (Coords::new(-1.0, -1.0), "юго-запад"),
            (Coords::new(0.0, -1.0), "запад"),
            (Coords::new(1.0, -1.0), "северо-запад"),
        ];
        for (to, expected) in cases {
            assert_eq!(bearing_octant(from, to), expected);
        }
    }

    #[test]
    fn test_distance_phrase_units() {
        assert_eq!(distance_phrase(0.4), "400 м");
        assert_eq!(distance_phrase(12.3), "12 км");
        assert_eq!(distance_phrase(0.999), "999 м");
        // just under a kilometer rounds up to the km unit
        assert_eq!(distance_phrase(0.9996), "1 км");
        assert_eq!(distance_phrase(1.0), "1 км");
    }

    #[test]
    fn test_extract_coords() {
        let text = "Штаб: 56.8431, 60.6454 (парковка у магазина)";
        let c = extract_coords(text).unwrap();
        assert!((c.lat - 56.8431).abs() < 1e-9);
        assert!((c.lon - 60.6454).abs() < 1e-9);
    }

    #[test]
    fn test_extract_coords_rejects_out_of_range() {
        assert!(extract_coords("123.4567, 250.123").is_none());
        assert!(extract_coords("no coordinates here").is_none());
    }
}
