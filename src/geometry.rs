//! GeoJSON multi-polygons for supply areas.
//!
//! Geometries are kept as the GeoJSON object the client sent (stored as JSON
//! text). Validation checks the shape; [`MultiPolygon::area_km2`] gives the
//! spherical area used when a supply area is stored without one.

use crate::schema::FieldErrors;
use serde::{Deserialize, Serialize};

/// WGS84 equatorial radius in metres
const EARTH_RADIUS_M: f64 = 6_378_137.0;

pub type Position = Vec<f64>;
pub type Ring = Vec<Position>;
pub type Polygon = Vec<Ring>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiPolygon {
    #[serde(rename = "type")]
    pub kind: String,
    pub coordinates: Vec<Polygon>,
}

impl MultiPolygon {
    pub const TYPE: &'static str = "MultiPolygon";

    pub fn new(coordinates: Vec<Polygon>) -> Self {
        MultiPolygon {
            kind: Self::TYPE.to_string(),
            coordinates,
        }
    }

    /// Parse a client value, recording problems under `field`
    pub fn from_value(
        value: &serde_json::Value,
        field: &str,
        errors: &mut FieldErrors,
    ) -> Option<Self> {
        let geom: MultiPolygon = match serde_json::from_value(value.clone()) {
            Ok(geom) => geom,
            Err(e) => {
                errors.add(field, format!("Invalid GeoJSON geometry: {e}"));
                return None;
            }
        };

        match geom.validate() {
            Ok(()) => Some(geom),
            Err(message) => {
                errors.add(field, message);
                None
            }
        }
    }

    /// Structural checks: type tag, closed rings of at least four positions,
    /// positions of at least two coordinates within longitude/latitude bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.kind != Self::TYPE {
            return Err(format!(
                "Expected a {} geometry, got \"{}\".",
                Self::TYPE,
                self.kind
            ));
        }
        if self.coordinates.is_empty() {
            return Err("A MultiPolygon needs at least one polygon.".to_string());
        }

        for (p, polygon) in self.coordinates.iter().enumerate() {
            if polygon.is_empty() {
                return Err(format!("Polygon {p} has no rings."));
            }
            for (r, ring) in polygon.iter().enumerate() {
                if ring.len() < 4 {
                    return Err(format!(
                        "Ring {r} of polygon {p} needs at least 4 positions."
                    ));
                }
                for position in ring {
                    check_position(position)
                        .map_err(|e| format!("Ring {r} of polygon {p}: {e}"))?;
                }
                if ring.first().map(|f| &f[..2]) != ring.last().map(|l| &l[..2]) {
                    return Err(format!("Ring {r} of polygon {p} is not closed."));
                }
            }
        }

        Ok(())
    }

    /// Area on the sphere in square kilometres: outer rings minus holes
    pub fn area_km2(&self) -> f64 {
        let square_metres: f64 = self
            .coordinates
            .iter()
            .map(|polygon| {
                let mut rings = polygon.iter();
                let outer = rings.next().map(|r| ring_area(r).abs()).unwrap_or(0.0);
                let holes: f64 = rings.map(|r| ring_area(r).abs()).sum();
                (outer - holes).max(0.0)
            })
            .sum();

        square_metres / 1_000_000.0
    }
}

fn check_position(position: &[f64]) -> Result<(), String> {
    if position.len() < 2 {
        return Err("positions need longitude and latitude.".to_string());
    }
    let (lon, lat) = (position[0], position[1]);
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(format!("longitude {lon} out of range."));
    }
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(format!("latitude {lat} out of range."));
    }
    Ok(())
}

/// Signed area of a closed ring on the sphere, in square metres.
///
/// Chamberlain & Duquette, "Some Algorithms for Polygons on a Sphere" (JPL, 2007).
fn ring_area(ring: &[Position]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }

    let mut total = 0.0;
    for i in 0..n {
        let lower = &ring[i];
        let middle = &ring[(i + 1) % n];
        let upper = &ring[(i + 2) % n];
        total += (upper[0].to_radians() - lower[0].to_radians()) * middle[1].to_radians().sin();
    }

    total * EARTH_RADIUS_M * EARTH_RADIUS_M / 2.0
}
