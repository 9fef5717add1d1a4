//! In-memory feature store.
//!
//! Applies the same filters and tie-breaks as the PostGIS store. Distances
//! use an equirectangular projection centred on the query point, which is
//! accurate to well under a meter at the radii the resolver uses.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::store::{non_empty, FeatureQuery, FeatureStore};
use super::types::{AdminLevel, Coordinate, StoreError};

const EARTH_RADIUS_M: f64 = 6_371_000.0;

#[derive(Debug, Clone)]
pub struct Road {
    pub osm_id: i64,
    pub name: Option<String>,
    pub highway: Option<String>,
    pub path: Vec<Coordinate>,
}

#[derive(Debug, Clone)]
pub struct Place {
    pub osm_id: i64,
    pub name: Option<String>,
    pub place: String,
    pub at: Coordinate,
}

#[derive(Debug, Clone)]
pub struct Boundary {
    pub osm_id: i64,
    pub name: Option<String>,
    pub admin_level: String,
    pub tags: BTreeMap<String, String>,
    /// Outer ring; closing vertex optional.
    pub ring: Vec<Coordinate>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    roads: Vec<Road>,
    places: Vec<Place>,
    boundaries: Vec<Boundary>,
    next_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    /// Add a named `highway=residential` line.
    pub fn with_road(mut self, name: &str, path: &[Coordinate]) -> Self {
        let osm_id = self.next_id();
        self.roads.push(Road {
            osm_id,
            name: Some(name.to_string()),
            highway: Some("residential".into()),
            path: path.to_vec(),
        });
        self
    }

    /// Add a named point with the given `place` value.
    pub fn with_place(mut self, place: &str, name: &str, at: Coordinate) -> Self {
        let osm_id = self.next_id();
        self.places.push(Place {
            osm_id,
            name: Some(name.to_string()),
            place: place.to_string(),
            at,
        });
        self
    }

    /// Add a named administrative boundary.
    pub fn with_boundary(self, level: AdminLevel, name: &str, ring: &[Coordinate]) -> Self {
        self.with_tagged_boundary(level, name, ring, &[])
    }

    pub fn with_tagged_boundary(
        mut self,
        level: AdminLevel,
        name: &str,
        ring: &[Coordinate],
        tags: &[(&str, &str)],
    ) -> Self {
        let osm_id = self.next_id();
        self.boundaries.push(Boundary {
            osm_id,
            name: Some(name.to_string()),
            admin_level: level.tag().to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ring: ring.to_vec(),
        });
        self
    }

    pub fn add_road(&mut self, road: Road) {
        self.roads.push(road);
    }

    pub fn add_place(&mut self, place: Place) {
        self.places.push(place);
    }

    pub fn add_boundary(&mut self, boundary: Boundary) {
        self.boundaries.push(boundary);
    }

    fn nearest_road(&self, at: Coordinate) -> Option<&Road> {
        self.roads
            .iter()
            .filter(|r| r.name.is_some() && r.highway.is_some() && !r.path.is_empty())
            .map(|r| (distance_to_path(at, &r.path), r))
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then(a.osm_id.cmp(&b.osm_id)))
            .map(|(_, r)| r)
    }

    fn nearest_place(&self, at: Coordinate, classes: &[&str], radius_m: f64) -> Option<&Place> {
        self.places
            .iter()
            .filter(|p| p.name.is_some() && classes.contains(&p.place.as_str()))
            .map(|p| (distance_m(at, p.at), p))
            .filter(|(d, _)| *d <= radius_m)
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then(a.osm_id.cmp(&b.osm_id)))
            .map(|(_, p)| p)
    }

    fn boundary(&self, at: Coordinate, level: AdminLevel) -> Option<&Boundary> {
        self.boundaries
            .iter()
            .filter(|b| b.admin_level == level.tag() && b.name.is_some())
            .filter(|b| ring_contains(&b.ring, at))
            .map(|b| (ring_area(&b.ring), b))
            .min_by(|(aa, a), (ab, b)| ab.total_cmp(aa).then(a.osm_id.cmp(&b.osm_id)))
            .map(|(_, b)| b)
    }
}

#[async_trait]
impl FeatureStore for MemoryStore {
    async fn lookup(
        &self,
        query: &FeatureQuery,
        at: Coordinate,
    ) -> Result<Option<String>, StoreError> {
        let value = match query {
            FeatureQuery::NearestRoad => self.nearest_road(at).and_then(|r| r.name.clone()),
            FeatureQuery::NearestPlace { classes, radius_m } => self
                .nearest_place(at, classes, *radius_m)
                .and_then(|p| p.name.clone()),
            FeatureQuery::Boundary { level } => {
                self.boundary(at, *level).and_then(|b| b.name.clone())
            }
            FeatureQuery::BoundaryTag { level, key } => self
                .boundary(at, *level)
                .and_then(|b| b.tags.get(*key).cloned()),
        };
        Ok(non_empty(value))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// The coordinate `north_m` meters north and `east_m` meters east of `origin`.
pub fn offset_meters(origin: Coordinate, north_m: f64, east_m: f64) -> Coordinate {
    let lat = origin.lat + (north_m / EARTH_RADIUS_M).to_degrees();
    let lon = origin.lon
        + (east_m / (EARTH_RADIUS_M * origin.lat.to_radians().cos())).to_degrees();
    Coordinate::new(lat, lon)
}

/// Planar (x, y) meters of `p` relative to `origin`.
fn project(origin: Coordinate, p: Coordinate) -> (f64, f64) {
    let dlon = (p.lon - origin.lon + 180.0).rem_euclid(360.0) - 180.0;
    let x = dlon.to_radians() * origin.lat.to_radians().cos() * EARTH_RADIUS_M;
    let y = (p.lat - origin.lat).to_radians() * EARTH_RADIUS_M;
    (x, y)
}

fn distance_m(a: Coordinate, b: Coordinate) -> f64 {
    let (x, y) = project(a, b);
    x.hypot(y)
}

fn distance_to_path(at: Coordinate, path: &[Coordinate]) -> f64 {
    if path.len() == 1 {
        return distance_m(at, path[0]);
    }
    path.windows(2)
        .map(|seg| {
            let a = project(at, seg[0]);
            let b = project(at, seg[1]);
            distance_to_segment(a, b)
        })
        .fold(f64::INFINITY, f64::min)
}

/// Distance from the origin to segment `a`-`b`.
fn distance_to_segment(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (-(a.0 * dx + a.1 * dy) / len2).clamp(0.0, 1.0)
    };
    (a.0 + t * dx).hypot(a.1 + t * dy)
}

/// Even-odd ray casting in lon/lat space.
fn ring_contains(ring: &[Coordinate], p: Coordinate) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let (a, b) = (ring[i], ring[j]);
        if (a.lat > p.lat) != (b.lat > p.lat)
            && p.lon < (b.lon - a.lon) * (p.lat - a.lat) / (b.lat - a.lat) + a.lon
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Shoelace area in square degrees; only used for ordering.
fn ring_area(ring: &[Coordinate]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }
    let twice: f64 = (0..n)
        .map(|i| {
            let (a, b) = (ring[i], ring[(i + 1) % n]);
            a.lon * b.lat - b.lon * a.lat
        })
        .sum();
    (twice / 2.0).abs()
}
