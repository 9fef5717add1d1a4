//! Core types for the geocoding subsystem.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A WGS84 (SRID 4326) coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Parse raw request values. Both must be present and finite; range is
    /// not checked.
    pub fn parse(lat: Option<&str>, lon: Option<&str>) -> Result<Self, GeocodeError> {
        let lat = parse_degrees("lat", lat)?;
        let lon = parse_degrees("lon", lon)?;
        Ok(Self { lat, lon })
    }
}

fn parse_degrees(param: &str, raw: Option<&str>) -> Result<f64, GeocodeError> {
    let raw = raw.ok_or_else(|| GeocodeError::InvalidInput(format!("missing '{}'", param)))?;
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(GeocodeError::InvalidInput(format!(
            "'{}' is not a finite number: '{}'",
            param, raw
        ))),
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// OSM administrative boundary granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminLevel {
    Country,
    State,
    County,
}

impl AdminLevel {
    /// The `admin_level` tag value as stored by osm2pgsql (a text column).
    pub fn tag(self) -> &'static str {
        match self {
            Self::Country => "2",
            Self::State => "4",
            Self::County => "6",
        }
    }
}

impl fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// The resolved address. Absent fields are omitted from the JSON encoding;
/// the coordinate is always echoed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AddressRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suburb: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

impl AddressRecord {
    /// An empty record echoing the input coordinate.
    pub fn at(coord: Coordinate) -> Self {
        Self {
            latitude: coord.lat,
            longitude: coord.lon,
            ..Default::default()
        }
    }

    /// Number of populated address fields (for logging).
    pub fn populated(&self) -> usize {
        [
            &self.road,
            &self.suburb,
            &self.city,
            &self.county,
            &self.state,
            &self.country,
            &self.country_code,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

/// Feature store failures.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store cannot be reached at all (I/O, TLS, pool closed, or a pool
    /// timeout while the database refuses direct connections).
    #[error("feature store unavailable: {0}")]
    Unavailable(String),
    /// The store is reachable but no pooled connection freed up in time.
    #[error("feature store busy: {0}")]
    Busy(String),
    /// A single query failed (bad SQL, type mismatch, decode error).
    #[error("feature store query failed: {0}")]
    Query(String),
}

/// Address resolution errors.
#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("Invalid lat/lon: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    StoreUnavailable(StoreError),
}
