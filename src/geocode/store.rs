//! The feature store capability the resolver queries.

use async_trait::async_trait;

use super::types::{AdminLevel, Coordinate, StoreError};

/// Tag key holding the two-letter country code on admin level 2 boundaries.
pub const COUNTRY_CODE_TAG: &str = "ISO3166-1:alpha2";

/// `place` values that count as a suburb.
pub const SUBURB_PLACES: &[&str] = &["suburb"];

/// `place` values that count as a city.
pub const CITY_PLACES: &[&str] = &["city", "town"];

/// One spatial lookup, relative to a query point.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureQuery {
    /// Nearest named line carrying a `highway` tag. No distance cutoff.
    NearestRoad,
    /// Nearest named point whose `place` is one of `classes`, within
    /// `radius_m` meters.
    NearestPlace {
        classes: &'static [&'static str],
        radius_m: f64,
    },
    /// Name of the administrative boundary at `level` containing the point.
    Boundary { level: AdminLevel },
    /// Tag `key` of the boundary that `Boundary { level }` would select.
    BoundaryTag {
        level: AdminLevel,
        key: &'static str,
    },
}

/// Read-only access to tagged OSM geometries.
///
/// `Ok(None)` means nothing matched. Implementations return
/// `StoreError::Unavailable` only when the store itself cannot be reached.
#[async_trait]
pub trait FeatureStore: Send + Sync {
    async fn lookup(
        &self,
        query: &FeatureQuery,
        at: Coordinate,
    ) -> Result<Option<String>, StoreError>;

    /// Cheap connectivity check.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Treat empty strings as no match.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}
