//! Address resolver — runs the fixed lookup plan against a feature store.
//!
//! Field      Query
//! road       nearest named highway line, no cutoff
//! suburb     nearest place=suburb within the suburb radius
//! city       nearest place=city|town within the city radius
//! county     admin_level 6 boundary containing the point
//! state      admin_level 4 boundary containing the point
//! country    admin_level 2 boundary containing the point
//! cc         ISO3166-1:alpha2 tag of that admin_level 2 boundary
//!
//! Lookups are independent and run concurrently. A miss or a failed query
//! leaves its field empty; an unreachable store fails the whole resolution.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use super::store::{FeatureQuery, FeatureStore, CITY_PLACES, COUNTRY_CODE_TAG, SUBURB_PLACES};
use super::types::{AddressRecord, AdminLevel, Coordinate, GeocodeError, StoreError};

pub const DEFAULT_SUBURB_RADIUS_M: f64 = 1000.0;
pub const DEFAULT_CITY_RADIUS_M: f64 = 3000.0;

/// Search radii for the place lookups, in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvePolicy {
    pub suburb_radius_m: f64,
    pub city_radius_m: f64,
}

impl Default for ResolvePolicy {
    fn default() -> Self {
        Self {
            suburb_radius_m: DEFAULT_SUBURB_RADIUS_M,
            city_radius_m: DEFAULT_CITY_RADIUS_M,
        }
    }
}

/// Stateless resolver; cheap to clone and share between requests.
#[derive(Clone)]
pub struct AddressResolver {
    store: Arc<dyn FeatureStore>,
    policy: ResolvePolicy,
}

impl AddressResolver {
    pub fn new(store: Arc<dyn FeatureStore>) -> Self {
        Self::with_policy(store, ResolvePolicy::default())
    }

    pub fn with_policy(store: Arc<dyn FeatureStore>, policy: ResolvePolicy) -> Self {
        Self { store, policy }
    }

    pub fn store(&self) -> &Arc<dyn FeatureStore> {
        &self.store
    }

    /// Parse raw `lat`/`lon` values and resolve. Nothing is queried if
    /// parsing fails.
    pub async fn resolve_raw(
        &self,
        lat: Option<&str>,
        lon: Option<&str>,
    ) -> Result<AddressRecord, GeocodeError> {
        let coord = Coordinate::parse(lat, lon)?;
        self.resolve(coord).await
    }

    pub async fn resolve(&self, at: Coordinate) -> Result<AddressRecord, GeocodeError> {
        let start = Instant::now();

        let road = FeatureQuery::NearestRoad;
        let suburb = FeatureQuery::NearestPlace {
            classes: SUBURB_PLACES,
            radius_m: self.policy.suburb_radius_m,
        };
        let city = FeatureQuery::NearestPlace {
            classes: CITY_PLACES,
            radius_m: self.policy.city_radius_m,
        };
        let county = FeatureQuery::Boundary { level: AdminLevel::County };
        let state = FeatureQuery::Boundary { level: AdminLevel::State };
        let country = FeatureQuery::Boundary { level: AdminLevel::Country };
        let country_code = FeatureQuery::BoundaryTag {
            level: AdminLevel::Country,
            key: COUNTRY_CODE_TAG,
        };

        let (road, suburb, city, county, state, country, country_code) = tokio::join!(
            self.field("road", &road, at),
            self.field("suburb", &suburb, at),
            self.field("city", &city, at),
            self.field("county", &county, at),
            self.field("state", &state, at),
            self.field("country", &country, at),
            self.field("country_code", &country_code, at),
        );

        let record = AddressRecord {
            road: road?,
            suburb: suburb?,
            city: city?,
            county: county?,
            state: state?,
            country: country?,
            country_code: country_code?,
            ..AddressRecord::at(at)
        };

        info!(
            lat = at.lat,
            lon = at.lon,
            fields = record.populated(),
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Resolved address: {:?}",
            record
        );
        Ok(record)
    }

    /// Run one lookup, absorbing everything except store unavailability.
    async fn field(
        &self,
        field: &'static str,
        query: &FeatureQuery,
        at: Coordinate,
    ) -> Result<Option<String>, GeocodeError> {
        match self.store.lookup(query, at).await {
            Ok(value) => Ok(value),
            Err(e @ StoreError::Unavailable(_)) => {
                error!(field, %at, error = %e, "feature store unreachable");
                Err(GeocodeError::StoreUnavailable(e))
            }
            Err(e @ (StoreError::Query(_) | StoreError::Busy(_))) => {
                warn!(field, %at, error = %e, "lookup failed; leaving field empty");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geocode::memory::{offset_meters, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every lookup matching `fail`, with `error`.
    struct FailingStore {
        inner: MemoryStore,
        fail: fn(&FeatureQuery) -> bool,
        error: StoreError,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeatureStore for FailingStore {
        async fn lookup(
            &self,
            query: &FeatureQuery,
            at: Coordinate,
        ) -> Result<Option<String>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if (self.fail)(query) {
                return Err(self.error.clone());
            }
            self.inner.lookup(query, at).await
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn munich() -> Coordinate {
        Coordinate::new(48.137154, 11.576124)
    }

    fn box_around(c: Coordinate, half_deg: f64) -> Vec<Coordinate> {
        vec![
            Coordinate::new(c.lat - half_deg, c.lon - half_deg),
            Coordinate::new(c.lat - half_deg, c.lon + half_deg),
            Coordinate::new(c.lat + half_deg, c.lon + half_deg),
            Coordinate::new(c.lat + half_deg, c.lon - half_deg),
        ]
    }

    fn populated_store() -> MemoryStore {
        let at = munich();
        MemoryStore::new()
            .with_road(
                "Marienplatz",
                &[offset_meters(at, 12.0, -50.0), offset_meters(at, 12.0, 50.0)],
            )
            .with_place("suburb", "Altstadt", offset_meters(at, 300.0, 0.0))
            .with_place("city", "München", offset_meters(at, -800.0, 400.0))
            .with_boundary(AdminLevel::County, "Oberbayern", &box_around(at, 0.5))
            .with_boundary(AdminLevel::State, "Bavaria", &box_around(at, 2.0))
            .with_tagged_boundary(
                AdminLevel::Country,
                "Germany",
                &box_around(at, 5.0),
                &[(COUNTRY_CODE_TAG, "DE")],
            )
    }

    #[tokio::test]
    async fn test_resolve_all_fields() {
        let resolver = AddressResolver::new(Arc::new(populated_store()));
        let rec = resolver.resolve(munich()).await.unwrap();
        assert_eq!(rec.road.as_deref(), Some("Marienplatz"));
        assert_eq!(rec.suburb.as_deref(), Some("Altstadt"));
        assert_eq!(rec.city.as_deref(), Some("München"));
        assert_eq!(rec.county.as_deref(), Some("Oberbayern"));
        assert_eq!(rec.state.as_deref(), Some("Bavaria"));
        assert_eq!(rec.country.as_deref(), Some("Germany"));
        assert_eq!(rec.country_code.as_deref(), Some("DE"));
        assert_eq!(rec.latitude, 48.137154);
        assert_eq!(rec.longitude, 11.576124);
    }

    #[tokio::test]
    async fn test_nearest_road_regardless_of_insertion_order() {
        let at = Coordinate::new(0.0, 0.0);
        let near = [offset_meters(at, 10.0, -20.0), offset_meters(at, 10.0, 20.0)];
        let far = [offset_meters(at, -50.0, -20.0), offset_meters(at, -50.0, 20.0)];

        for store in [
            MemoryStore::new().with_road("Near", &near).with_road("Far", &far),
            MemoryStore::new().with_road("Far", &far).with_road("Near", &near),
        ] {
            let rec = AddressResolver::new(Arc::new(store)).resolve(at).await.unwrap();
            assert_eq!(rec.road.as_deref(), Some("Near"));
        }
    }

    #[tokio::test]
    async fn test_road_has_no_cutoff() {
        let at = Coordinate::new(0.0, 0.0);
        let store = MemoryStore::new().with_road("Far Away", &[offset_meters(at, 250_000.0, 0.0)]);
        let rec = AddressResolver::new(Arc::new(store)).resolve(at).await.unwrap();
        assert_eq!(rec.road.as_deref(), Some("Far Away"));
    }

    #[tokio::test]
    async fn test_suburb_radius_cutoff() {
        let at = Coordinate::new(0.0, 0.0);
        let beyond = MemoryStore::new().with_place("suburb", "Outer", offset_meters(at, 1500.0, 0.0));
        let rec = AddressResolver::new(Arc::new(beyond)).resolve(at).await.unwrap();
        assert_eq!(rec.suburb, None);

        let within = MemoryStore::new()
            .with_place("suburb", "Outer", offset_meters(at, 1500.0, 0.0))
            .with_place("suburb", "Inner", offset_meters(at, 0.0, 900.0));
        let rec = AddressResolver::new(Arc::new(within)).resolve(at).await.unwrap();
        assert_eq!(rec.suburb.as_deref(), Some("Inner"));
    }

    #[tokio::test]
    async fn test_city_accepts_towns_within_radius() {
        let at = Coordinate::new(10.0, 10.0);
        let store = MemoryStore::new()
            .with_place("village", "Hamlet", offset_meters(at, 100.0, 0.0))
            .with_place("city", "Distant City", offset_meters(at, 3500.0, 0.0))
            .with_place("town", "Market Town", offset_meters(at, 2900.0, 0.0));
        let rec = AddressResolver::new(Arc::new(store)).resolve(at).await.unwrap();
        assert_eq!(rec.city.as_deref(), Some("Market Town"));
        assert_eq!(rec.suburb, None);
    }

    #[tokio::test]
    async fn test_custom_policy_radius() {
        let at = Coordinate::new(0.0, 0.0);
        let store = MemoryStore::new().with_place("suburb", "Edge", offset_meters(at, 1500.0, 0.0));
        let policy = ResolvePolicy { suburb_radius_m: 2000.0, ..Default::default() };
        let rec = AddressResolver::with_policy(Arc::new(store), policy)
            .resolve(at)
            .await
            .unwrap();
        assert_eq!(rec.suburb.as_deref(), Some("Edge"));
    }

    #[tokio::test]
    async fn test_country_code_absent_without_tag() {
        let at = munich();
        let store = MemoryStore::new().with_boundary(AdminLevel::Country, "Germany", &box_around(at, 5.0));
        let rec = AddressResolver::new(Arc::new(store)).resolve(at).await.unwrap();
        assert_eq!(rec.country.as_deref(), Some("Germany"));
        assert_eq!(rec.country_code, None);
    }

    #[tokio::test]
    async fn test_open_ocean_is_empty() {
        let at = Coordinate::new(-30.0, -140.0);
        let rec = AddressResolver::new(Arc::new(MemoryStore::new())).resolve(at).await.unwrap();
        assert_eq!(rec, AddressRecord::at(at));
        assert_eq!(rec.populated(), 0);
    }

    #[tokio::test]
    async fn test_invalid_input_issues_no_queries() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail: |_| false,
            error: StoreError::Query(String::new()),
            calls: AtomicUsize::new(0),
        });
        let resolver = AddressResolver::new(store.clone());

        let err = resolver.resolve_raw(Some("north"), Some("11.5")).await.unwrap_err();
        assert!(matches!(err, GeocodeError::InvalidInput(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);

        resolver.resolve_raw(Some("1"), Some("2")).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn test_query_fault_is_absorbed() {
        let store = FailingStore {
            inner: populated_store(),
            fail: |q| matches!(q, FeatureQuery::Boundary { level: AdminLevel::State }),
            error: StoreError::Query("column \"admin_level\" does not exist".into()),
            calls: AtomicUsize::new(0),
        };
        let rec = AddressResolver::new(Arc::new(store)).resolve(munich()).await.unwrap();
        assert_eq!(rec.state, None);
        assert_eq!(rec.county.as_deref(), Some("Oberbayern"));
        assert_eq!(rec.country.as_deref(), Some("Germany"));
    }

    #[tokio::test]
    async fn test_busy_store_leaves_fields_empty() {
        let store = FailingStore {
            inner: populated_store(),
            fail: |q| !matches!(q, FeatureQuery::Boundary { .. }),
            error: StoreError::Busy("no pooled connection free".into()),
            calls: AtomicUsize::new(0),
        };
        let rec = AddressResolver::new(Arc::new(store)).resolve(munich()).await.unwrap();
        assert_eq!(rec.road, None);
        assert_eq!(rec.city, None);
        assert_eq!(rec.country_code, None);
        assert_eq!(rec.state.as_deref(), Some("Bavaria"));
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts() {
        let store = FailingStore {
            inner: populated_store(),
            fail: |q| matches!(q, FeatureQuery::NearestRoad),
            error: StoreError::Unavailable("connection refused".into()),
            calls: AtomicUsize::new(0),
        };
        let err = AddressResolver::new(Arc::new(store)).resolve(munich()).await.unwrap_err();
        assert!(matches!(err, GeocodeError::StoreUnavailable(_)));
    }
}
