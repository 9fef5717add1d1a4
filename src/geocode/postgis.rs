//! PostGIS feature store over an osm2pgsql import.
//!
//! Geometries are reprojected to SRID 4326 and measured as `geography`, so
//! distances and radii are geodesic meters. Every caller-derived value is a
//! bound parameter; the SQL text is constant.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection, PgPool};

use super::store::{non_empty, FeatureQuery, FeatureStore};
use super::types::{Coordinate, StoreError};

// $1 = lon, $2 = lat throughout.

const NEAREST_ROAD_SQL: &str = "
    SELECT name
    FROM planet_osm_line
    WHERE name IS NOT NULL AND highway IS NOT NULL
    ORDER BY ST_Distance(
        ST_Transform(way, 4326)::geography,
        ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography
    ), osm_id
    LIMIT 1
";

// $3 = place classes, $4 = radius in meters
const NEAREST_PLACE_SQL: &str = "
    SELECT name
    FROM planet_osm_point
    WHERE place = ANY($3) AND name IS NOT NULL
      AND ST_DWithin(
        ST_Transform(way, 4326)::geography,
        ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography,
        $4
      )
    ORDER BY ST_Distance(
        ST_Transform(way, 4326)::geography,
        ST_SetSRID(ST_MakePoint($1, $2), 4326)::geography
    ), osm_id
    LIMIT 1
";

// $3 = admin_level. Overlaps resolve to the largest polygon.
const BOUNDARY_SQL: &str = "
    SELECT name
    FROM planet_osm_polygon
    WHERE boundary = 'administrative' AND admin_level = $3 AND name IS NOT NULL
      AND ST_Intersects(ST_Transform(way, 4326), ST_SetSRID(ST_MakePoint($1, $2), 4326))
    ORDER BY ST_Area(way) DESC, osm_id
    LIMIT 1
";

// Same selection as BOUNDARY_SQL; $4 = hstore key.
const BOUNDARY_TAG_SQL: &str = "
    SELECT tags -> $4::text
    FROM planet_osm_polygon
    WHERE boundary = 'administrative' AND admin_level = $3 AND name IS NOT NULL
      AND ST_Intersects(ST_Transform(way, 4326), ST_SetSRID(ST_MakePoint($1, $2), 4326))
    ORDER BY ST_Area(way) DESC, osm_id
    LIMIT 1
";

/// Feature store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PostgisStore {
    pool: PgPool,
}

impl PostgisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Map a failed query to a store error. A pool timeout alone does not
    /// tell a saturated pool from a lost database, so it is settled with a
    /// direct connection attempt outside the pool.
    async fn fault(&self, err: sqlx::Error) -> StoreError {
        match err {
            sqlx::Error::PoolTimedOut => settle_pool_timeout(self.connect_direct().await),
            other => classify(other),
        }
    }

    async fn connect_direct(&self) -> Result<(), sqlx::Error> {
        let opts = self.pool.connect_options();
        let timeout = self.pool.options().get_acquire_timeout();
        match tokio::time::timeout(timeout, PgConnection::connect_with(&opts)).await {
            Ok(conn) => conn?.close().await,
            Err(_) => Err(sqlx::Error::PoolTimedOut),
        }
    }
}

#[async_trait]
impl FeatureStore for PostgisStore {
    async fn lookup(
        &self,
        query: &FeatureQuery,
        at: Coordinate,
    ) -> Result<Option<String>, StoreError> {
        let result = match query {
            FeatureQuery::NearestRoad => {
                sqlx::query_scalar::<_, Option<String>>(NEAREST_ROAD_SQL)
                    .bind(at.lon)
                    .bind(at.lat)
                    .fetch_optional(&self.pool)
                    .await
            }
            FeatureQuery::NearestPlace { classes, radius_m } => {
                sqlx::query_scalar::<_, Option<String>>(NEAREST_PLACE_SQL)
                    .bind(at.lon)
                    .bind(at.lat)
                    .bind(*classes)
                    .bind(*radius_m)
                    .fetch_optional(&self.pool)
                    .await
            }
            FeatureQuery::Boundary { level } => {
                sqlx::query_scalar::<_, Option<String>>(BOUNDARY_SQL)
                    .bind(at.lon)
                    .bind(at.lat)
                    .bind(level.tag())
                    .fetch_optional(&self.pool)
                    .await
            }
            FeatureQuery::BoundaryTag { level, key } => {
                sqlx::query_scalar::<_, Option<String>>(BOUNDARY_TAG_SQL)
                    .bind(at.lon)
                    .bind(at.lat)
                    .bind(level.tag())
                    .bind(*key)
                    .fetch_optional(&self.pool)
                    .await
            }
        };

        match result {
            Ok(value) => Ok(non_empty(value.flatten())),
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(e) => Err(self.fault(e).await),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => Err(self.fault(e).await),
        }
    }
}

/// Split sqlx failures into "cannot reach the store" and "this query failed".
fn classify(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Configuration(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}

/// The pool timed out; `direct` is the outcome of a connection attempt outside it.
fn settle_pool_timeout(direct: Result<(), sqlx::Error>) -> StoreError {
    match direct {
        Ok(()) => StoreError::Busy("no pooled connection free within the acquire timeout".into()),
        Err(e) => StoreError::Unavailable(format!("pool timed out and direct connect failed: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
    use std::time::Duration;

    #[test]
    fn test_classify_connectivity_errors() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(classify(sqlx::Error::Io(refused)), StoreError::Unavailable(_)));
        assert!(matches!(classify(sqlx::Error::PoolTimedOut), StoreError::Unavailable(_)));
        assert!(matches!(classify(sqlx::Error::PoolClosed), StoreError::Unavailable(_)));
    }

    #[test]
    fn test_pool_timeout_with_reachable_database_is_busy() {
        assert!(matches!(settle_pool_timeout(Ok(())), StoreError::Busy(_)));
    }

    #[test]
    fn test_pool_timeout_with_unreachable_database_is_unavailable() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            settle_pool_timeout(Err(sqlx::Error::Io(refused))),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn test_classify_query_errors() {
        assert!(matches!(
            classify(sqlx::Error::ColumnNotFound("name".into())),
            StoreError::Query(_)
        ));
        assert!(matches!(
            classify(sqlx::Error::Protocol("unexpected message".into())),
            StoreError::Query(_)
        ));
    }

    #[test]
    fn test_statements_bind_the_point() {
        for sql in [NEAREST_ROAD_SQL, NEAREST_PLACE_SQL, BOUNDARY_SQL, BOUNDARY_TAG_SQL] {
            assert!(sql.contains("ST_MakePoint($1, $2)"));
            assert!(!sql.contains('{'));
        }
        assert!(NEAREST_PLACE_SQL.contains("ANY($3)"));
        assert!(BOUNDARY_TAG_SQL.contains("tags -> $4"));
    }

    #[tokio::test]
    async fn test_unreachable_store_is_unavailable() {
        // Nothing listens on port 1.
        let opts = PgConnectOptions::new().host("127.0.0.1").port(1);
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy_with(opts);
        let store = PostgisStore::new(pool);

        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        let err = store
            .lookup(&FeatureQuery::NearestRoad, Coordinate::new(0.0, 0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
