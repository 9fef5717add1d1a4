use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use whereami::config::Config;
use whereami::geocode::{AddressResolver, PostgisStore, ResolvePolicy};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cfg = Config::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,whereami=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    info!("whereami v{}", env!("CARGO_PKG_VERSION"));

    // ── Feature store ───────────────────────────────────────────

    let pool = cfg.store.pool()?;
    info!(
        db = %cfg.store.describe(),
        max_connections = cfg.store.max_connections,
        "Using PostGIS feature store"
    );

    let policy = ResolvePolicy::from(&cfg.policy);
    info!(
        suburb_radius_m = policy.suburb_radius_m,
        city_radius_m = policy.city_radius_m,
        "Resolution policy"
    );

    let resolver = AddressResolver::with_policy(Arc::new(PostgisStore::new(pool.clone())), policy);

    // ── Serve ───────────────────────────────────────────────────

    whereami::server::start(&cfg.server.host, cfg.server.port, resolver).await?;

    pool.close().await;
    Ok(())
}
