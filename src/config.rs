//! Command-line and environment configuration.
//!
//! Every flag falls back to an environment variable, then to the defaults
//! of the stock osm2pgsql development setup.

use clap::{Args, Parser};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};
use std::time::Duration;

use crate::geocode::ResolvePolicy;

/// whereami — reverse geocoder over an OpenStreetMap PostGIS database
///
/// Serves GET /whereami?lat=<float>&lon=<float> and answers with the nearest
/// road, suburb and city and the enclosing county, state and country.
#[derive(Debug, Parser)]
#[command(name = "whereami", version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub server: ServerConfig,

    #[command(flatten)]
    pub store: StoreConfig,

    #[command(flatten)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Interface to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Listen port.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,
}

#[derive(Debug, Clone, Args)]
pub struct StoreConfig {
    /// Full connection URL; overrides the individual --db-* settings.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "PGHOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "PGPORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "PGUSER", default_value = "osm_user")]
    pub db_user: String,

    #[arg(long, env = "PGPASSWORD", default_value = "osm_pass", hide_env_values = true)]
    pub db_password: String,

    #[arg(long, env = "PGDATABASE", default_value = "osm_db")]
    pub db_name: String,

    /// disable, allow, prefer, require, verify-ca or verify-full.
    #[arg(long, env = "PGSSLMODE", default_value = "disable", value_parser = parse_sslmode)]
    pub db_sslmode: PgSslMode,

    /// Upper bound on pooled connections.
    #[arg(long, env = "DB_MAX_CONNECTIONS", default_value_t = 10)]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection before giving up.
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_SECS", default_value_t = 5)]
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct PolicyConfig {
    /// Search radius for suburbs, in meters.
    #[arg(long, env = "SUBURB_RADIUS_M", default_value_t = 1000.0, value_parser = parse_radius)]
    pub suburb_radius: f64,

    /// Search radius for cities and towns, in meters.
    #[arg(long, env = "CITY_RADIUS_M", default_value_t = 3000.0, value_parser = parse_radius)]
    pub city_radius: f64,
}

impl StoreConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        if let Some(url) = &self.database_url {
            return url.parse();
        }
        Ok(PgConnectOptions::new()
            .host(&self.db_host)
            .port(self.db_port)
            .username(&self.db_user)
            .password(&self.db_password)
            .database(&self.db_name)
            .ssl_mode(self.db_sslmode))
    }

    /// Build the pool without connecting; connections open on first use.
    pub fn pool(&self) -> Result<PgPool, sqlx::Error> {
        let opts = self.connect_options()?;
        Ok(PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(Duration::from_secs(self.acquire_timeout_secs))
            .connect_lazy_with(opts))
    }

    /// Connection target without credentials, for logging.
    pub fn describe(&self) -> String {
        match &self.database_url {
            Some(_) => "DATABASE_URL".to_string(),
            None => format!(
                "{}@{}:{}/{}",
                self.db_user, self.db_host, self.db_port, self.db_name
            ),
        }
    }
}

impl From<&PolicyConfig> for ResolvePolicy {
    fn from(cfg: &PolicyConfig) -> Self {
        ResolvePolicy {
            suburb_radius_m: cfg.suburb_radius,
            city_radius_m: cfg.city_radius,
        }
    }
}

fn parse_sslmode(s: &str) -> Result<PgSslMode, String> {
    s.parse().map_err(|_| {
        format!(
            "Unknown sslmode '{}'. Use disable, allow, prefer, require, verify-ca or verify-full.",
            s
        )
    })
}

fn parse_radius(s: &str) -> Result<f64, String> {
    match s.parse::<f64>() {
        Ok(r) if r.is_finite() && r >= 0.0 => Ok(r),
        _ => Err(format!("Invalid radius '{}'. Expected meters >= 0.", s)),
    }
}
