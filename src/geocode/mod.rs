//! Reverse geocoding subsystem.
//!
//! Resolves a WGS84 coordinate to an address by querying an OpenStreetMap
//! feature store for the nearest road and places and the enclosing
//! administrative boundaries.

pub mod memory;
pub mod postgis;
pub mod resolver;
pub mod store;
pub mod types;

pub use memory::MemoryStore;
pub use postgis::PostgisStore;
pub use resolver::{AddressResolver, ResolvePolicy};
pub use store::{FeatureQuery, FeatureStore};
pub use types::{AddressRecord, AdminLevel, Coordinate, GeocodeError, StoreError};
