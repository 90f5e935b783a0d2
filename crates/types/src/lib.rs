//! Data model for the system design simulator.
//!
//! Everything that flows between components lives here:
//!
//! - **Identifiers**: [`ComponentId`], [`RequestId`], well-known [`regions`]
//! - **Requests and responses**: immutable [`Request`]s, [`Response`]s carrying
//!   the hop trace back up the chain
//! - **Errors**: the [`ComponentError`] taxonomy attached to failed responses
//! - **Configuration enumerations**: instance sizes, eviction policies, load
//!   balancing strategies, database and request types
//! - **Metrics**: [`ComponentMetrics`] snapshots
//! - **Hashing**: stable FNV-1a for shard and IP-hash routing

mod config;
mod error;
mod hash;
mod identifiers;
mod metrics;
mod request;
mod response;

pub use config::{
    DatabaseType, EvictionPolicy, InstanceProfile, InstanceSize, LoadBalancingStrategy,
    ParseEnumError, RequestType,
};
pub use error::ComponentError;
pub use hash::{fnv1a_32, HashRange};
pub use identifiers::{regions, ComponentId, RequestId};
pub use metrics::ComponentMetrics;
pub use request::Request;
pub use response::Response;
