//! Failure reasons carried on responses.

use crate::ComponentId;
use thiserror::Error;

/// Why a component could not serve a request.
///
/// These never cross a component boundary as a panic or an `Err`: each
/// component converts them into a failed [`Response`](crate::Response) and
/// returns it up the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComponentError {
    /// The component's health flag is off.
    #[error("{0} is unhealthy")]
    Unhealthy(ComponentId),

    /// Concurrency ceiling reached.
    #[error("{component} at capacity ({limit} concurrent requests)")]
    CapacityExceeded { component: ComponentId, limit: usize },

    /// Byte capacity of a store would be exceeded by a write.
    #[error("{component} storage full: {requested} bytes requested, {available} available")]
    StorageFull {
        component: ComponentId,
        requested: u64,
        available: u64,
    },

    /// No shard owns the request key's hash.
    #[error("{component}: no shard found for hash {hash:#010x}")]
    NoShard { component: ComponentId, hash: u32 },

    /// No route matches the request path.
    #[error("{component}: no route for path {path}")]
    NoRoute { component: ComponentId, path: String },

    /// Every backend is unhealthy or gone.
    #[error("{0}: no healthy backends available")]
    NoHealthyBackends(ComponentId),

    /// Nothing is registered that could receive a submitted request.
    #[error("no entry point component registered")]
    NoEntryPoint,

    /// A write was directed at a read replica.
    #[error("{0}: cannot write to replica")]
    WriteToReplica(ComponentId),

    /// Terminal component with nothing downstream to serve the request.
    #[error("{0}: no backend configured")]
    NoBackend(ComponentId),

    /// A downstream reference outlived its target.
    #[error("downstream component {0} no longer exists")]
    DownstreamGone(ComponentId),

    /// Rejected by a firewall rule.
    #[error("{component}: blocked by rule {rule}")]
    Blocked { component: ComponentId, rule: String },
}

impl ComponentError {
    /// Capacity rejections: concurrency ceiling or byte capacity.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            ComponentError::CapacityExceeded { .. } | ComponentError::StorageFull { .. }
        )
    }

    /// Routing failures: nowhere to send the request.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            ComponentError::NoShard { .. }
                | ComponentError::NoRoute { .. }
                | ComponentError::NoHealthyBackends(_)
                | ComponentError::NoEntryPoint
        )
    }
}
