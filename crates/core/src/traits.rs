//! The component abstraction.

use async_trait::async_trait;
use std::fmt;
use sysdesign_types::{ComponentId, ComponentMetrics, DatabaseType, Request, Response};

/// Coarse category of a component.
///
/// Rendered as the type tag used for structural lookups ("find the CDN").
/// Flavored kinds carry their flavor in the tag, e.g. `cache-redis` and
/// `database-sql`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    ApiServer,
    /// Cache with its flavor (`redis`, `memcached`, ...).
    Cache(String),
    Database(DatabaseType),
    LoadBalancer,
    Cdn,
    Gateway,
    Firewall,
    Nat,
    Router,
    UserPool,
    /// Anything else, tagged verbatim.
    Custom(String),
}

impl ComponentKind {
    /// Family name without the flavor suffix.
    pub fn family(&self) -> &str {
        match self {
            ComponentKind::ApiServer => "api-server",
            ComponentKind::Cache(_) => "cache",
            ComponentKind::Database(_) => "database",
            ComponentKind::LoadBalancer => "load-balancer",
            ComponentKind::Cdn => "cdn",
            ComponentKind::Gateway => "gateway",
            ComponentKind::Firewall => "firewall",
            ComponentKind::Nat => "nat",
            ComponentKind::Router => "router",
            ComponentKind::UserPool => "user-pool",
            ComponentKind::Custom(tag) => tag,
        }
    }

    /// Full type tag including the flavor.
    pub fn tag(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentKind::Cache(flavor) => write!(f, "cache-{}", flavor),
            ComponentKind::Database(db_type) => write!(f, "database-{}", db_type),
            other => f.write_str(other.family()),
        }
    }
}

/// A unit in the simulated infrastructure graph.
///
/// Every method takes `&self`: components are shared behind `Arc` between the
/// simulator's registry, upstream components, and in-flight requests, and
/// guard their own mutable state internally. No component holds one of its
/// own locks while calling into another component.
///
/// `process` never fails across the boundary. Every failure is reported as a
/// [`Response`] with `success == false` and `error` set.
#[async_trait]
pub trait Component: Send + Sync {
    /// Identifier, unique within the owning simulator.
    fn id(&self) -> &ComponentId;

    /// Category used for structural routing decisions.
    fn kind(&self) -> ComponentKind;

    /// Handle one request, including every downstream hop it triggers.
    ///
    /// The returned response has this component's id prepended to its hop
    /// trace and carries the latency measured from this component's entry.
    async fn process(&self, request: &Request) -> Response;

    /// Point-in-time copy of the component's counters.
    fn metrics(&self) -> ComponentMetrics;

    /// Current hourly cost in dollars.
    fn cost(&self) -> f64;

    fn is_healthy(&self) -> bool;

    /// Fault injection hook.
    fn set_healthy(&self, healthy: bool);

    /// Type tag string, e.g. `cache-redis`.
    fn type_tag(&self) -> String {
        self.kind().tag()
    }
}

impl fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", self.id())
            .field("kind", &self.kind())
            .field("healthy", &self.is_healthy())
            .finish()
    }
}
