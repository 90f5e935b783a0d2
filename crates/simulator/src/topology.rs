//! Topology files: which components exist and how they are wired.
//!
//! ```toml
//! entry_point = "lb"
//!
//! [[components]]
//! kind = "load-balancer"
//! id = "lb"
//! strategy = "least-connected"
//! backends = ["api-1", { id = "api-2", weight = 3 }]
//!
//! [[components]]
//! kind = "api-server"
//! id = "api-1"
//! size = "large"
//! cache = "cache"
//! database = "db"
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use sysdesign_components::{
    ApiServer, Appliance, ApplianceKind, Cache, Cdn, Database, LoadBalancer, Router, UserPool,
};
use sysdesign_core::{Component, Downstream, Pacing};
use sysdesign_engine::{Simulator, SimulatorError};
use sysdesign_types::{
    regions, ComponentId, DatabaseType, EvictionPolicy, InstanceSize, LoadBalancingStrategy,
};
use thiserror::Error;
use tracing::debug;

const GIB: u64 = 1 << 30;
const MIB: u64 = 1 << 20;

/// Errors raised while loading or wiring a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Invalid topology file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate component id: {0}")]
    DuplicateId(String),

    #[error("Component {component} references unknown component {reference}")]
    UnknownComponent { component: String, reference: String },

    #[error("Invalid wiring for {component}: {reason}")]
    InvalidWiring { component: String, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Component receiving submitted requests. When unset the simulator
    /// picks a CDN, then a load balancer, then an API server.
    pub entry_point: Option<String>,
    pub components: Vec<ComponentSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ComponentSpec {
    ApiServer(ApiServerSpec),
    Cache(CacheSpec),
    Database(DatabaseSpec),
    LoadBalancer(LoadBalancerSpec),
    Cdn(CdnSpec),
    Gateway(ApplianceSpec),
    Firewall(ApplianceSpec),
    Nat(ApplianceSpec),
    Router(RouterSpec),
    UserPool(UserPoolSpec),
}

impl ComponentSpec {
    pub fn id(&self) -> &str {
        match self {
            ComponentSpec::ApiServer(spec) => &spec.id,
            ComponentSpec::Cache(spec) => &spec.id,
            ComponentSpec::Database(spec) => &spec.id,
            ComponentSpec::LoadBalancer(spec) => &spec.id,
            ComponentSpec::Cdn(spec) => &spec.id,
            ComponentSpec::Gateway(spec)
            | ComponentSpec::Firewall(spec)
            | ComponentSpec::Nat(spec) => &spec.id,
            ComponentSpec::Router(spec) => &spec.id,
            ComponentSpec::UserPool(spec) => &spec.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiServerSpec {
    pub id: String,
    #[serde(default)]
    pub size: InstanceSize,
    #[serde(default)]
    pub cache: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
}

fn default_flavor() -> String {
    "redis".to_string()
}

fn default_cache_capacity() -> u64 {
    256 * MIB
}

fn default_database_capacity() -> u64 {
    10 * GIB
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSpec {
    pub id: String,
    #[serde(default = "default_flavor")]
    pub flavor: String,
    /// Capacity in bytes.
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,
    #[serde(default)]
    pub policy: EvictionPolicy,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub id: String,
    #[serde(default)]
    pub db_type: DatabaseType,
    /// Capacity in bytes.
    #[serde(default = "default_database_capacity")]
    pub capacity: u64,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub replication_lag_ms: Option<u64>,
    /// Ids of databases receiving this one's writes.
    #[serde(default)]
    pub replicas: Vec<String>,
    /// Ids of databases splitting the hash space evenly, in order.
    #[serde(default)]
    pub shards: Vec<String>,
}

/// A load balancer backend, either a bare id or an id with a weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackendSpec {
    Id(String),
    Weighted { id: String, weight: u32 },
}

impl BackendSpec {
    fn id(&self) -> &str {
        match self {
            BackendSpec::Id(id) | BackendSpec::Weighted { id, .. } => id,
        }
    }

    fn weight(&self) -> u32 {
        match self {
            BackendSpec::Id(_) => 1,
            BackendSpec::Weighted { weight, .. } => *weight,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    pub id: String,
    #[serde(default)]
    pub strategy: LoadBalancingStrategy,
    #[serde(default)]
    pub backends: Vec<BackendSpec>,
}

fn all_regions() -> Vec<String> {
    regions::ALL.iter().map(|region| region.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdnSpec {
    pub id: String,
    #[serde(default = "all_regions")]
    pub regions: Vec<String>,
    #[serde(default)]
    pub edge_ttl_secs: Option<u64>,
    #[serde(default)]
    pub origin: Option<String>,
}

/// Gateway, firewall or NAT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplianceSpec {
    pub id: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub backend: Option<String>,
    /// Path prefixes to block. Firewalls only.
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterSpec {
    pub id: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Path (or path prefix) to target id.
    #[serde(default)]
    pub routes: IndexMap<String, String>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPoolSpec {
    pub id: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub users: u64,
    #[serde(default)]
    pub requests_per_user: Option<u32>,
    #[serde(default)]
    pub downstream: Option<String>,
}

/// Concrete component behind a spec, kept typed for wiring.
enum Node {
    Api(Arc<ApiServer>),
    Cache(Arc<Cache>),
    Database(Arc<Database>),
    LoadBalancer(Arc<LoadBalancer>),
    Cdn(Arc<Cdn>),
    Appliance(Arc<Appliance>),
    Router(Arc<Router>),
    UserPool(Arc<UserPool>),
}

impl Node {
    fn component(&self) -> Arc<dyn Component> {
        match self {
            Node::Api(c) => c.clone(),
            Node::Cache(c) => c.clone(),
            Node::Database(c) => c.clone(),
            Node::LoadBalancer(c) => c.clone(),
            Node::Cdn(c) => c.clone(),
            Node::Appliance(c) => c.clone(),
            Node::Router(c) => c.clone(),
            Node::UserPool(c) => c.clone(),
        }
    }
}

/// Components built from a [`TopologyConfig`], wired and ready to register.
pub struct Topology {
    components: Vec<Arc<dyn Component>>,
    entry_point: Option<ComponentId>,
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("components", &self.component_ids())
            .field("entry_point", &self.entry_point)
            .finish()
    }
}

impl Topology {
    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    pub fn component_ids(&self) -> Vec<ComponentId> {
        self.components.iter().map(|c| c.id().clone()).collect()
    }

    pub fn entry_point(&self) -> Option<&ComponentId> {
        self.entry_point.as_ref()
    }

    /// Register every component and designate the entry point.
    pub fn install(&self, simulator: &Simulator) -> Result<(), SimulatorError> {
        for component in &self.components {
            simulator.register_component(component.clone())?;
        }
        if let Some(entry) = &self.entry_point {
            simulator.set_entry_point(entry)?;
        }
        Ok(())
    }
}

impl TopologyConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, TopologyError> {
        Ok(toml::from_str(input)?)
    }

    /// LB in front of two medium API servers sharing a Redis cache and a SQL
    /// primary with one replica.
    pub fn reference() -> Self {
        let api = |id: &str| {
            ComponentSpec::ApiServer(ApiServerSpec {
                id: id.to_string(),
                size: InstanceSize::Medium,
                cache: Some("cache".to_string()),
                database: Some("db".to_string()),
            })
        };
        let database = |id: &str, replicas: Vec<String>| {
            ComponentSpec::Database(DatabaseSpec {
                id: id.to_string(),
                db_type: DatabaseType::Sql,
                capacity: default_database_capacity(),
                region: None,
                replication_lag_ms: None,
                replicas,
                shards: Vec::new(),
            })
        };
        Self {
            entry_point: Some("lb".to_string()),
            components: vec![
                ComponentSpec::LoadBalancer(LoadBalancerSpec {
                    id: "lb".to_string(),
                    strategy: LoadBalancingStrategy::RoundRobin,
                    backends: vec![
                        BackendSpec::Id("api-1".to_string()),
                        BackendSpec::Id("api-2".to_string()),
                    ],
                }),
                api("api-1"),
                api("api-2"),
                ComponentSpec::Cache(CacheSpec {
                    id: "cache".to_string(),
                    flavor: default_flavor(),
                    capacity: default_cache_capacity(),
                    policy: EvictionPolicy::Lru,
                    ttl_secs: None,
                    region: None,
                    backend: Some("db".to_string()),
                }),
                database("db", vec!["db-replica".to_string()]),
                database("db-replica", Vec::new()),
            ],
        }
    }

    /// Construct and wire every component. Every delay is scaled by `pacing`.
    pub fn build(&self, pacing: Pacing) -> Result<Topology, TopologyError> {
        let mut nodes: IndexMap<String, Node> = IndexMap::new();
        for spec in &self.components {
            let id = spec.id().to_string();
            if nodes.contains_key(&id) {
                return Err(TopologyError::DuplicateId(id));
            }
            let node = construct(spec, pacing)?;
            nodes.insert(id, node);
        }

        for spec in &self.components {
            wire(spec, &nodes)?;
        }

        let entry_point = match &self.entry_point {
            Some(entry) if !nodes.contains_key(entry) => {
                return Err(TopologyError::UnknownComponent {
                    component: "entry_point".to_string(),
                    reference: entry.clone(),
                })
            }
            Some(entry) => Some(ComponentId::from(entry.as_str())),
            None => None,
        };

        Ok(Topology {
            components: nodes.values().map(Node::component).collect(),
            entry_point,
        })
    }
}

fn construct(spec: &ComponentSpec, pacing: Pacing) -> Result<Node, TopologyError> {
    let node = match spec {
        ComponentSpec::ApiServer(s) => {
            Node::Api(Arc::new(ApiServer::new(s.id.as_str(), s.size).with_pacing(pacing)))
        }
        ComponentSpec::Cache(s) => {
            let mut cache = Cache::new(s.id.as_str(), s.flavor.clone(), s.capacity)
                .with_policy(s.policy)
                .with_pacing(pacing);
            if let Some(ttl) = s.ttl_secs {
                cache = cache.with_ttl(Duration::from_secs(ttl));
            }
            if let Some(region) = &s.region {
                cache = cache.with_region(region.clone());
            }
            Node::Cache(Arc::new(cache))
        }
        ComponentSpec::Database(s) => {
            let mut database = Database::new(s.id.as_str(), s.db_type, s.capacity).with_pacing(pacing);
            if let Some(lag) = s.replication_lag_ms {
                database = database.with_replication_lag(Duration::from_millis(lag));
            }
            if let Some(region) = &s.region {
                database = database.with_region(region.clone());
            }
            Node::Database(Arc::new(database))
        }
        ComponentSpec::LoadBalancer(s) => Node::LoadBalancer(Arc::new(
            LoadBalancer::new(s.id.as_str(), s.strategy).with_pacing(pacing),
        )),
        ComponentSpec::Cdn(s) => {
            if s.regions.is_empty() {
                return Err(TopologyError::InvalidWiring {
                    component: s.id.clone(),
                    reason: "a CDN needs at least one edge region".to_string(),
                });
            }
            let mut cdn = Cdn::new(s.id.as_str(), s.regions.iter().cloned()).with_pacing(pacing);
            if let Some(ttl) = s.edge_ttl_secs {
                cdn = cdn.with_edge_ttl(Duration::from_secs(ttl));
            }
            Node::Cdn(Arc::new(cdn))
        }
        ComponentSpec::Gateway(s) => appliance(s, ApplianceKind::Gateway, pacing)?,
        ComponentSpec::Firewall(s) => appliance(s, ApplianceKind::Firewall, pacing)?,
        ComponentSpec::Nat(s) => appliance(s, ApplianceKind::Nat, pacing)?,
        ComponentSpec::Router(s) => {
            let mut router = Router::new(s.id.as_str()).with_pacing(pacing);
            if let Some(region) = &s.region {
                router = router.with_region(region.clone());
            }
            Node::Router(Arc::new(router))
        }
        ComponentSpec::UserPool(s) => {
            let mut pool = UserPool::new(s.id.as_str(), s.users);
            if let Some(rate) = s.requests_per_user {
                pool = pool.with_requests_per_user(rate);
            }
            if let Some(region) = &s.region {
                pool = pool.with_region(region.clone());
            }
            Node::UserPool(Arc::new(pool))
        }
    };
    Ok(node)
}

fn appliance(spec: &ApplianceSpec, kind: ApplianceKind, pacing: Pacing) -> Result<Node, TopologyError> {
    if !spec.deny.is_empty() && kind != ApplianceKind::Firewall {
        return Err(TopologyError::InvalidWiring {
            component: spec.id.clone(),
            reason: "deny rules are only enforced by firewalls".to_string(),
        });
    }
    let mut appliance = Appliance::new(spec.id.as_str(), kind).with_pacing(pacing);
    if let Some(region) = &spec.region {
        appliance = appliance.with_region(region.clone());
    }
    for prefix in &spec.deny {
        appliance.add_deny_rule(prefix.clone());
    }
    Ok(Node::Appliance(Arc::new(appliance)))
}

fn lookup<'a>(
    nodes: &'a IndexMap<String, Node>,
    component: &str,
    reference: &str,
) -> Result<&'a Node, TopologyError> {
    nodes.get(reference).ok_or_else(|| TopologyError::UnknownComponent {
        component: component.to_string(),
        reference: reference.to_string(),
    })
}

fn downstream(
    nodes: &IndexMap<String, Node>,
    component: &str,
    reference: &str,
) -> Result<Downstream, TopologyError> {
    if component == reference {
        return Err(TopologyError::InvalidWiring {
            component: component.to_string(),
            reason: "a component cannot forward to itself".to_string(),
        });
    }
    let node = lookup(nodes, component, reference)?;
    Ok(Downstream::new(&node.component()))
}

fn optional_downstream(
    nodes: &IndexMap<String, Node>,
    component: &str,
    reference: Option<&String>,
) -> Result<Option<Downstream>, TopologyError> {
    reference
        .map(|reference| downstream(nodes, component, reference))
        .transpose()
}

fn database_ref(
    nodes: &IndexMap<String, Node>,
    component: &str,
    reference: &str,
) -> Result<Arc<Database>, TopologyError> {
    if component == reference {
        return Err(TopologyError::InvalidWiring {
            component: component.to_string(),
            reason: "a database cannot replicate to or shard onto itself".to_string(),
        });
    }
    match lookup(nodes, component, reference)? {
        Node::Database(database) => Ok(database.clone()),
        _ => Err(TopologyError::InvalidWiring {
            component: component.to_string(),
            reason: format!("{reference} is not a database"),
        }),
    }
}

fn wire(spec: &ComponentSpec, nodes: &IndexMap<String, Node>) -> Result<(), TopologyError> {
    let id = spec.id();
    let node = lookup(nodes, id, id)?;
    match (spec, node) {
        (ComponentSpec::ApiServer(s), Node::Api(api)) => {
            api.set_cache(optional_downstream(nodes, id, s.cache.as_ref())?);
            api.set_database(optional_downstream(nodes, id, s.database.as_ref())?);
        }
        (ComponentSpec::Cache(s), Node::Cache(cache)) => {
            cache.set_backend(optional_downstream(nodes, id, s.backend.as_ref())?);
        }
        (ComponentSpec::Database(s), Node::Database(database)) => {
            for replica in &s.replicas {
                database.add_replica(database_ref(nodes, id, replica)?);
            }
            if !s.shards.is_empty() {
                let shards = s
                    .shards
                    .iter()
                    .map(|shard| database_ref(nodes, id, shard))
                    .collect::<Result<Vec<_>, _>>()?;
                database.shard_evenly(shards);
            }
        }
        (ComponentSpec::LoadBalancer(s), Node::LoadBalancer(lb)) => {
            for backend in &s.backends {
                lb.add_weighted_backend(downstream(nodes, id, backend.id())?, backend.weight());
            }
        }
        (ComponentSpec::Cdn(s), Node::Cdn(cdn)) => {
            cdn.set_origin(optional_downstream(nodes, id, s.origin.as_ref())?);
        }
        (
            ComponentSpec::Gateway(s) | ComponentSpec::Firewall(s) | ComponentSpec::Nat(s),
            Node::Appliance(appliance),
        ) => {
            appliance.set_backend(optional_downstream(nodes, id, s.backend.as_ref())?);
        }
        (ComponentSpec::Router(s), Node::Router(router)) => {
            for (path, target) in &s.routes {
                router.add_route(path.clone(), downstream(nodes, id, target)?);
            }
            router.set_default_route(optional_downstream(nodes, id, s.default.as_ref())?);
        }
        (ComponentSpec::UserPool(s), Node::UserPool(pool)) => {
            pool.set_downstream(optional_downstream(nodes, id, s.downstream.as_ref())?);
        }
        _ => {
            return Err(TopologyError::InvalidWiring {
                component: id.to_string(),
                reason: "component kind changed during build".to_string(),
            })
        }
    }
    debug!(component = %id, "Wired component");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sysdesign_core::ComponentKind;
    use sysdesign_types::Request;

    const SAMPLE: &str = r#"
entry_point = "edge"

[[components]]
kind = "cdn"
id = "edge"
regions = ["us-east", "europe"]
origin = "fw"

[[components]]
kind = "firewall"
id = "fw"
backend = "lb"
deny = ["/admin"]

[[components]]
kind = "load-balancer"
id = "lb"
strategy = "Weighted-Random"
backends = ["api-1", { id = "api-2", weight = 3 }]

[[components]]
kind = "api-server"
id = "api-1"
size = "small"
database = "db"

[[components]]
kind = "api-server"
id = "api-2"
database = "db"

[[components]]
kind = "database"
id = "db"
db_type = "key-value"
shards = ["db-a", "db-b"]

[[components]]
kind = "database"
id = "db-a"

[[components]]
kind = "database"
id = "db-b"
"#;

    #[test]
    fn test_parse_and_build_sample() {
        let config = TopologyConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.components.len(), 8);
        match &config.components[2] {
            ComponentSpec::LoadBalancer(lb) => {
                assert_eq!(lb.strategy, LoadBalancingStrategy::WeightedRandom);
                assert_eq!(lb.backends[1].weight(), 3);
            }
            other => panic!("unexpected spec: {other:?}"),
        }

        let topology = config.build(Pacing::instant()).unwrap();
        assert_eq!(topology.entry_point(), Some(&ComponentId::from("edge")));
        assert_eq!(topology.components().len(), 8);
        assert_eq!(topology.components()[0].kind(), ComponentKind::Cdn);
    }

    #[tokio::test]
    async fn test_built_topology_serves_requests() {
        let topology = TopologyConfig::from_toml_str(SAMPLE)
            .unwrap()
            .build(Pacing::instant())
            .unwrap();
        let edge = topology.components()[0].clone();

        let response = edge.process(&Request::write(1, "/orders", 10).with_user("u-1")).await;
        assert!(response.is_success(), "{:?}", response.error);
        assert_eq!(response.hops[..3], ["edge", "fw", "lb"]);
        assert_eq!(response.hops.len(), 6);

        let blocked = edge.process(&Request::write(2, "/admin/users", 10)).await;
        assert!(!blocked.is_success());
    }

    #[test]
    fn test_reference_topology() {
        let topology = TopologyConfig::reference().build(Pacing::instant()).unwrap();
        assert_eq!(
            topology.component_ids(),
            vec!["lb", "api-1", "api-2", "cache", "db", "db-replica"]
        );
        let simulator = Simulator::default();
        topology.install(&simulator).unwrap();
        assert_eq!(simulator.entry_point(), Some(ComponentId::from("lb")));
    }

    #[test]
    fn test_wiring_errors() {
        let unknown = r#"
[[components]]
kind = "api-server"
id = "api"
database = "missing"
"#;
        assert!(matches!(
            TopologyConfig::from_toml_str(unknown).unwrap().build(Pacing::instant()),
            Err(TopologyError::UnknownComponent { reference, .. }) if reference == "missing"
        ));

        let duplicate = r#"
[[components]]
kind = "cache"
id = "x"

[[components]]
kind = "router"
id = "x"
"#;
        assert!(matches!(
            TopologyConfig::from_toml_str(duplicate).unwrap().build(Pacing::instant()),
            Err(TopologyError::DuplicateId(id)) if id == "x"
        ));

        let not_a_database = r#"
[[components]]
kind = "database"
id = "db"
replicas = ["cache"]

[[components]]
kind = "cache"
id = "cache"
"#;
        assert!(matches!(
            TopologyConfig::from_toml_str(not_a_database).unwrap().build(Pacing::instant()),
            Err(TopologyError::InvalidWiring { .. })
        ));

        let deny_on_gateway = r#"
[[components]]
kind = "gateway"
id = "gw"
deny = ["/admin"]
"#;
        assert!(matches!(
            TopologyConfig::from_toml_str(deny_on_gateway).unwrap().build(Pacing::instant()),
            Err(TopologyError::InvalidWiring { .. })
        ));

        let bad_entry = "entry_point = \"nowhere\"\n";
        assert!(matches!(
            TopologyConfig::from_toml_str(bad_entry).unwrap().build(Pacing::instant()),
            Err(TopologyError::UnknownComponent { .. })
        ));

        assert!(matches!(
            TopologyConfig::from_toml_str("[[components]]\nkind = \"mainframe\"\nid = \"m\"\n"),
            Err(TopologyError::Parse(_))
        ));
    }
}
