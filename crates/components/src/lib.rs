//! Simulated infrastructure components.
//!
//! Every type here implements [`sysdesign_core::Component`]. Wiring happens
//! through [`sysdesign_core::Downstream`] handles set on the upstream
//! component, so a graph can be rewired while requests are in flight.
//!
//! | Component | Latency | Failure model |
//! |-----------|---------|---------------|
//! | [`ApiServer`] | 10 ms + 0-5 ms jitter | concurrency ceiling by size tier |
//! | [`Cache`] | 1 ms on hit | byte capacity with eviction, TTL |
//! | [`Database`] | 10 ms read, 15 ms write | byte capacity, replica writes, shard routing |
//! | [`LoadBalancer`] | 2 ms | no healthy backends |
//! | [`Cdn`] | 2 ms on edge hit | origin only |
//! | [`Appliance`], [`Router`] | 1-2 ms | deny rules, missing routes |

pub mod api;
pub mod cache;
pub mod cdn;
pub mod database;
pub mod load_balancer;
pub mod network;

pub use api::ApiServer;
pub use cache::Cache;
pub use cdn::{Cdn, EdgeLocation};
pub use database::{Database, ReplicationHandle, Shard};
pub use load_balancer::LoadBalancer;
pub use network::{Appliance, ApplianceKind, Router, UserPool};
