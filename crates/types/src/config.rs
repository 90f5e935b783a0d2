//! Configuration enumerations shared by components and topology files.
//!
//! The string forms are part of the external contract (topology files, type
//! tags, CLI flags) and must stay stable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a configuration string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// Canonical string form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($name => Ok($ty::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: $kind,
                        value: s.to_string(),
                    }),
                }
            }
        }
    };
}

/// Kind of work a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    #[default]
    Read,
    Write,
    /// Pass-through API call; treated like a read by stores.
    Api,
}

string_enum!(RequestType, "request type", {
    Read => "read",
    Write => "write",
    Api => "api",
});

/// Hardware profile implied by an instance size tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceProfile {
    /// Maximum concurrent in-flight requests.
    pub max_concurrent: usize,
    /// Hourly cost in dollars.
    pub cost_per_hour: f64,
    pub cpu_cores: u32,
    pub memory_gb: u32,
}

/// Instance size tier for API servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceSize {
    Small,
    #[default]
    Medium,
    Large,
    XLarge,
}

string_enum!(InstanceSize, "instance size", {
    Small => "small",
    Medium => "medium",
    Large => "large",
    XLarge => "xlarge",
});

impl InstanceSize {
    /// Fixed capacity/cost/core/memory tuple for this tier.
    pub fn profile(&self) -> InstanceProfile {
        match self {
            InstanceSize::Small => InstanceProfile {
                max_concurrent: 10,
                cost_per_hour: 0.05,
                cpu_cores: 1,
                memory_gb: 2,
            },
            InstanceSize::Medium => InstanceProfile {
                max_concurrent: 50,
                cost_per_hour: 0.10,
                cpu_cores: 2,
                memory_gb: 4,
            },
            InstanceSize::Large => InstanceProfile {
                max_concurrent: 200,
                cost_per_hour: 0.20,
                cpu_cores: 4,
                memory_gb: 8,
            },
            InstanceSize::XLarge => InstanceProfile {
                max_concurrent: 500,
                cost_per_hour: 0.40,
                cpu_cores: 8,
                memory_gb: 16,
            },
        }
    }
}

/// Cache eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Lfu,
    Fifo,
    Random,
}

string_enum!(EvictionPolicy, "eviction policy", {
    Lru => "lru",
    Lfu => "lfu",
    Fifo => "fifo",
    Random => "random",
});

/// Backend selection strategy for load balancers.
///
/// Deserialization is lenient: an unrecognized name falls back to
/// round-robin instead of failing the whole topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnected,
    WeightedRandom,
    IpHash,
}

string_enum!(LoadBalancingStrategy, "load balancing strategy", {
    RoundRobin => "round-robin",
    LeastConnected => "least-connected",
    WeightedRandom => "weighted-random",
    IpHash => "ip-hash",
});

impl LoadBalancingStrategy {
    /// Parse a strategy name, falling back to round-robin when unrecognized.
    pub fn parse_lenient(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl From<String> for LoadBalancingStrategy {
    fn from(s: String) -> Self {
        Self::parse_lenient(&s)
    }
}

/// Database engine family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseType {
    #[default]
    Sql,
    #[serde(rename = "nosql")]
    NoSql,
    KeyValue,
    Document,
}

string_enum!(DatabaseType, "database type", {
    Sql => "sql",
    NoSql => "nosql",
    KeyValue => "key-value",
    Document => "document",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_profiles() {
        assert_eq!(InstanceSize::Small.profile().max_concurrent, 10);
        assert_eq!(InstanceSize::Medium.profile().max_concurrent, 50);
        assert_eq!(InstanceSize::Large.profile().max_concurrent, 200);
        assert_eq!(InstanceSize::XLarge.profile().max_concurrent, 500);
        assert_eq!(InstanceSize::XLarge.profile().cost_per_hour, 0.40);
    }

    #[test]
    fn test_strategy_fallback() {
        assert_eq!(
            LoadBalancingStrategy::parse_lenient("LEAST-CONNECTED"),
            LoadBalancingStrategy::LeastConnected
        );
        assert_eq!(
            LoadBalancingStrategy::parse_lenient("sticky-sessions"),
            LoadBalancingStrategy::RoundRobin
        );
        assert!("sticky-sessions".parse::<LoadBalancingStrategy>().is_err());
    }

    #[test]
    fn test_string_forms() {
        assert_eq!(DatabaseType::KeyValue.to_string(), "key-value");
        assert_eq!("nosql".parse::<DatabaseType>(), Ok(DatabaseType::NoSql));
        assert_eq!(RequestType::Api.as_str(), "api");
        assert_eq!("xlarge".parse::<InstanceSize>(), Ok(InstanceSize::XLarge));
        assert_eq!(EvictionPolicy::Fifo.as_str(), "fifo");
    }
}
