//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Component identifier.
///
/// Unique within the simulator a component is registered into. Cloning is
/// cheap enough for the hop trace, which carries one per visited component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Create a component identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ComponentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ComponentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Request identifier, correlating a response back to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Create a new request ID.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Well-known region names.
///
/// Regions are plain strings on requests and CDN edges; these are the names
/// the traffic model and the reference topologies use.
pub mod regions {
    pub const US_EAST: &str = "us-east";
    pub const US_WEST: &str = "us-west";
    pub const EUROPE: &str = "europe";
    pub const ASIA: &str = "asia";
    pub const AUSTRALIA: &str = "australia";

    /// All well-known regions, in display order.
    pub const ALL: [&str; 5] = [US_EAST, US_WEST, EUROPE, ASIA, AUSTRALIA];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_component_id_lookup_by_str() {
        let mut map = HashMap::new();
        map.insert(ComponentId::new("api-1"), 7);
        assert_eq!(map.get("api-1"), Some(&7));
        assert_eq!(ComponentId::from("api-1"), "api-1");
    }

    #[test]
    fn test_request_id_display() {
        assert_eq!(RequestId(42).to_string(), "req-42");
    }
}
