//! Responses unwinding back through the component graph.

use crate::{ComponentError, ComponentId, RequestId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of processing a request.
///
/// The terminal hop (or the point of failure) creates the response. Each hop
/// it passes through on the way back prepends its own id to `hops` and
/// overwrites `latency` with the time elapsed since that hop started, so the
/// value read at the top of the chain covers the whole traversal.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub request_id: RequestId,
    pub success: bool,
    pub latency: Duration,
    pub data_size: u64,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<ComponentError>,
    pub cache_hit: bool,
    /// Visited component ids, outermost first.
    pub hops: Vec<ComponentId>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Response {
    /// Successful response produced at `hop`.
    pub fn success(
        request_id: RequestId,
        hop: impl Into<ComponentId>,
        latency: Duration,
        data_size: u64,
    ) -> Self {
        Self {
            request_id,
            success: true,
            latency,
            data_size,
            error: None,
            cache_hit: false,
            hops: vec![hop.into()],
            metadata: BTreeMap::new(),
        }
    }

    /// Failed response produced at `hop`. Sets `success` and `error` together.
    pub fn failure(
        request_id: RequestId,
        hop: impl Into<ComponentId>,
        latency: Duration,
        error: ComponentError,
    ) -> Self {
        Self {
            request_id,
            success: false,
            latency,
            data_size: 0,
            error: Some(error),
            cache_hit: false,
            hops: vec![hop.into()],
            metadata: BTreeMap::new(),
        }
    }

    /// Failure that never reached any component.
    pub fn rejected(request_id: RequestId, error: ComponentError) -> Self {
        Self {
            request_id,
            success: false,
            latency: Duration::ZERO,
            data_size: 0,
            error: Some(error),
            cache_hit: false,
            hops: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Mark as served from a cache.
    pub fn with_cache_hit(mut self) -> Self {
        self.cache_hit = true;
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Record an intermediate hop on the way back up: prepend `hop` and
    /// replace the latency with the hop's own elapsed time.
    pub fn through(mut self, hop: &ComponentId, elapsed: Duration) -> Self {
        self.hops.insert(0, hop.clone());
        self.latency = elapsed;
        self
    }

    /// Success requires both the flag and the absence of an error.
    pub fn is_success(&self) -> bool {
        self.success && self.error.is_none()
    }

    /// Component that served or failed the request last, if any.
    pub fn terminal_hop(&self) -> Option<&ComponentId> {
        self.hops.last()
    }
}

fn serialize_error<S>(error: &Option<ComponentError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_through_prepends_and_overwrites_latency() {
        let resp = Response::success(RequestId(1), "db", Duration::from_millis(10), 64)
            .through(&ComponentId::new("cache"), Duration::from_millis(11))
            .through(&ComponentId::new("api"), Duration::from_millis(23));

        assert_eq!(resp.hops, vec!["api", "cache", "db"]);
        assert_eq!(resp.latency, Duration::from_millis(23));
        assert_eq!(resp.terminal_hop().map(|h| h.as_str()), Some("db"));
    }

    #[test]
    fn test_failure_sets_both_fields() {
        let resp = Response::failure(
            RequestId(2),
            "api",
            Duration::ZERO,
            ComponentError::Unhealthy(ComponentId::new("api")),
        );
        assert!(!resp.success);
        assert!(resp.error.is_some());
        assert!(!resp.is_success());
    }

    #[test]
    fn test_is_success_checks_error() {
        let mut resp = Response::success(RequestId(3), "api", Duration::ZERO, 0);
        resp.error = Some(ComponentError::NoEntryPoint);
        assert!(!resp.is_success());
    }
}
