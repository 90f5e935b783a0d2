//! Requests flowing through the component graph.

use crate::{regions, RequestId, RequestType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A synthetic request.
///
/// Created by the traffic source and never mutated once submitted: every hop
/// only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub kind: RequestType,
    /// Region the request originates from; selects the CDN edge.
    pub region: String,
    /// Target path or key. Caches and stores key their entries by it.
    pub path: String,
    /// Payload size in bytes.
    pub data_size: u64,
    /// Originating user; the shard routing key.
    pub user_id: String,
    pub timestamp: SystemTime,
    pub headers: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Request {
    /// Create a request with default region and no payload.
    pub fn new(id: RequestId, kind: RequestType, path: impl Into<String>) -> Self {
        Self {
            id,
            kind,
            region: regions::US_EAST.to_string(),
            path: path.into(),
            data_size: 0,
            user_id: String::new(),
            timestamp: SystemTime::now(),
            headers: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// Create a read request.
    pub fn read(id: u64, path: impl Into<String>) -> Self {
        Self::new(RequestId(id), RequestType::Read, path)
    }

    /// Create a write request carrying `data_size` bytes.
    pub fn write(id: u64, path: impl Into<String>, data_size: u64) -> Self {
        Self::new(RequestId(id), RequestType::Write, path).with_data_size(data_size)
    }

    /// Set the origin region.
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// Set the payload size.
    pub fn with_data_size(mut self, data_size: u64) -> Self {
        self.data_size = data_size;
        self
    }

    /// Set the originating user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether stores treat this request as a read.
    pub fn is_read(&self) -> bool {
        self.kind == RequestType::Read
    }

    /// Whether stores treat this request as a write.
    pub fn is_write(&self) -> bool {
        self.kind == RequestType::Write
    }
}
