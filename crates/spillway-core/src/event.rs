//! Events and the pointers that locate them on disk.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An immutable record moving through a channel.
///
/// The body is opaque bytes; headers are free-form string metadata that
/// travel with the body. Two events with equal content are still distinct
/// once stored, since identity is the [`Pointer`] of their put record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

impl Event {
    /// Create an event with the given body and no headers
    pub fn with_body(body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Create an event with headers
    pub fn new(headers: BTreeMap<String, String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Add a header, replacing any previous value for the key
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Event body
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Event headers
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Look up a single header
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Consume the event and return its body
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }
}

/// Location of a put record: segment id plus byte offset of its frame.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Pointer {
    /// Segment the record lives in
    pub segment_id: u64,
    /// Offset of the record frame within the segment
    pub offset: u64,
}

impl Pointer {
    /// Create a pointer
    pub fn new(segment_id: u64, offset: u64) -> Self {
        Self { segment_id, offset }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment_id, self.offset)
    }
}
