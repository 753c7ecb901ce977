//! Source identification types
//!
//! `SourceId` identifies the protocol adapter (OPC-UA subscription, MQTT
//! topic group, Modbus poller, ...) a record originated from.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the protocol adapter that produced a record
///
/// Per-source ordering guarantees are scoped to this identifier: records
/// sharing a `SourceId` are delivered in non-decreasing sequence order as
/// long as they stay on a single path through the pipeline.
///
/// # Example
///
/// ```
/// use otbridge_protocol::SourceId;
///
/// let source = SourceId::new("opcua_crusher");
/// assert_eq!(source.as_str(), "opcua_crusher");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Create a new source ID
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the source ID as a string slice
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the identifier is empty (invalid for admission)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for SourceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Default for SourceId {
    fn default() -> Self {
        Self::new("unknown")
    }
}
