//! Request/reply correlation ids.

use std::fmt;
use uuid::Uuid;

/// Opaque token carried in `correlation_id` on a request and echoed on its
/// reply. Random v4, so ids from concurrent requests do not collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Read an id back from reply metadata.
    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw).map(Self)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Hyphenated lowercase, the form responders echo back.
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}
