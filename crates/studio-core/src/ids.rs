//! ID newtypes.
//!
//! [`RequestId`] is chosen by the browser client and validated on the way in;
//! [`ConnectionId`] is minted by the server (UUID v7, time-ordered) for each
//! accepted WebSocket.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StudioError;

/// Maximum length of a client-chosen request ID.
pub const MAX_REQUEST_ID_LEN: usize = 120;

static REQUEST_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,120}$").expect("request id pattern is valid")
});

/// Client-chosen correlation ID for a turn-starting or action message.
///
/// Only values matching `^[A-Za-z0-9_-]{1,120}$` can be constructed, and
/// deserialization enforces the same rule.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RequestId(String);

impl RequestId {
    /// Validate and wrap a client-supplied ID.
    pub fn parse(value: impl Into<String>) -> Result<Self, StudioError> {
        let value = value.into();
        if REQUEST_ID_PATTERN.is_match(&value) {
            Ok(Self(value))
        } else {
            Err(StudioError::protocol(
                "requestId must be 1-120 characters of A-Z, a-z, 0-9, '_' or '-'",
            ))
        }
    }

    /// Return the inner string as a slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RequestId {
    type Error = StudioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RequestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Server-minted identifier for one WebSocket connection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new random ID (UUID v7, time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Return the inner string as a slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
