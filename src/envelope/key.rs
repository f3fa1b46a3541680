//! Call key type for response correlation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Globally unique key generated when a call is created.
///
/// Wraps a ULID so keys are unique across broker instances and sort by
/// creation time in logs. On the wire it is the 26 character ULID string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallKey(Ulid);

impl CallKey {
    /// Generate a fresh key.
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for CallKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for CallKey {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}
