//! Call envelope: the request half of the protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::CallKey;

/// Keyword arguments of a call, by parameter name.
pub type Arguments = serde_json::Map<String, Value>;

/// A request for the worker to run one of its registered methods.
///
/// The key is generated at construction time. Fields are read-only once the
/// call is built; the `arg` builder consumes the call, so a call handed to
/// the broker can no longer change.
///
/// # Wire Format
///
/// ```json
/// {"target_method": "uppercase", "key": "01J...", "arguments": {"text": "blabla"}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    target_method: String,
    key: CallKey,
    #[serde(default)]
    arguments: Arguments,
}

impl Call {
    /// Create a call with no arguments and a fresh key.
    pub fn new(target_method: impl Into<String>) -> Self {
        Self::with_arguments(target_method, Arguments::new())
    }

    /// Create a call with the given argument map and a fresh key.
    pub fn with_arguments(target_method: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            target_method: target_method.into(),
            key: CallKey::new(),
            arguments,
        }
    }

    /// Add a keyword argument.
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn target_method(&self) -> &str {
        &self.target_method
    }

    pub fn key(&self) -> CallKey {
        self.key
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Split the call into method name, key and arguments.
    pub fn into_parts(self) -> (String, CallKey, Arguments) {
        (self.target_method, self.key, self.arguments)
    }
}
