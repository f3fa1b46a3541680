//! Named handler registry.
//!
//! Methods are looked up by name at call time, but every name is validated
//! when it is registered and every handler has a concrete signature, so a
//! call can only reach code that was explicitly exposed.

use std::collections::HashMap;
use std::fmt::{self, Display};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::envelope::{Arguments, CallError};
use crate::error::RegistryError;

type Handler<S> = Box<dyn Fn(&mut S, Arguments) -> Result<Value, CallError>>;

/// Long-lived handler state plus the methods callable on it.
///
/// Built once by the worker factory; calls run sequentially with exclusive
/// access to the state.
pub struct HandlerRegistry<S> {
    state: S,
    handlers: HashMap<String, Handler<S>>,
}

impl<S> fmt::Debug for HandlerRegistry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

impl<S> HandlerRegistry<S> {
    pub fn new(state: S) -> Self {
        Self {
            state,
            handlers: HashMap::new(),
        }
    }

    /// Register a handler receiving the raw argument map.
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<&mut Self, RegistryError>
    where
        F: Fn(&mut S, Arguments) -> Result<Value, CallError> + 'static,
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.handlers.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.handlers.insert(name.to_string(), Box::new(handler));
        Ok(self)
    }

    /// Register a handler with typed parameters and return value.
    ///
    /// The argument map is deserialized into `A`; a mismatch is reported as
    /// `InvalidArguments`. Errors returned by the handler are reported as
    /// `HandlerFailed` using their `Display` text.
    pub fn register_typed<A, R, E, F>(
        &mut self,
        name: &str,
        handler: F,
    ) -> Result<&mut Self, RegistryError>
    where
        A: DeserializeOwned,
        R: Serialize,
        E: Display,
        F: Fn(&mut S, A) -> Result<R, E> + 'static,
    {
        self.register(name, move |state, arguments| {
            let params: A = serde_json::from_value(Value::Object(arguments))
                .map_err(|e| CallError::invalid_arguments(e.to_string()))?;
            let returned = handler(state, params)
                .map_err(|e| CallError::handler_failed(e.to_string()))?;
            serde_json::to_value(returned).map_err(|e| {
                CallError::handler_failed(format!("failed to serialize result: {}", e))
            })
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    /// Run the handler registered under `method`.
    pub fn invoke(&mut self, method: &str, arguments: Arguments) -> Result<Value, CallError> {
        let handler = self
            .handlers
            .get(method)
            .ok_or_else(|| CallError::unknown_method(method))?;
        handler(&mut self.state, arguments)
    }
}
