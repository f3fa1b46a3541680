//! Shared helpers for broker integration tests.

#[path = "helpers_broker.rs"]
pub mod broker;
