//! Worker serve loop.
//!
//! Reads calls from the broker, runs them one at a time against the
//! registry and writes one response per call. Handler failures, unknown
//! methods and even handler panics become failed responses; only the loss of
//! the channel itself stops the loop.

use std::io::{BufRead, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};

use crate::envelope::{Call, CallError, Response, WorkerMessage};
use crate::error::WorkerError;
use crate::transport::codec::{read_frame_blocking, write_frame_blocking};

use super::HandlerRegistry;

/// Serves calls read from `R` and writes worker messages to `W`.
pub struct WorkerRuntime<S, R, W> {
    registry: HandlerRegistry<S>,
    input: R,
    output: W,
}

impl<S, R, W> WorkerRuntime<S, R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(registry: HandlerRegistry<S>, input: R, output: W) -> Self {
        Self {
            registry,
            input,
            output,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry<S> {
        &self.registry
    }

    /// Announce readiness and the available methods.
    pub fn announce(&mut self) -> Result<(), WorkerError> {
        let ready = WorkerMessage::Ready {
            pid: std::process::id(),
            methods: self.registry.methods(),
        };
        write_frame_blocking(&mut self.output, &ready)?;
        Ok(())
    }

    /// Serve calls until the input reaches EOF.
    pub fn serve(&mut self) -> Result<(), WorkerError> {
        loop {
            let call: Call = match read_frame_blocking(&mut self.input) {
                Ok(Some(call)) => call,
                Ok(None) => {
                    log::info!(target: "offload::worker", "Input closed, shutting down");
                    return Ok(());
                }
                Err(e) if e.is_recoverable() => {
                    // No key to answer under; the caller's timeout covers it.
                    log::warn!(
                        target: "offload::worker",
                        "Skipping malformed call: {}",
                        e
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let response = self.handle(call);
            write_frame_blocking(&mut self.output, &WorkerMessage::Response(response))?;
        }
    }

    /// Run a single call and build its response.
    pub fn handle(&mut self, call: Call) -> Response {
        let (method, key, arguments) = call.into_parts();
        log::debug!(
            target: "offload::worker",
            "Handling {} (key={})",
            method,
            key
        );

        let registry = &mut self.registry;
        let outcome = catch_unwind(AssertUnwindSafe(|| registry.invoke(&method, arguments)))
            .unwrap_or_else(|payload| Err(CallError::handler_failed(panic_message(&*payload))));

        match outcome {
            Ok(value) => Response::ok(key, value),
            Err(error) => {
                log::debug!(
                    target: "offload::worker",
                    "Call {} (key={}) failed: {}",
                    method,
                    key,
                    error
                );
                Response::failure(key, error)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
