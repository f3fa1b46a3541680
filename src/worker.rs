//! Worker side: runs inside the spawned process.
//!
//! The embedding binary detects worker mode (for example a `worker`
//! subcommand) and calls [`run`] with a factory. The factory is invoked
//! exactly once, in the worker process, so expensive initialization such as
//! loading model weights never happens in the broker's process.
//!
//! ```ignore
//! fn main() {
//!     if std::env::args().nth(1).as_deref() == Some("worker") {
//!         let result = offload::worker::run(|| {
//!             let mut registry = HandlerRegistry::new(Pipeline::load("vgg16.h5")?);
//!             registry.register_typed("predict", |p: &mut Pipeline, args: PredictArgs| p.predict(&args.url))?;
//!             Ok::<_, Box<dyn std::error::Error>>(registry)
//!         });
//!         std::process::exit(if result.is_ok() { 0 } else { 1 });
//!     }
//!     // ... start the broker with WorkerCommand::current_exe(["worker"])
//! }
//! ```

mod channel;
mod registry;
mod runtime;

use std::fmt::Display;

pub use registry::HandlerRegistry;
pub use runtime::WorkerRuntime;

use crate::error::WorkerError;
use channel::ProtocolChannel;

/// Build the handler registry and serve calls over stdin/stdout.
///
/// The protocol channel is claimed before the factory runs; from then on
/// the process's stdout goes to stderr (Unix), so handlers may print freely.
/// Returns when the broker closes the worker's stdin. A factory failure is
/// logged and returned before anything is written to the channel, so the
/// broker sees the worker exit without a ready message.
pub fn run<S, F, E>(factory: F) -> Result<(), WorkerError>
where
    F: FnOnce() -> Result<HandlerRegistry<S>, E>,
    E: Display,
{
    log::info!(
        target: "offload::worker",
        "Worker process started (pid={})",
        std::process::id()
    );

    let channel = ProtocolChannel::claim()?;

    let registry = factory().map_err(|e| {
        log::error!(
            target: "offload::worker",
            "Handler factory failed: {}",
            e
        );
        WorkerError::Factory(e.to_string())
    })?;

    log::info!(
        target: "offload::worker",
        "Handlers initialized: {}",
        registry.methods().join(", ")
    );

    let mut runtime = WorkerRuntime::new(registry, channel.reader, channel.writer);
    runtime.announce()?;
    runtime.serve()
}
