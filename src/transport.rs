//! Channel transport between the broker and its worker process.
//!
//! The worker's stdin carries calls and its stdout carries worker messages,
//! each framed as `Content-Length: N\r\n\r\n{json}`. The worker's stderr is
//! inherited so its logs land next to the broker's.
//!
//! # Components
//!
//! - `codec`: frame encoding/decoding (async for the broker, blocking for the worker)
//! - `process`: spawning and terminating the worker process
//! - `writer`: the single task writing calls to the worker's stdin
//! - `collector`: the single task reading the worker's stdout into the pending table

pub mod codec;
mod collector;
mod process;
mod writer;

pub use process::WorkerCommand;

pub(crate) use collector::{CollectorHandle, ReadyInfo, spawn_collector_task};
pub(crate) use process::{WorkerProcess, spawn_worker, terminate};
pub(crate) use writer::{WriterTaskHandle, spawn_writer_task};
