//! Envelope types exchanged between the broker and the worker process.
//!
//! - `CallKey`: unique identifier correlating a call with its response
//! - `Call`: request naming a worker method and its keyword arguments
//! - `Response`: outcome of a call, carrying either a result or a `CallError`
//! - `WorkerMessage`: everything the worker writes back (ready handshake, responses)

mod call;
mod key;
mod response;

pub use call::{Arguments, Call};
pub use key::CallKey;
pub use response::{CallError, ErrorKind, Response, WorkerMessage};
