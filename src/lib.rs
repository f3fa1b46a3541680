pub mod broker;
pub mod config;
pub mod demo;
pub mod envelope;
pub mod error;
pub mod transport;
pub mod worker;

pub use broker::{Broker, Submission};
pub use config::{BrokerConfig, ConfigLayer, load_config};
pub use envelope::{Arguments, Call, CallError, CallKey, ErrorKind, Response, WorkerMessage};
pub use error::{BrokerError, BrokerResult, RegistryError, WorkerError};
pub use transport::WorkerCommand;
pub use worker::{HandlerRegistry, WorkerRuntime};
