//! Demo handlers served by `offload worker`.
//!
//! Used by the command-line tool and the integration tests to exercise the
//! broker end to end without any external dependency.

use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::envelope::CallError;
use crate::error::RegistryError;
use crate::worker::HandlerRegistry;

/// State shared by all demo handlers.
#[derive(Debug)]
pub struct DemoProcessor {
    name: String,
    calls_served: u64,
}

impl DemoProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls_served: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calls_served(&self) -> u64 {
        self.calls_served
    }

    fn uppercase(&mut self, args: UppercaseArgs) -> String {
        self.calls_served += 1;
        if let Some(ms) = args.delay_ms {
            thread::sleep(Duration::from_millis(ms));
        }
        format!("{}: {}", self.name, args.text.to_uppercase())
    }
}

#[derive(Deserialize)]
struct UppercaseArgs {
    text: String,
    #[serde(default)]
    delay_ms: Option<u64>,
}

#[derive(Deserialize)]
struct AddArgs {
    a: i64,
    b: i64,
}

#[derive(Deserialize)]
struct SleepArgs {
    ms: u64,
}

#[derive(Deserialize)]
struct MessageArgs {
    message: String,
}

#[derive(Deserialize)]
struct ExitArgs {
    #[serde(default)]
    code: i32,
}

/// Registry with every demo method.
///
/// - `uppercase {text, delay_ms?}`: `"<name>: <TEXT>"`
/// - `echo {..}`: the argument object unchanged
/// - `add {a, b}`: integer sum
/// - `sleep {ms}`: blocks the worker, returns `null`
/// - `fail {message}`: always fails with `message`
/// - `panic {message}`: panics inside the handler
/// - `print {message}`: prints `message` to stdout, returns it
/// - `counter`: calls served by `uppercase` so far
/// - `exit {code}`: terminates the worker process
pub fn demo_registry(name: &str) -> Result<HandlerRegistry<DemoProcessor>, RegistryError> {
    let mut registry = HandlerRegistry::new(DemoProcessor::new(name));
    registry
        .register_typed("uppercase", |p: &mut DemoProcessor, args: UppercaseArgs| {
            Ok::<_, CallError>(p.uppercase(args))
        })?
        .register("echo", |_, args| Ok(Value::Object(args)))?
        .register_typed("add", |_: &mut DemoProcessor, args: AddArgs| {
            args.a
                .checked_add(args.b)
                .ok_or_else(|| CallError::handler_failed("integer overflow"))
        })?
        .register_typed("sleep", |_: &mut DemoProcessor, args: SleepArgs| {
            thread::sleep(Duration::from_millis(args.ms));
            Ok::<_, CallError>(Value::Null)
        })?
        .register_typed("fail", |_: &mut DemoProcessor, args: MessageArgs| {
            Err::<Value, _>(args.message)
        })?
        .register_typed("panic", |_: &mut DemoProcessor, args: MessageArgs| -> Result<Value, String> {
            panic!("{}", args.message)
        })?
        .register_typed("print", |_: &mut DemoProcessor, args: MessageArgs| {
            println!("{}", args.message);
            Ok::<_, CallError>(args.message)
        })?
        .register("counter", |p, _| Ok(json!(p.calls_served)))?
        .register_typed("exit", |_: &mut DemoProcessor, args: ExitArgs| -> Result<Value, String> {
            log::warn!(target: "offload::demo", "Exiting on request with code {}", args.code);
            std::process::exit(args.code)
        })?;
    Ok(registry)
}
