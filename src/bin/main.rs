use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use offload::demo::demo_registry;
use offload::{Arguments, Broker, BrokerError, Call, WorkerCommand, load_config, worker};
use serde_json::Value;

/// Run computations in a separate worker process
#[derive(Parser)]
#[command(name = "offload")]
#[command(version)]
#[command(about = "Run computations in a separate worker process")]
struct Cli {
    /// Log level filter when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the demo handlers over stdin/stdout (spawned by the broker)
    Worker {
        /// Name reported by the `uppercase` handler
        #[arg(long, default_value = "worker")]
        name: String,

        /// Fail inside the handler factory, before announcing readiness
        #[arg(long, hide = true)]
        fail_startup: bool,

        /// Print a line to stdout inside the handler factory
        #[arg(long, hide = true)]
        startup_banner: bool,
    },
    /// Start a worker, send a call and print the response as JSON
    Call {
        /// Method to call (e.g., uppercase, echo, add)
        method: String,

        /// Argument as KEY=VALUE; VALUE is parsed as JSON, falling back to a string
        #[arg(long = "arg", value_name = "KEY=VALUE", value_parser = parse_argument)]
        arguments: Vec<(String, Value)>,

        /// Number of times to submit the call concurrently
        #[arg(long, default_value_t = 1)]
        repeat: usize,

        /// Config file layered over the defaults and the user config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Name passed to the demo worker
        #[arg(long, default_value = "worker")]
        name: String,
    },
}

fn parse_argument(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", raw))?;
    if key.is_empty() {
        return Err(format!("empty argument name in {:?}", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_logging(default_level: &str) {
    // stdout is the worker transport, so logs always go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    match cli.command {
        Commands::Worker {
            name,
            fail_startup,
            startup_banner,
        } => {
            let result = worker::run(|| {
                if startup_banner {
                    println!("{} is loading", name);
                }
                if fail_startup {
                    return Err(format!("worker '{}' refused to start", name));
                }
                demo_registry(&name).map_err(|e| e.to_string())
            });
            match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Call {
            method,
            arguments,
            repeat,
            config,
            name,
        } => {
            let runtime = match tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("Error: failed to start runtime: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let arguments: Arguments = arguments.into_iter().collect();

            match runtime.block_on(run_calls(config, name, cli.log_level, method, arguments, repeat)) {
                Ok(true) => ExitCode::SUCCESS,
                Ok(false) => ExitCode::FAILURE,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
    }
}

/// Returns whether every call succeeded.
async fn run_calls(
    config: Option<PathBuf>,
    name: String,
    log_level: String,
    method: String,
    arguments: Arguments,
    repeat: usize,
) -> Result<bool, BrokerError> {
    let mut config = load_config(config.as_deref())?;
    let command = match config.worker.take() {
        Some(command) => command,
        None => WorkerCommand::current_exe(["worker", "--name", name.as_str()])?
            .arg("--log-level")
            .arg(log_level),
    };

    let broker = Broker::spawn(config, &command).await?;
    let submissions: Vec<_> = (0..repeat)
        .map(|_| broker.submit(Call::with_arguments(method.as_str(), arguments.clone())))
        .collect();

    let mut all_succeeded = true;
    for submission in submissions {
        match submission.await {
            Ok(response) => {
                all_succeeded &= response.is_success();
                match serde_json::to_string(&response) {
                    Ok(line) => println!("{}", line),
                    Err(e) => {
                        eprintln!("Error: failed to encode response: {}", e);
                        all_succeeded = false;
                    }
                }
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                all_succeeded = false;
            }
        }
    }

    broker.shutdown().await;
    Ok(all_succeeded)
}
