//! Worker process lifecycle: spawning and termination.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

/// How to start the worker process.
///
/// The worker must run [`crate::worker::run`] and speak the framed protocol
/// on its stdin/stdout. Usually this is the embedding binary itself started
/// in a worker mode (see [`WorkerCommand::current_exe`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }

    /// The currently running executable, started with `args`.
    pub fn current_exe<I, A>(args: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        Ok(Self::new(std::env::current_exe()?).args(args))
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A spawned worker and its two pipe ends.
pub(crate) struct WorkerProcess {
    pub(crate) child: Child,
    pub(crate) stdin: ChildStdin,
    pub(crate) stdout: ChildStdout,
}

/// Spawn the worker with piped stdin/stdout and inherited stderr.
///
/// The child is killed if its handle is dropped, so a broker that goes away
/// never leaves an orphaned worker behind.
pub(crate) fn spawn_worker(command: &WorkerCommand) -> io::Result<WorkerProcess> {
    log::info!(
        target: "offload::transport::process",
        "Spawning worker: {} {}",
        command.program.display(),
        command.args.join(" ")
    );

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .envs(&command.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("{}: {}", command.program.display(), e),
            )
        })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::other("Failed to capture worker stdin"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("Failed to capture worker stdout"))?;

    Ok(WorkerProcess {
        child,
        stdin,
        stdout,
    })
}

/// Stop the worker: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// On non-Unix platforms the process is killed immediately.
pub(crate) async fn terminate(mut child: Child, grace: Duration) {
    if let Ok(Some(status)) = child.try_wait() {
        log::debug!(
            target: "offload::transport::process",
            "Worker already exited: {}",
            status
        );
        return;
    }

    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            use nix::sys::signal::{Signal, kill};
            use nix::unistd::Pid;

            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                log::debug!(
                    target: "offload::transport::process",
                    "SIGTERM to worker {} failed: {}",
                    pid,
                    e
                );
            } else if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
                log::debug!(
                    target: "offload::transport::process",
                    "Worker {} exited after SIGTERM: {}",
                    pid,
                    status
                );
                return;
            }
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    log::warn!(
        target: "offload::transport::process",
        "Worker did not exit in time, killing it"
    );
    if let Err(e) = child.kill().await {
        log::warn!(
            target: "offload::transport::process",
            "Failed to kill worker: {}",
            e
        );
    }
}
