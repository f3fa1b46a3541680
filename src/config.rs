//! Broker configuration.
//!
//! Settings are fixed when a broker is constructed; there is no runtime
//! reconfiguration. Layers are merged with later layers overriding earlier
//! ones:
//!
//! 1. Programmed defaults
//! 2. User config: `$XDG_CONFIG_HOME/offload/offload.toml`
//!    (fallback: the platform config directory)
//! 3. An explicit config file (e.g. `--config` on the command line)
//!
//! ```toml
//! pool_capacity = 256
//! call_timeout_ms = 300000   # 0 disables the timeout
//!
//! [worker]
//! program = "/usr/local/bin/my-worker"
//! args = ["--model", "vgg16.h5"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};
use crate::transport::WorkerCommand;

/// Default number of submissions allowed in flight at once.
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Default capacity of the queue feeding the writer task.
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;

const DEFAULT_CALL_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Complete broker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Maximum number of submissions dispatched concurrently; further
    /// submissions wait for a free slot before their call is sent.
    pub pool_capacity: usize,
    /// Bound of the queue between dispatchers and the writer task.
    pub outbound_queue_capacity: usize,
    /// Per-call wait limit in milliseconds; `0` waits forever.
    pub call_timeout_ms: u64,
    /// How long to wait for the worker's ready message.
    pub startup_timeout_ms: u64,
    /// Grace period between SIGTERM and SIGKILL on shutdown.
    pub shutdown_timeout_ms: u64,
    /// Worker to spawn; embedders usually pass the command explicitly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerCommand>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            worker: None,
        }
    }
}

/// One configuration layer as read from a file; absent keys keep the value
/// from lower layers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub pool_capacity: Option<usize>,
    pub outbound_queue_capacity: Option<usize>,
    pub call_timeout_ms: Option<u64>,
    pub startup_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
    pub worker: Option<WorkerCommand>,
}

impl ConfigLayer {
    pub fn from_toml_str(text: &str) -> BrokerResult<Self> {
        toml::from_str(text).map_err(|e| BrokerError::config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> BrokerResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| BrokerError::config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&text)
            .map_err(|e| BrokerError::config(format!("{}: {}", path.display(), e)))
    }
}

impl BrokerConfig {
    /// Override fields present in `layer`.
    pub fn apply(&mut self, layer: ConfigLayer) {
        if let Some(v) = layer.pool_capacity {
            self.pool_capacity = v;
        }
        if let Some(v) = layer.outbound_queue_capacity {
            self.outbound_queue_capacity = v;
        }
        if let Some(v) = layer.call_timeout_ms {
            self.call_timeout_ms = v;
        }
        if let Some(v) = layer.startup_timeout_ms {
            self.startup_timeout_ms = v;
        }
        if let Some(v) = layer.shutdown_timeout_ms {
            self.shutdown_timeout_ms = v;
        }
        if let Some(v) = layer.worker {
            self.worker = Some(v);
        }
    }

    /// Reject settings the broker cannot run with.
    pub fn validate(&self) -> BrokerResult<()> {
        if self.pool_capacity == 0 {
            return Err(BrokerError::config("pool_capacity must be at least 1"));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(BrokerError::config(
                "outbound_queue_capacity must be at least 1",
            ));
        }
        if self.startup_timeout_ms == 0 {
            return Err(BrokerError::config("startup_timeout_ms must be at least 1"));
        }
        Ok(())
    }

    /// Per-call timeout, `None` when disabled.
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_ms > 0).then(|| Duration::from_millis(self.call_timeout_ms))
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/offload/offload.toml
/// 2. Otherwise: <platform config dir>/offload/offload.toml
///
/// Returns None if no config directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => dirs::config_dir()?,
    };
    Some(base.join("offload").join("offload.toml"))
}

/// Load the layered configuration.
///
/// A missing user config is fine; a missing explicit file is an error.
pub fn load_config(explicit: Option<&Path>) -> BrokerResult<BrokerConfig> {
    let mut config = BrokerConfig::default();

    if let Some(path) = user_config_path().filter(|p| p.is_file()) {
        log::debug!(
            target: "offload::config",
            "Loading user config from {}",
            path.display()
        );
        config.apply(ConfigLayer::from_file(&path)?);
    }

    if let Some(path) = explicit {
        log::debug!(
            target: "offload::config",
            "Loading config from {}",
            path.display()
        );
        config.apply(ConfigLayer::from_file(path)?);
    }

    config.validate()?;
    Ok(config)
}
