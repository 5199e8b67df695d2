//! Runtime configuration for gpu-picker.
//!
//! Configuration is loaded from a JSON file or constructed programmatically.
//! Command-line flags override file values.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::gpu::device::DEFAULT_PREFIX;
use crate::gpu::query::NvidiaSmi;
use crate::gpu::selector::RetryPolicy;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "gpu-picker", about = "Find and claim an idle GPU", version)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "gpu-picker.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print the number of GPUs on this host.
    Count,

    /// Print which GPUs are free.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Print the first free GPU; exits with status 2 if none is free.
    Select {
        /// Block until a GPU is free when positive.
        #[arg(short, long, allow_negative_numbers = true)]
        wait: Option<i64>,

        /// Assume this many GPUs instead of probing.
        #[arg(long)]
        count: Option<usize>,

        /// Device name prefix.
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Resolve a selector (index, name, `auto` or `none`) and activate it.
    Init {
        /// GPU selector; falls back to the config file.
        #[arg(short, long)]
        gpu: Option<String>,

        /// Device name prefix.
        #[arg(long)]
        prefix: Option<String>,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Device selection settings.
    pub device: DeviceConfig,

    /// External tool settings.
    pub tool: ToolConfig,
}

/// Device selection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Selector used by `init` when `--gpu` is not given (absent = CPU).
    pub selector: Option<String>,

    /// Device name prefix (e.g. "cuda").
    pub prefix: String,

    /// Positive values make `select` block until a GPU is free.
    pub wait_secs: i64,

    /// Number of GPUs to assume instead of probing.
    pub device_count: Option<usize>,

    /// Pause between scans while waiting, in milliseconds.
    pub retry_interval_ms: u64,

    /// Maximum number of scans while waiting (absent = no limit).
    pub max_scans: Option<u32>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            selector: None,
            prefix: DEFAULT_PREFIX.to_string(),
            wait_secs: 0,
            device_count: None,
            retry_interval_ms: 2000,
            max_scans: None,
        }
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Path to the `nvidia-smi` binary.
    pub smi_path: PathBuf,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            smi_path: PathBuf::from("nvidia-smi"),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Querier for the configured `nvidia-smi` binary.
    pub fn querier(&self) -> NvidiaSmi {
        NvidiaSmi::new(&self.tool.smi_path)
    }

    /// Retry policy for `wait_secs`, with the configured interval and limit.
    pub fn retry_policy(&self, wait_secs: i64) -> RetryPolicy {
        if wait_secs <= 0 {
            return RetryPolicy::no_wait();
        }
        let policy = RetryPolicy::unbounded(Duration::from_millis(self.device.retry_interval_ms));
        match self.device.max_scans {
            Some(max) => policy.with_max_scans(max),
            None => policy,
        }
    }
}
