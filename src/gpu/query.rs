//! Device inventory and occupancy queries.
//!
//! The [`DeviceQuerier`] trait is the only way the rest of the crate learns
//! about the host's GPUs. [`NvidiaSmi`] answers by shelling out to the vendor
//! tool; [`ScriptedQuerier`] answers from a script for tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, error};

/// Printed alongside every tool failure.
pub const DRIVER_HINT: &str = "make sure the NVIDIA driver and nvidia-smi are installed";

/// What `nvidia-smi -L` prints on a host without GPUs.
const NO_DEVICES: &str = "No devices were found";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("`{command}` can't be executed: {reason}; {hint}", hint = DRIVER_HINT)]
    ToolUnavailable { command: String, reason: String },
}

/// Source of device inventory and occupancy.
///
/// Every call reflects the host at that moment; implementations must not
/// cache answers.
pub trait DeviceQuerier {
    /// Number of devices, indexed contiguously from 0.
    fn count_devices(&self) -> Result<usize, QueryError>;

    /// Whether no process currently holds device `index`.
    fn is_free(&self, index: usize) -> Result<bool, QueryError>;
}

impl<Q: DeviceQuerier + ?Sized> DeviceQuerier for &Q {
    fn count_devices(&self) -> Result<usize, QueryError> {
        (**self).count_devices()
    }

    fn is_free(&self, index: usize) -> Result<bool, QueryError> {
        (**self).is_free(index)
    }
}

/// Count the devices in `nvidia-smi -L` output.
///
/// Lines look like `GPU 0: NVIDIA GeForce GTX 1070 (UUID: GPU-...)`. Indices
/// are assumed gapless, so counting stops at the first one missing.
pub fn count_listed_devices(listing: &str) -> usize {
    let mut count = 0;
    while listing.contains(&format!("GPU {count}:")) {
        count += 1;
    }
    count
}

/// Whether `nvidia-smi -q -d PIDS` output shows a process holding the device.
///
/// Both the process reference and its memory usage must be present; either
/// one alone is treated as noise.
pub fn shows_active_process(report: &str) -> bool {
    report.contains("Process ID") && report.contains("Used GPU Memory")
}

/// Queries devices through the `nvidia-smi` command-line tool.
#[derive(Debug, Clone)]
pub struct NvidiaSmi {
    program: PathBuf,
}

impl Default for NvidiaSmi {
    fn default() -> Self {
        Self::new("nvidia-smi")
    }
}

impl NvidiaSmi {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run the tool with `args`. Fails only if it cannot be started.
    fn run(&self, args: &[&str]) -> Result<(String, Output), QueryError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        debug!(command = %command, "Running device query");

        match Command::new(&self.program).args(args).output() {
            Ok(output) => Ok((command, output)),
            Err(e) => {
                let err = QueryError::ToolUnavailable {
                    command,
                    reason: e.to_string(),
                };
                error!("{err}");
                Err(err)
            }
        }
    }
}

/// Error for a tool run that exited unsuccessfully.
fn exit_failure(command: String, output: &Output) -> QueryError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    let err = QueryError::ToolUnavailable {
        command,
        reason: format!("{} ({detail})", output.status),
    };
    error!("{err}");
    err
}

impl DeviceQuerier for NvidiaSmi {
    fn count_devices(&self) -> Result<usize, QueryError> {
        let (command, output) = self.run(&["-L"])?;
        let listing = String::from_utf8_lossy(&output.stdout);

        // A working driver with no GPUs exits non-zero but says so.
        if !output.status.success() && !listing.contains(NO_DEVICES) {
            return Err(exit_failure(command, &output));
        }

        let count = count_listed_devices(&listing);
        debug!(count, "Probed device inventory");
        Ok(count)
    }

    fn is_free(&self, index: usize) -> Result<bool, QueryError> {
        let index_arg = index.to_string();
        let (command, output) = self.run(&["-i", &index_arg, "-q", "-d", "PIDS"])?;
        if !output.status.success() {
            return Err(exit_failure(command, &output));
        }

        // Process names are arbitrary bytes; only the markers matter.
        let report = String::from_utf8_lossy(&output.stdout);
        let free = !shows_active_process(&report);
        debug!(device = index, free, "Checked device occupancy");
        Ok(free)
    }
}

#[derive(Debug, Default)]
struct Script {
    count_calls: usize,
    probed: Vec<usize>,
    checks: HashMap<usize, usize>,
}

/// Create a scripted querier for testing.
///
/// Answers from a fixed script and records what was asked.
/// Device `i` is free when `occupancy[i]` is `true`, unless
/// [`free_after`](Self::free_after) says it is still busy for its first few
/// checks.
#[derive(Debug)]
pub struct ScriptedQuerier {
    count: usize,
    occupancy: Vec<bool>,
    busy_checks: HashMap<usize, usize>,
    fail_from_check: Option<usize>,
    script: Mutex<Script>,
}

impl ScriptedQuerier {
    /// One device per entry; `true` means idle.
    pub fn new(occupancy: Vec<bool>) -> Self {
        Self {
            count: occupancy.len(),
            occupancy,
            busy_checks: HashMap::new(),
            fail_from_check: None,
            script: Mutex::new(Script::default()),
        }
    }

    /// Report `count` devices regardless of the occupancy table length.
    /// Indices past the table are reported busy.
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Device `index` reports busy for its first `checks` occupancy checks,
    /// then idle.
    pub fn free_after(mut self, index: usize, checks: usize) -> Self {
        self.busy_checks.insert(index, checks);
        self
    }

    /// Every query from the `n`-th occupancy check on (0-based, counted
    /// across all devices) fails as if the tool vanished. `0` fails
    /// inventory probes too.
    pub fn failing_from(mut self, n: usize) -> Self {
        self.fail_from_check = Some(n);
        self
    }

    /// Indices passed to [`DeviceQuerier::is_free`], in call order.
    pub fn probed(&self) -> Vec<usize> {
        self.lock().probed.clone()
    }

    /// How many times the inventory was probed.
    pub fn count_calls(&self) -> usize {
        self.lock().count_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unavailable() -> QueryError {
        QueryError::ToolUnavailable {
            command: "scripted".to_string(),
            reason: "tool removed".to_string(),
        }
    }
}

impl DeviceQuerier for ScriptedQuerier {
    fn count_devices(&self) -> Result<usize, QueryError> {
        let mut script = self.lock();
        script.count_calls += 1;
        if self.fail_from_check == Some(0) {
            return Err(Self::unavailable());
        }
        Ok(self.count)
    }

    fn is_free(&self, index: usize) -> Result<bool, QueryError> {
        let mut script = self.lock();
        if let Some(n) = self.fail_from_check {
            if script.probed.len() >= n {
                return Err(Self::unavailable());
            }
        }
        script.probed.push(index);

        let seen = script.checks.entry(index).or_insert(0);
        *seen += 1;
        if let Some(&busy) = self.busy_checks.get(&index) {
            return Ok(*seen > busy);
        }
        Ok(self.occupancy.get(index).copied().unwrap_or(false))
    }
}
