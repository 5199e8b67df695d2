//! Free-device selection with an optional wait-until-available loop.
//!
//! Devices are scanned in ascending index order and the first idle one wins,
//! so lower-numbered devices are preferred. Nothing is reserved: another
//! process doing the same scan can grab the device between our check and its
//! use. The inventory is counted once per selection; if devices appear or
//! disappear while we wait, the indices scanned are best effort.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info};

use super::device::{DeviceHandle, DeviceStatus};
use super::query::{DeviceQuerier, QueryError};

/// Pause between scans while waiting for a device.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Waiting for a free GPU was cancelled")]
    Cancelled,
}

/// Cloneable flag that interrupts a waiting selector.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|p| p.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Sleep for `timeout` or until cancelled. Returns `true` if cancelled.
    fn sleep(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|p| p.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(|p| p.into_inner());
        *guard
    }
}

/// How long to keep scanning when no device is free.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Pause between scans.
    pub interval: Duration,

    /// Maximum number of scans; `None` scans until a device frees up.
    pub max_scans: Option<u32>,

    /// Stops the wait early.
    pub cancel: Option<CancelToken>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::no_wait()
    }
}

impl RetryPolicy {
    /// Scan once and give up.
    pub fn no_wait() -> Self {
        Self {
            interval: DEFAULT_RETRY_INTERVAL,
            max_scans: Some(1),
            cancel: None,
        }
    }

    /// Scan every `interval` until a device is free.
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            max_scans: None,
            cancel: None,
        }
    }

    /// Positive `wait_secs` blocks until a device is free, polling every
    /// [`DEFAULT_RETRY_INTERVAL`]; anything else scans once.
    pub fn from_wait_secs(wait_secs: i64) -> Self {
        if wait_secs > 0 {
            Self::unbounded(DEFAULT_RETRY_INTERVAL)
        } else {
            Self::no_wait()
        }
    }

    pub fn with_max_scans(mut self, max_scans: u32) -> Self {
        self.max_scans = Some(max_scans.max(1));
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sleep between scans; `true` if the wait was cancelled.
    fn pause(&self) -> bool {
        match &self.cancel {
            Some(token) => token.sleep(self.interval),
            None => {
                std::thread::sleep(self.interval);
                false
            }
        }
    }
}

/// Picks the first idle device reported by a [`DeviceQuerier`].
pub struct FreeDeviceSelector<Q> {
    querier: Q,
    policy: RetryPolicy,
    prefix: String,
}

impl<Q: DeviceQuerier> FreeDeviceSelector<Q> {
    pub fn new(querier: Q, policy: RetryPolicy, prefix: impl Into<String>) -> Self {
        Self {
            querier,
            policy,
            prefix: prefix.into(),
        }
    }

    /// Find an idle device, waiting according to the retry policy.
    ///
    /// `device_count` skips the inventory probe. `Ok(None)` means nothing was
    /// free within the policy's scans.
    pub fn select(
        &self,
        device_count: Option<usize>,
    ) -> Result<Option<DeviceHandle>, SelectError> {
        let count = match device_count {
            Some(n) => n,
            None => self.querier.count_devices()?,
        };

        let mut scans: u32 = 0;
        loop {
            if self.is_cancelled() {
                return Err(SelectError::Cancelled);
            }

            scans += 1;
            if let Some(index) = self.scan(count)? {
                let handle = DeviceHandle::new(self.prefix.as_str(), index);
                debug!(device = %handle, scans, "Found free GPU");
                return Ok(Some(handle));
            }

            if self.policy.max_scans.is_some_and(|max| scans >= max) {
                debug!(count, scans, "No free GPU");
                return Ok(None);
            }

            if scans == 1 {
                info!(
                    count,
                    interval_ms = self.policy.interval.as_millis() as u64,
                    "All GPUs busy, waiting for one to become free"
                );
            }
            if self.policy.pause() {
                return Err(SelectError::Cancelled);
            }
        }
    }

    /// Index of the lowest idle device in `0..count`.
    fn scan(&self, count: usize) -> Result<Option<usize>, QueryError> {
        for index in 0..count {
            if self.querier.is_free(index)? {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }

    fn is_cancelled(&self) -> bool {
        self.policy
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }
}

/// Find an idle device.
///
/// Positive `wait_secs` blocks until one is free, rescanning every two
/// seconds with no upper bound; otherwise a single scan is made and
/// `Ok(None)` returned if every device is busy. `device_count` overrides the
/// inventory probe.
pub fn select_free<Q: DeviceQuerier>(
    querier: Q,
    wait_secs: i64,
    device_count: Option<usize>,
    prefix: &str,
) -> Result<Option<DeviceHandle>, SelectError> {
    let policy = RetryPolicy::from_wait_secs(wait_secs);
    FreeDeviceSelector::new(querier, policy, prefix).select(device_count)
}

/// Occupancy of every device on the host.
pub fn device_statuses<Q: DeviceQuerier>(querier: Q) -> Result<Vec<DeviceStatus>, QueryError> {
    let count = querier.count_devices()?;
    (0..count)
        .map(|index| {
            querier
                .is_free(index)
                .map(|free| DeviceStatus { index, free })
        })
        .collect()
}
