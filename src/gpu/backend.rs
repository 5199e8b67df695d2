//! Compute backends that a resolved device is activated in.
//!
//! - [`ProbeBackend`]: checks the device against a fresh inventory count.
//! - [`CudaBackend`] (`cuda` feature): creates a CUDA context on the device.
//! - [`RecordingBackend`]: remembers activations, for tests.

use thiserror::Error;
use tracing::debug;

use super::device::DeviceHandle;
use super::query::{DeviceQuerier, QueryError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Unknown device name {name:?} (expected {prefix}<index>)")]
    UnknownDevice { name: String, prefix: String },

    #[error("Device index {index} out of range: host has {count} GPU(s)")]
    OutOfRange { index: usize, count: usize },

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Driver error: {0}")]
    Driver(String),
}

/// Activates a device for subsequent computation.
pub trait ComputeBackend {
    fn activate(&mut self, device: &str) -> Result<(), BackendError>;
}

impl<B: ComputeBackend + ?Sized> ComputeBackend for &mut B {
    fn activate(&mut self, device: &str) -> Result<(), BackendError> {
        (**self).activate(device)
    }
}

fn parse_device(name: &str, prefix: &str) -> Result<DeviceHandle, BackendError> {
    DeviceHandle::parse(name, prefix).ok_or_else(|| BackendError::UnknownDevice {
        name: name.to_string(),
        prefix: prefix.to_string(),
    })
}

/// Backend that only verifies the device exists on the host.
pub struct ProbeBackend<Q> {
    querier: Q,
    prefix: String,
    active: Option<DeviceHandle>,
}

impl<Q: DeviceQuerier> ProbeBackend<Q> {
    pub fn new(querier: Q, prefix: impl Into<String>) -> Self {
        Self {
            querier,
            prefix: prefix.into(),
            active: None,
        }
    }

    /// Device activated last, if any.
    pub fn active(&self) -> Option<&DeviceHandle> {
        self.active.as_ref()
    }
}

impl<Q: DeviceQuerier> ComputeBackend for ProbeBackend<Q> {
    fn activate(&mut self, device: &str) -> Result<(), BackendError> {
        let handle = parse_device(device, &self.prefix)?;
        let count = self.querier.count_devices()?;
        if handle.index() >= count {
            return Err(BackendError::OutOfRange {
                index: handle.index(),
                count,
            });
        }
        debug!(device = %handle, count, "Device present");
        self.active = Some(handle);
        Ok(())
    }
}

/// Backend that opens a CUDA context on the device and keeps it alive.
#[cfg(feature = "cuda")]
pub struct CudaBackend {
    prefix: String,
    context: Option<std::sync::Arc<cudarc::driver::CudaContext>>,
}

#[cfg(feature = "cuda")]
impl CudaBackend {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            context: None,
        }
    }

    pub fn context(&self) -> Option<&std::sync::Arc<cudarc::driver::CudaContext>> {
        self.context.as_ref()
    }
}

#[cfg(feature = "cuda")]
impl ComputeBackend for CudaBackend {
    fn activate(&mut self, device: &str) -> Result<(), BackendError> {
        let handle = parse_device(device, &self.prefix)?;
        let context = cudarc::driver::CudaContext::new(handle.index())
            .map_err(|e| BackendError::Driver(format!("{e:?}")))?;
        debug!(device = %handle, "CUDA context created");
        self.context = Some(context);
        Ok(())
    }
}

/// Create a recording backend for testing.
///
/// Records activations and rejects configured names.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    activated: Vec<String>,
    rejected: Vec<String>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail activation of `device` as if the driver refused it.
    pub fn reject(mut self, device: impl Into<String>) -> Self {
        self.rejected.push(device.into());
        self
    }

    /// Successfully activated names, in order.
    pub fn activated(&self) -> &[String] {
        &self.activated
    }
}

impl ComputeBackend for RecordingBackend {
    fn activate(&mut self, device: &str) -> Result<(), BackendError> {
        if self.rejected.iter().any(|r| r == device) {
            return Err(BackendError::Driver(format!("no such device {device}")));
        }
        self.activated.push(device.to_string());
        Ok(())
    }
}
