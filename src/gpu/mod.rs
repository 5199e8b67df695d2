//! GPU discovery, selection and activation.
//!
//! - [`query`]: device inventory and occupancy via `nvidia-smi`
//! - [`device`]: selectors, handles and init outcomes
//! - [`selector`]: first-free-device scan with retry policy
//! - [`backend`]: compute backends a device is activated in
//! - [`init`]: selector resolution and activation

pub mod backend;
pub mod device;
pub mod init;
pub mod query;
pub mod selector;

pub use backend::{BackendError, ComputeBackend, ProbeBackend, RecordingBackend};
#[cfg(feature = "cuda")]
pub use backend::CudaBackend;
pub use device::{DeviceHandle, DeviceSelector, DeviceStatus, DeviceTarget, InitOutcome};
pub use init::{init_device, InitError};
pub use query::{DeviceQuerier, NvidiaSmi, QueryError, ScriptedQuerier};
pub use selector::{
    device_statuses, select_free, CancelToken, FreeDeviceSelector, RetryPolicy, SelectError,
};
