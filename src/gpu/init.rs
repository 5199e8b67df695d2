//! Resolve a user-supplied device selector and activate the device.

use thiserror::Error;
use tracing::{error, info};

use super::backend::ComputeBackend;
use super::device::{DeviceSelector, DeviceTarget, InitOutcome};
use super::query::{DeviceQuerier, QueryError};
use super::selector::{select_free, SelectError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("Failed to init GPU {selector}: {reason}. Aborting...")]
    DeviceInitFailed { selector: String, reason: String },

    #[error(transparent)]
    Query(#[from] QueryError),
}

impl From<SelectError> for InitError {
    fn from(err: SelectError) -> Self {
        match err {
            SelectError::Query(e) => Self::Query(e),
            SelectError::Cancelled => Self::DeviceInitFailed {
                selector: "auto".to_string(),
                reason: "waiting for a free GPU was cancelled".to_string(),
            },
        }
    }
}

/// Resolve `selector` and activate the device in `backend`.
///
/// `none` returns [`InitOutcome::CpuFallback`] without touching the backend.
/// `auto` takes the first idle device without waiting. Bare indices get
/// `prefix` prepended; other names are passed through as is. A device that
/// fails to activate is an error; there is no silent CPU fallback.
pub fn init_device<Q, B>(
    selector: impl Into<DeviceSelector>,
    prefix: &str,
    querier: Q,
    mut backend: B,
) -> Result<InitOutcome, InitError>
where
    Q: DeviceQuerier,
    B: ComputeBackend,
{
    let selector = selector.into();
    let original = selector.to_string();

    let device = match selector {
        DeviceSelector::None => return Ok(InitOutcome::CpuFallback),
        DeviceSelector::Auto => match select_free(querier, 0, None, prefix)? {
            Some(handle) => {
                info!(device = %handle, "Automatically assigning free GPU {handle}");
                handle.to_string()
            }
            None => {
                let err = InitError::DeviceInitFailed {
                    selector: original,
                    reason: "no free GPU".to_string(),
                };
                error!("{err}");
                return Err(err);
            }
        },
        DeviceSelector::Explicit {
            target: DeviceTarget::Index(index),
            ..
        } => format!("{prefix}{index}"),
        DeviceSelector::Explicit {
            target: DeviceTarget::Name(name),
            ..
        } => name,
    };

    if let Err(e) = backend.activate(&device) {
        let err = InitError::DeviceInitFailed {
            selector: original,
            reason: e.to_string(),
        };
        error!(device = %device, "{err}");
        return Err(err);
    }

    info!(device = %device, "Initialising GPU to {device}");
    Ok(InitOutcome::Device(device))
}
