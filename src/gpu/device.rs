//! Device selectors, handles and initialization outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Default backend prefix for device names (`cuda0`, `cuda1`, ...).
pub const DEFAULT_PREFIX: &str = "cuda";

/// What the caller asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// No accelerator; run on the CPU.
    None,

    /// Pick the first idle device.
    Auto,

    /// A specific device, with the text the caller spelled it as.
    Explicit { target: DeviceTarget, raw: String },
}

/// An explicitly requested device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTarget {
    /// Bare index; the backend prefix is prepended.
    Index(usize),

    /// Fully qualified device name, used verbatim.
    Name(String),
}

impl DeviceSelector {
    /// Normalize a textual selector.
    ///
    /// Only the exact spellings `none` and `None` mean CPU. `"0"` is device 0,
    /// not CPU, even though both look falsy: existing launch scripts pass
    /// `--gpu 0` to address the first device and `--gpu none` to disable the
    /// GPU. Keep the two apart.
    pub fn parse(raw: &str) -> Self {
        if raw == "none" || raw == "None" {
            return Self::None;
        }
        if raw.eq_ignore_ascii_case("auto") {
            return Self::Auto;
        }
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(index) = raw.parse::<usize>() {
                return Self::explicit(DeviceTarget::Index(index), raw);
            }
        }
        Self::explicit(DeviceTarget::Name(raw.to_string()), raw)
    }

    fn explicit(target: DeviceTarget, raw: &str) -> Self {
        Self::Explicit {
            target,
            raw: raw.to_string(),
        }
    }

    /// The requested device, unless CPU or automatic selection was asked for.
    pub fn target(&self) -> Option<&DeviceTarget> {
        match self {
            Self::Explicit { target, .. } => Some(target),
            Self::None | Self::Auto => None,
        }
    }
}

impl From<Option<&str>> for DeviceSelector {
    fn from(raw: Option<&str>) -> Self {
        raw.map_or(Self::None, Self::parse)
    }
}

impl From<&str> for DeviceSelector {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<usize> for DeviceSelector {
    fn from(index: usize) -> Self {
        Self::explicit(DeviceTarget::Index(index), &index.to_string())
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Auto => f.write_str("auto"),
            Self::Explicit { raw, .. } => f.write_str(raw),
        }
    }
}

/// A device as addressed by the compute backend: prefix plus index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    prefix: String,
    index: usize,
}

impl DeviceHandle {
    pub fn new(prefix: impl Into<String>, index: usize) -> Self {
        Self {
            prefix: prefix.into(),
            index,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Split `<prefix><index>` back into a handle.
    pub fn parse(name: &str, prefix: &str) -> Option<Self> {
        let digits = name.strip_prefix(prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let index = digits.parse().ok()?;
        Some(Self::new(prefix, index))
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.index)
    }
}

/// Result of device initialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The named device was activated.
    Device(String),

    /// No accelerator requested.
    CpuFallback,
}

impl InitOutcome {
    pub fn is_cpu(&self) -> bool {
        matches!(self, Self::CpuFallback)
    }
}

impl fmt::Display for InitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Device(name) => f.write_str(name),
            Self::CpuFallback => f.write_str("cpu"),
        }
    }
}

/// Occupancy of one device at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    /// Device index.
    pub index: usize,

    /// Whether no process holds the device.
    pub free: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_normalization() {
        assert_eq!(DeviceSelector::from(None), DeviceSelector::None);
        assert_eq!(DeviceSelector::parse("none"), DeviceSelector::None);
        assert_eq!(DeviceSelector::parse("None"), DeviceSelector::None);
        assert_eq!(DeviceSelector::parse("auto"), DeviceSelector::Auto);
        assert_eq!(DeviceSelector::parse("AUTO"), DeviceSelector::Auto);
        assert_eq!(
            DeviceSelector::parse("0").target(),
            Some(&DeviceTarget::Index(0))
        );
        assert_eq!(
            DeviceSelector::parse("3").target(),
            Some(&DeviceTarget::Index(3))
        );
        assert_eq!(DeviceSelector::from(2usize), DeviceSelector::parse("2"));
        assert_eq!(DeviceSelector::Auto.target(), None);
    }

    #[test]
    fn test_selector_names_are_verbatim() {
        for raw in ["cuda1", "NONE", "-1", "", "opencl0:1"] {
            let selector = DeviceSelector::parse(raw);
            assert_eq!(
                selector.target(),
                Some(&DeviceTarget::Name(raw.to_string())),
                "{raw:?}"
            );
            assert_eq!(selector.to_string(), raw);
        }
    }

    #[test]
    fn test_selector_keeps_caller_spelling() {
        let selector = DeviceSelector::parse("007");
        assert_eq!(selector.target(), Some(&DeviceTarget::Index(7)));
        assert_eq!(selector.to_string(), "007");
    }

    #[test]
    fn test_handle_display_and_parse() {
        let handle = DeviceHandle::new("cuda", 1);
        assert_eq!(handle.to_string(), "cuda1");
        assert_eq!(DeviceHandle::parse("cuda1", "cuda"), Some(handle));
        assert_eq!(DeviceHandle::parse("cuda", "cuda"), None);
        assert_eq!(DeviceHandle::parse("opencl1", "cuda"), None);
        assert_eq!(DeviceHandle::parse("cuda1a", "cuda"), None);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(InitOutcome::CpuFallback.to_string(), "cpu");
        assert!(InitOutcome::CpuFallback.is_cpu());
        assert_eq!(InitOutcome::Device("cuda0".into()).to_string(), "cuda0");
    }
}
