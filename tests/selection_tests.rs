//! Free-device selection against scripted and fake-tool queriers.

use std::time::{Duration, Instant};

use gpu_picker::gpu::{
    select_free, DeviceQuerier, FreeDeviceSelector, RetryPolicy, ScriptedQuerier, SelectError,
};

#[test]
fn test_lowest_free_index_wins_with_count_override() {
    // free, free, occupied
    let q = ScriptedQuerier::new(vec![true, true, false]);
    let handle = select_free(&q, 0, Some(3), "cuda").unwrap().unwrap();
    assert_eq!(handle.to_string(), "cuda0");
    assert_eq!(q.probed(), vec![0]);
}

#[test]
fn test_all_busy_without_wait_returns_immediately() {
    let q = ScriptedQuerier::new(vec![false, false, false]);

    let start = Instant::now();
    assert_eq!(select_free(&q, 0, None, "cuda").unwrap(), None);
    assert_eq!(select_free(&q, -5, None, "cuda").unwrap(), None);
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(q.probed(), vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn test_count_larger_than_inventory_scans_every_index() {
    let q = ScriptedQuerier::new(vec![false]).with_count(4);
    assert_eq!(select_free(&q, 0, None, "cuda").unwrap(), None);
    assert_eq!(q.probed(), vec![0, 1, 2, 3]);
}

#[test]
fn test_wait_returns_device_once_it_frees_up() {
    let q = ScriptedQuerier::new(vec![false, false, false]).free_after(2, 1);
    let interval = Duration::from_millis(20);
    let selector = FreeDeviceSelector::new(&q, RetryPolicy::unbounded(interval), "cuda");

    let start = Instant::now();
    let handle = selector.select(None).unwrap().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(handle.to_string(), "cuda2");
    assert!(elapsed >= interval);
    assert!(elapsed < Duration::from_secs(1));
    assert_eq!(q.count_calls(), 1);
}

#[test]
fn test_positive_wait_uses_two_second_interval() {
    let q = ScriptedQuerier::new(vec![false]).free_after(0, 1);

    let start = Instant::now();
    let handle = select_free(&q, 1, None, "cuda").unwrap().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(handle.index(), 0);
    assert!(elapsed >= Duration::from_secs(2));
    assert!(elapsed < Duration::from_secs(4));
}

#[test]
fn test_tool_failure_is_not_retried() {
    let q = ScriptedQuerier::new(vec![false]).failing_from(0);
    let err = select_free(&q, 1, None, "cuda").unwrap_err();
    assert!(matches!(err, SelectError::Query(_)));
    assert!(q.probed().is_empty());
}

#[cfg(unix)]
mod fake_tool {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    use super::*;
    use gpu_picker::gpu::{NvidiaSmi, QueryError};

    /// Write an executable stand-in for `nvidia-smi` named `name`.
    fn write_tool(dir: &Path, name: &str, script: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Two GPUs; the first runs a process whose name is not valid UTF-8.
    const TWO_GPUS: &str = r#"#!/bin/sh
if [ "$1" = "-L" ]; then
    echo "GPU 0: NVIDIA GeForce GTX 1070 (UUID: GPU-0000)"
    echo "GPU 1: NVIDIA GeForce GTX 1070 (UUID: GPU-0001)"
    exit 0
fi
if [ "$1" = "-i" ] && [ "$2" = "0" ]; then
    echo "    Processes"
    echo "        Process ID                        : 4242"
    printf '            Name                          : tr\377in.py\n'
    echo "        Used GPU Memory                   : 7321 MiB"
    exit 0
fi
if [ "$1" = "-i" ] && [ "$2" = "1" ]; then
    echo "    Processes                             : None"
    exit 0
fi
echo "No devices were found" >&2
exit 6
"#;

    /// Driver loaded, no GPUs installed.
    const NO_GPUS: &str = r#"#!/bin/sh
echo "No devices were found"
exit 6
"#;

    /// Driver not loaded.
    const NO_DRIVER: &str = r#"#!/bin/sh
echo "NVIDIA-SMI has failed because it couldn't communicate with the NVIDIA driver."
exit 9
"#;

    // Tools are written and run from a single test so no other test thread
    // forks while a script is still open for writing.
    #[test]
    fn test_nvidia_smi_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let two_gpus = NvidiaSmi::new(write_tool(dir.path(), "two-gpus", TWO_GPUS));
        let no_gpus = NvidiaSmi::new(write_tool(dir.path(), "no-gpus", NO_GPUS));
        let no_driver = NvidiaSmi::new(write_tool(dir.path(), "no-driver", NO_DRIVER));

        assert_eq!(two_gpus.count_devices().unwrap(), 2);
        assert_eq!(two_gpus.is_free(0), Ok(false));
        assert_eq!(two_gpus.is_free(1), Ok(true));

        let handle = select_free(&two_gpus, 0, None, "cuda").unwrap().unwrap();
        assert_eq!(handle.to_string(), "cuda1");

        // A failing per-device query means the tool is unusable.
        let err = two_gpus.is_free(9).unwrap_err();
        assert!(err.to_string().contains("No devices were found"));

        // No GPUs is an empty inventory, not a missing tool.
        assert_eq!(no_gpus.count_devices(), Ok(0));
        assert_eq!(select_free(&no_gpus, 0, None, "cuda"), Ok(None));

        let err = no_driver.count_devices().unwrap_err();
        assert!(matches!(err, QueryError::ToolUnavailable { .. }));
        assert!(matches!(
            select_free(&no_driver, 0, None, "cuda"),
            Err(SelectError::Query(QueryError::ToolUnavailable { .. }))
        ));
    }
}
