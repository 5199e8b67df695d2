//! gpu-picker: find an idle GPU on a shared host.
//!
//! Probes the host's GPUs through `nvidia-smi`, picks the lowest-numbered
//! device no process is using (optionally waiting until one frees up), and
//! activates it in a compute backend. A `none` selector falls back to the CPU.

pub mod config;
pub mod gpu;
