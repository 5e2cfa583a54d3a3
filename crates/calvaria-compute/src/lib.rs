//! # Calvaria Compute
//!
//! Execution backend abstraction for the Calvaria planning engine. This crate
//! provides a [`ComputeBackend`](backend::ComputeBackend) trait that isolates
//! the acoustics code from how per-element and per-voxel work is scheduled.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Status |
//! |---------|-------------|--------|
//! | Serial (calling thread) | always | Implemented |
//! | CPU (Rayon) | `cpu` (default) | Implemented |
//!
//! Both backends return results in index order, so a plan computed on one is
//! bit-identical to a plan computed on the other.

pub mod backend;
pub mod serial;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo};
pub use serial::SerialBackend;

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;
