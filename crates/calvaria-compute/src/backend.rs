//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait abstracts over execution strategies so that the
//! ray tracing and envelope code in `calvaria-core` stays scheduling-agnostic.

use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Output length mismatch: expected {expected}, produced {produced}")]
    LengthMismatch { expected: usize, produced: usize },
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    Cpu,
}

/// Abstraction over compute backends.
///
/// Implementations must invoke every index exactly once and must not reorder
/// outputs: `parallel_fill` returns element `i` at position `i` regardless of
/// the order in which the work items ran.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Evaluate `fill_fn` for every index in `0..len` and collect the results.
    ///
    /// This is the entry point for the envelope summation: each grid voxel is
    /// independent of every other.
    fn parallel_fill(
        &self,
        len: usize,
        fill_fn: &(dyn Fn(usize) -> f64 + Send + Sync),
    ) -> Result<Vec<f64>, ComputeError>;

    /// Run `task` once for every index in `0..len`.
    ///
    /// Used for per-element ray casts, where each task writes its result into
    /// a slot owned by that index.
    fn for_each_index(&self, len: usize, task: &(dyn Fn(usize) + Send + Sync));
}
