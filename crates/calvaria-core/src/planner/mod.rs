//! Beam planner abstraction and implementations.
//!
//! The [`BeamPlanner`] trait defines the interface a planning method must
//! implement: trace every transducer element through the CT volume, turn the
//! traces into a correction vector and estimate the resulting pressure
//! envelope. Ray tracing ([`raytrace::RayTracePlanner`]) is the
//! implementation; [`session::PlanSession`] owns the mutable inputs and
//! publishes complete result batches.

pub mod raytrace;
pub mod session;

use std::sync::atomic::AtomicBool;

use thiserror::Error;

use calvaria_compute::ComputeError;
use calvaria_geometry::transducer::TransducerGeometry;

use crate::envelope::{EnvelopeGrid, EnvelopeImage};
use crate::types::{CorrectionVector, PlanParams, RayData, Target};
use crate::volume::CtVolume;

/// Batch-level planning failures. Per-element problems are never errors;
/// they are recorded in [`RayData::status`].
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No CT volume loaded")]
    MissingVolume,

    #[error("Transducer geometry has no elements")]
    MissingGeometry,

    #[error("Recompute interrupted before all elements were traced")]
    Interrupted,

    #[error("No plan has been computed for the current inputs")]
    NotComputed,

    #[error("Element index {index} out of range for {count} elements")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("Invalid envelope grid: {0}")]
    InvalidGrid(String),

    #[error("Compute backend error: {0}")]
    Compute(#[from] ComputeError),
}

/// The core trait every planning method implements.
pub trait BeamPlanner: Send + Sync {
    /// Trace every element toward the steered target.
    ///
    /// Returns exactly one [`RayData`] per element, in element order. When
    /// `interrupt` is set the trace stops between elements and the partial
    /// result is discarded.
    fn trace_elements(
        &self,
        volume: Option<&CtVolume>,
        geometry: &TransducerGeometry,
        target: &Target,
        params: &PlanParams,
        interrupt: Option<&AtomicBool>,
    ) -> Result<Vec<RayData>, PlanError>;

    /// Derive the per-channel drive settings from a traced batch.
    fn build_correction(&self, rays: &[RayData], params: &PlanParams) -> CorrectionVector;

    /// Estimate the relative pressure field around the target.
    fn compute_envelope(
        &self,
        rays: &[RayData],
        correction: &CorrectionVector,
        target: &Target,
        grid: &EnvelopeGrid,
        params: &PlanParams,
    ) -> Result<EnvelopeImage, PlanError>;

    /// Human-readable name of the planning method.
    fn method_name(&self) -> &str;
}
