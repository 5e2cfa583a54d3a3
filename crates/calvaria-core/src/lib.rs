//! # Calvaria Core
//!
//! The numerical backbone of the Calvaria planning engine. This crate traces
//! the acoustic path of every transducer element through a CT volume of the
//! skull, derives per-channel phase corrections and activation from those
//! traces, and estimates the resulting pressure envelope and thermal dose.
//!
//! ## Architecture
//!
//! Planning methods implement the [`planner::BeamPlanner`] trait. The
//! implementation is straight-ray tracing
//! ([`planner::raytrace::RayTracePlanner`]); [`planner::session::PlanSession`]
//! owns the mutable inputs and publishes complete result batches.
//!
//! ## Modules
//!
//! - [`volume`]: CT volume, metadata and voxel sampling.
//! - [`types`]: Plan parameters, ray data, correction and sonication types.
//! - [`planner`]: Planner trait, ray tracer and session.
//! - [`correction`]: Phase correction and channel activation.
//! - [`envelope`]: Point-source pressure envelope around the focus.
//! - [`thermal`]: CEM43 dose from thermometry series.
//! - [`report`]: Aggregates, histograms, channel detail and text exports.

pub mod correction;
pub mod envelope;
pub mod planner;
pub mod report;
pub mod thermal;
pub mod types;
pub mod volume;

pub use planner::raytrace::RayTracePlanner;
pub use planner::session::PlanSession;
pub use planner::{BeamPlanner, PlanError};
pub use types::{CorrectionVector, ElementStatus, ParamError, PlanParams, RayBatch, RayData, Target};
pub use volume::{CtVolume, Interpolation, VolumeMetadata};
