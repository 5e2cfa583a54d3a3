//! # Calvaria Materials
//!
//! Acoustic tissue models for the Calvaria planning engine. All models that
//! map a CT sample to a propagation speed implement the
//! [`SpeedOfSoundProvider`](provider::SpeedOfSoundProvider) trait.
//!
//! ## Available models
//!
//! | Model | Module | Use |
//! |-------|--------|-----|
//! | Soft tissue / water constants | [`tissue`] | Path outside the skull |
//! | Two-speed cortical bone | [`bone`] | Time-of-flight through the skull |
//! | Affine HU → speed map | [`bone`] | Per-element bone speed reports |

pub mod bone;
pub mod provider;
pub mod tissue;

pub use bone::{validate_frequency, BoneSpeeds, HuSpeedMap};
pub use provider::{MaterialError, SpeedOfSoundProvider};
pub use tissue::{SOFT_TISSUE_SPEED, WATER_SPEED};
