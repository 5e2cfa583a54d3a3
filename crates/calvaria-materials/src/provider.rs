//! Speed-of-sound provider trait.
//!
//! Implementations map a Hounsfield value to a longitudinal propagation speed
//! in metres per second.

use thiserror::Error;

/// Errors from material models.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MaterialError {
    #[error("Speed of sound must be positive and finite, got {0} m/s")]
    InvalidSpeed(f64),

    #[error("Frequency must be positive and finite, got {0} Hz")]
    InvalidFrequency(f64),

    #[error("Invalid HU calibration: {0}")]
    InvalidCalibration(String),
}

/// Provides HU-dependent propagation speeds.
pub trait SpeedOfSoundProvider: Send + Sync {
    /// Human-readable name of this model.
    fn name(&self) -> &str;

    /// Speed of sound (m/s) for a sample of `hu` Hounsfield units.
    fn speed_of_sound(&self, hu: f64) -> f64;

    /// Speed range this model can return (m/s).
    fn speed_range(&self) -> (f64, f64);
}
