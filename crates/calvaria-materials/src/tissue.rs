//! Soft tissue and coupling water constants.

/// Speed of sound in soft tissue (m/s). Used for every sample below the bone
/// threshold.
pub const SOFT_TISSUE_SPEED: f64 = 1540.0;

/// Speed of sound in degassed coupling water at body temperature (m/s).
pub const WATER_SPEED: f64 = 1482.0;
