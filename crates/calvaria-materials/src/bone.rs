//! Skull bone acoustic models.
//!
//! The time-of-flight model splits the bone path into an outer (refraction)
//! table travelled at [`BoneSpeeds::refraction_speed`] and the remaining bone
//! at [`BoneSpeeds::bone_speed`]. Separately, [`HuSpeedMap`] converts mean
//! HU values into speeds for the per-element channel reports.

use serde::{Deserialize, Serialize};

use crate::provider::{MaterialError, SpeedOfSoundProvider};
use crate::tissue::WATER_SPEED;

/// Lower end of the user-tunable speed range (m/s).
pub const MIN_USER_SPEED: f64 = 1482.0;
/// Upper end of the user-tunable speed range (m/s).
pub const MAX_USER_SPEED: f64 = 3500.0;

/// Lower end of the supported drive frequency range (Hz).
pub const MIN_FREQUENCY_HZ: f64 = 100e3;
/// Upper end of the supported drive frequency range (Hz).
pub const MAX_FREQUENCY_HZ: f64 = 1000e3;

/// Average and cortical (refraction) bone speeds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoneSpeeds {
    /// Average bone propagation speed (m/s).
    pub bone_speed: f64,
    /// Outer cortical table speed (m/s).
    pub refraction_speed: f64,
}

impl Default for BoneSpeeds {
    fn default() -> Self {
        Self {
            bone_speed: 2652.0,
            refraction_speed: 2900.0,
        }
    }
}

impl BoneSpeeds {
    /// Reject non-positive or non-finite speeds.
    pub fn validate(&self) -> Result<(), MaterialError> {
        for speed in [self.bone_speed, self.refraction_speed] {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(MaterialError::InvalidSpeed(speed));
            }
        }
        Ok(())
    }

    /// Whether both speeds lie in the user-tunable range.
    pub fn in_user_range(&self) -> bool {
        let range = MIN_USER_SPEED..=MAX_USER_SPEED;
        range.contains(&self.bone_speed) && range.contains(&self.refraction_speed)
    }
}

/// Reject non-positive or non-finite drive frequencies.
pub fn validate_frequency(frequency_hz: f64) -> Result<(), MaterialError> {
    if frequency_hz.is_finite() && frequency_hz > 0.0 {
        Ok(())
    } else {
        Err(MaterialError::InvalidFrequency(frequency_hz))
    }
}

/// Affine, monotonic HU → speed-of-sound map, clamped to the user range.
///
/// `c(HU) = c₀ + slope · (HU − HU₀)`, defined through two calibration points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HuSpeedMap {
    /// HU of the low calibration point.
    pub low_hu: f64,
    /// Speed at the low calibration point (m/s).
    pub low_speed: f64,
    /// HU of the high calibration point.
    pub high_hu: f64,
    /// Speed at the high calibration point (m/s).
    pub high_speed: f64,
}

impl Default for HuSpeedMap {
    fn default() -> Self {
        Self {
            low_hu: 0.0,
            low_speed: WATER_SPEED,
            high_hu: 3000.0,
            high_speed: MAX_USER_SPEED,
        }
    }
}

impl HuSpeedMap {
    /// Build a map from two calibration points; speed must not decrease with HU.
    pub fn new(low: (f64, f64), high: (f64, f64)) -> Result<Self, MaterialError> {
        let map = Self {
            low_hu: low.0,
            low_speed: low.1,
            high_hu: high.0,
            high_speed: high.1,
        };
        map.validate()?;
        Ok(map)
    }

    /// Require finite calibration points with HU₁ > HU₀, c₁ ≥ c₀ and c₀ > 0.
    pub fn validate(&self) -> Result<(), MaterialError> {
        let finite = [self.low_hu, self.low_speed, self.high_hu, self.high_speed]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.high_hu <= self.low_hu || self.high_speed < self.low_speed || self.low_speed <= 0.0 {
            return Err(MaterialError::InvalidCalibration(format!(
                "need HU₁ > HU₀ and c₁ ≥ c₀ > 0, got ({}, {}) and ({}, {})",
                self.low_hu, self.low_speed, self.high_hu, self.high_speed
            )));
        }
        Ok(())
    }

    /// Speed increase per HU (m/s/HU).
    pub fn slope(&self) -> f64 {
        (self.high_speed - self.low_speed) / (self.high_hu - self.low_hu)
    }
}

impl SpeedOfSoundProvider for HuSpeedMap {
    fn name(&self) -> &str {
        "Affine HU calibration"
    }

    fn speed_of_sound(&self, hu: f64) -> f64 {
        let c = self.low_speed + self.slope() * (hu - self.low_hu);
        c.clamp(MIN_USER_SPEED, MAX_USER_SPEED)
    }

    fn speed_range(&self) -> (f64, f64) {
        (MIN_USER_SPEED, MAX_USER_SPEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_speeds_are_valid() {
        let speeds = BoneSpeeds::default();
        assert!(speeds.validate().is_ok());
        assert!(speeds.in_user_range());
    }

    #[test]
    fn test_non_positive_speed_rejected() {
        let speeds = BoneSpeeds { bone_speed: 0.0, ..Default::default() };
        assert_eq!(speeds.validate(), Err(MaterialError::InvalidSpeed(0.0)));
        let speeds = BoneSpeeds { refraction_speed: f64::NAN, ..Default::default() };
        assert!(speeds.validate().is_err());
    }

    #[test]
    fn test_map_stays_in_reported_range() {
        let map = HuSpeedMap::default();
        let (lo, hi) = map.speed_range();
        for hu in [-3000.0, 0.0, 700.0, 2400.0, 9000.0] {
            assert!((lo..=hi).contains(&map.speed_of_sound(hu)), "{} at {} HU", map.name(), hu);
        }
    }

    #[test]
    fn test_calibration_must_be_monotonic() {
        assert_eq!(HuSpeedMap::new((0.0, 1482.0), (3000.0, 3500.0)).unwrap(), HuSpeedMap::default());
        // Speed falling with HU.
        assert!(HuSpeedMap::new((0.0, 3500.0), (3000.0, 1500.0)).is_err());
        // Coincident HU points give an infinite slope.
        assert!(HuSpeedMap::new((1000.0, 1500.0), (1000.0, 3000.0)).is_err());
        assert!(HuSpeedMap::new((0.0, f64::NAN), (3000.0, 3500.0)).is_err());

        let decreasing = HuSpeedMap {
            low_speed: 3500.0,
            high_speed: 1500.0,
            ..Default::default()
        };
        assert!(matches!(decreasing.validate(), Err(MaterialError::InvalidCalibration(_))));
        assert!(HuSpeedMap::default().validate().is_ok());
    }

    #[test]
    fn test_frequency_validation() {
        assert!(validate_frequency(650e3).is_ok());
        assert!(validate_frequency(-1.0).is_err());
        assert!(validate_frequency(f64::INFINITY).is_err());
    }

    #[test]
    fn test_hu_map_is_monotonic_and_clamped() {
        let map = HuSpeedMap::default();
        let mut prev = map.speed_of_sound(-2000.0);
        assert_relative_eq!(prev, MIN_USER_SPEED);
        for hu in (-1000..=4000).step_by(50) {
            let c = map.speed_of_sound(hu as f64);
            assert!(c >= prev, "Speed decreased at {} HU", hu);
            prev = c;
        }
        assert_relative_eq!(map.speed_of_sound(5000.0), MAX_USER_SPEED);
        assert_relative_eq!(map.speed_of_sound(1500.0), 1482.0 + 1500.0 * 2018.0 / 3000.0);
    }

    #[test]
    fn test_inverted_calibration_rejected() {
        assert!(HuSpeedMap::new((1000.0, 3000.0), (0.0, 1500.0)).is_err());
    }
}
