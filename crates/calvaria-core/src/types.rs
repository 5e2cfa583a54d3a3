//! Core types shared across the Calvaria engine.
//!
//! This module defines the data structures that flow through the planning
//! pipeline: plan parameters, the focal target, per-element ray data, the
//! correction vector and the sonication snapshot.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use calvaria_materials::{validate_frequency, BoneSpeeds, HuSpeedMap, MaterialError};

use crate::volume::{CtVolume, Interpolation};

/// Minimum number of HU samples recorded along each ray.
pub const MIN_SAMPLE_COUNT: usize = 60;
/// Maximum number of HU samples recorded along each ray.
pub const MAX_SAMPLE_COUNT: usize = 4096;
/// Finest supported distance between ray samples (mm).
pub const MIN_SAMPLE_SPACING_MM: f64 = 0.01;

/// A [`PlanParams`] field the engine cannot run with.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParamError {
    #[error(transparent)]
    Material(#[from] MaterialError),

    #[error("Sample spacing must be finite and at least {min} mm, got {0}", min = MIN_SAMPLE_SPACING_MM)]
    SampleSpacing(f64),

    #[error("Sample count must be at most {max}, got {0}", max = MAX_SAMPLE_COUNT)]
    SampleCount(usize),
}

/// Parameters defining a planning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanParams {
    /// Drive frequency (Hz). User range 100–1000 kHz.
    pub frequency_hz: f64,
    /// Two-speed bone model.
    pub bone_speeds: BoneSpeeds,
    /// Blend between no correction (0) and full geometric correction (1).
    pub correction_amount: f64,
    /// Bone threshold (HU). `None` uses the volume's metadata threshold.
    pub bone_threshold_hu: Option<f64>,
    /// Distance between samples along a ray (mm).
    pub sample_spacing_mm: f64,
    /// Number of samples in the skull window (at least [`MIN_SAMPLE_COUNT`]).
    pub sample_count: usize,
    /// Window start before the first bone hit (mm).
    pub pre_window_mm: f64,
    /// HU at which SDR reaches zero.
    pub cortical_reference_hu: f64,
    /// HU drop below both tables that marks a delamination minimum.
    pub delamination_contrast_hu: f64,
    /// Voxel interpolation.
    pub interpolation: Interpolation,
    /// HU to speed calibration used for the channel speed reports.
    pub hu_speed_map: HuSpeedMap,
}

impl Default for PlanParams {
    fn default() -> Self {
        Self {
            frequency_hz: 650e3,
            bone_speeds: BoneSpeeds::default(),
            correction_amount: 1.0,
            bone_threshold_hu: None,
            sample_spacing_mm: 0.5,
            sample_count: MIN_SAMPLE_COUNT,
            pre_window_mm: 10.0,
            cortical_reference_hu: 2400.0,
            delamination_contrast_hu: 100.0,
            interpolation: Interpolation::Trilinear,
            hu_speed_map: HuSpeedMap::default(),
        }
    }
}

impl PlanParams {
    /// Bone threshold for `volume`: the explicit override if set.
    pub fn threshold_for(&self, volume: &CtVolume) -> f64 {
        self.bone_threshold_hu.unwrap_or(volume.metadata().threshold)
    }

    /// Check speeds, frequency, HU calibration and ray sampling.
    pub fn validate(&self) -> Result<(), ParamError> {
        self.bone_speeds.validate()?;
        validate_frequency(self.frequency_hz)?;
        self.hu_speed_map.validate()?;
        self.validate_sampling()
    }

    /// Bounds on the ray march: spacing from below, sample count from above.
    pub fn validate_sampling(&self) -> Result<(), ParamError> {
        let dt = self.sample_spacing_mm;
        if !(dt.is_finite() && dt >= MIN_SAMPLE_SPACING_MM) {
            return Err(ParamError::SampleSpacing(dt));
        }
        if self.sample_count > MAX_SAMPLE_COUNT {
            return Err(ParamError::SampleCount(self.sample_count));
        }
        Ok(())
    }

    pub fn effective_sample_count(&self) -> usize {
        self.sample_count.max(MIN_SAMPLE_COUNT)
    }
}

/// The focal target: natural focus plus electronic steering (world mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub natural_focus: Vector3<f64>,
    pub steering: Vector3<f64>,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            natural_focus: Vector3::zeros(),
            steering: Vector3::zeros(),
        }
    }
}

impl Target {
    pub fn new(natural_focus: Vector3<f64>) -> Self {
        Self {
            natural_focus,
            steering: Vector3::zeros(),
        }
    }

    /// The point every ray aims at.
    pub fn steered(&self) -> Vector3<f64> {
        self.natural_focus + self.steering
    }
}

/// Outcome of tracing one element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementStatus {
    /// Ray traced through bone to the target.
    Active,
    /// No bone crossing between the element and the target.
    Miss,
    /// Element-to-target segment misses the volume.
    OutsideVolume,
    /// Frequency or speed parameters unusable.
    InvalidParameter,
    /// Element coincides with the target.
    DegenerateGeometry,
    /// No CT volume loaded.
    NoVolume,
}

/// Per-element ray-tracing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayData {
    pub element: usize,
    pub status: ElementStatus,
    /// World position of the element (mm).
    pub origin: Vector3<f64>,
    /// World normal of the element.
    pub element_normal: Vector3<f64>,
    /// Unit direction from element to target.
    pub direction: Vector3<f64>,
    /// Element-to-target distance (mm).
    pub target_distance_mm: f64,
    /// Distance from the element to window sample 0 (mm).
    pub window_start_mm: f64,
    pub sample_spacing_mm: f64,
    /// HU samples across the skull window.
    pub samples: Vec<f32>,
    pub outer_index: Option<usize>,
    pub inner_index: Option<usize>,
    pub mid_minimum_index: Option<usize>,
    /// Refined outer/inner threshold crossings, measured from the element (mm).
    pub outer_distance_mm: f64,
    pub inner_distance_mm: f64,
    /// Outer skull surface normal at the first bone hit, facing the element.
    pub outer_normal: Option<Vector3<f64>>,
    /// Path length through bone (mm).
    pub bone_path_mm: f64,
    /// Part of the bone path travelled at the refraction speed (mm).
    pub outer_table_mm: f64,
    pub travel_time_s: f64,
    pub phase_rad: f64,
    pub sdr: f64,
    pub sdr_avg: f64,
    pub incidence_angle_deg: f64,
    pub skull_thickness_mm: f64,
    pub normalized_thickness_mm: f64,
    pub outer_bone_speed: f64,
    pub inner_bone_speed: f64,
    pub avg_bone_speed: f64,
}

impl RayData {
    /// A ray with no bone measurements.
    pub fn inactive(
        element: usize,
        status: ElementStatus,
        origin: Vector3<f64>,
        element_normal: Vector3<f64>,
        direction: Vector3<f64>,
        target_distance_mm: f64,
    ) -> Self {
        Self {
            element,
            status,
            origin,
            element_normal,
            direction,
            target_distance_mm,
            window_start_mm: 0.0,
            sample_spacing_mm: 0.0,
            samples: Vec::new(),
            outer_index: None,
            inner_index: None,
            mid_minimum_index: None,
            outer_distance_mm: 0.0,
            inner_distance_mm: 0.0,
            outer_normal: None,
            bone_path_mm: 0.0,
            outer_table_mm: 0.0,
            travel_time_s: 0.0,
            phase_rad: 0.0,
            sdr: 0.0,
            sdr_avg: 0.0,
            incidence_angle_deg: 0.0,
            skull_thickness_mm: 0.0,
            normalized_thickness_mm: 0.0,
            outer_bone_speed: 0.0,
            inner_bone_speed: 0.0,
            avg_bone_speed: 0.0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ElementStatus::Active
    }

    /// Whether a bone profile was recorded (outer and inner crossings found).
    pub fn has_bone(&self) -> bool {
        self.outer_index.is_some() && self.inner_index.is_some()
    }

    /// Distance from the element to window sample `i` (mm).
    pub fn sample_distance(&self, i: usize) -> f64 {
        self.window_start_mm + i as f64 * self.sample_spacing_mm
    }

    /// World point at `distance_mm` along the ray.
    pub fn point_at(&self, distance_mm: f64) -> Vector3<f64> {
        self.origin + self.direction * distance_mm
    }

    pub fn outer_point(&self) -> Option<Vector3<f64>> {
        self.has_bone().then(|| self.point_at(self.outer_distance_mm))
    }

    pub fn inner_point(&self) -> Option<Vector3<f64>> {
        self.has_bone().then(|| self.point_at(self.inner_distance_mm))
    }
}

/// A complete, atomically published set of ray data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RayBatch {
    /// Monotonic publish counter of the owning session.
    pub generation: u64,
    pub target: Target,
    pub params: PlanParams,
    pub rays: Vec<RayData>,
}

impl RayBatch {
    /// Batch with every element inactive because no CT is loaded.
    pub fn no_data(generation: u64, target: Target, params: PlanParams, element_count: usize) -> Self {
        let rays = (0..element_count)
            .map(|i| {
                RayData::inactive(
                    i,
                    ElementStatus::NoVolume,
                    Vector3::zeros(),
                    Vector3::zeros(),
                    Vector3::zeros(),
                    0.0,
                )
            })
            .collect();
        Self { generation, target, params, rays }
    }

    pub fn active_count(&self) -> usize {
        self.rays.iter().filter(|r| r.is_active()).count()
    }
}

/// Drive settings for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementCorrection {
    /// Phase in radians, wrapped to [0, 2π).
    pub phase_rad: f64,
    /// 1.0 if active, 0.0 otherwise.
    pub amplitude: f64,
    pub active: bool,
}

/// Per-channel phase/amplitude/activation vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionVector {
    pub channels: Vec<ElementCorrection>,
}

impl CorrectionVector {
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.channels.iter().filter(|c| c.active).count()
    }

    pub fn phases(&self) -> Vec<f64> {
        self.channels.iter().map(|c| c.phase_rad).collect()
    }
}

/// Snapshot of a committed plan, handed to the treatment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sonication {
    pub correction: CorrectionVector,
    pub natural_focus: Vector3<f64>,
    pub steering: Vector3<f64>,
    /// Acoustic power (W).
    pub power_w: f64,
    /// Sonication duration (s).
    pub duration_s: f64,
    pub frequency_hz: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_validate() {
        assert_eq!(PlanParams::default().validate(), Ok(()));
    }

    #[test]
    fn test_sampling_bounds() {
        let tiny = PlanParams {
            sample_spacing_mm: 1e-9,
            ..Default::default()
        };
        assert_eq!(tiny.validate(), Err(ParamError::SampleSpacing(1e-9)));

        let huge = PlanParams {
            sample_count: MAX_SAMPLE_COUNT + 1,
            ..Default::default()
        };
        assert_eq!(huge.validate(), Err(ParamError::SampleCount(MAX_SAMPLE_COUNT + 1)));

        let edge = PlanParams {
            sample_spacing_mm: MIN_SAMPLE_SPACING_MM,
            sample_count: MAX_SAMPLE_COUNT,
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn test_decreasing_calibration_rejected() {
        let params: PlanParams = serde_json::from_str(
            r#"{"hu_speed_map":{"low_hu":0,"low_speed":3500,"high_hu":3000,"high_speed":1500}}"#,
        )
        .unwrap();
        assert!(matches!(
            params.validate(),
            Err(ParamError::Material(MaterialError::InvalidCalibration(_)))
        ));
    }
}
