//! Speed-of-sound and time-of-flight model.
//!
//! Outside the skull the wave travels at the soft-tissue speed. The bone
//! path $L_b$ is split into an outer (refraction) table $L_o$ at $c_r$ and
//! the remaining bone at $c_b$:
//!
//! $$ t = \frac{D - L_b}{c_s} + \frac{L_o}{c_r} + \frac{L_b - L_o}{c_b},
//! \qquad \phi = 2\pi f t \bmod 2\pi $$
//!
//! The outer table runs from the outer crossing to the mid-minimum when the
//! profile has a delamination dip, and covers half the bone path otherwise.

use std::f64::consts::TAU;

use calvaria_materials::tissue::SOFT_TISSUE_SPEED;
use calvaria_materials::{validate_frequency, BoneSpeeds};

use crate::types::{PlanParams, RayData};

/// Travel time and phase of one element's ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeOfFlight {
    pub travel_time_s: f64,
    pub phase_rad: f64,
}

/// Split of the bone path into outer table and remaining bone (mm).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonePath {
    pub total_mm: f64,
    pub outer_table_mm: f64,
    /// Window index ending the outer table, inclusive.
    pub split_index: usize,
}

/// Wrap an angle into [0, 2π).
pub fn wrap_phase(phase: f64) -> f64 {
    let wrapped = phase.rem_euclid(TAU);
    // rem_euclid can round up to exactly TAU for tiny negative inputs.
    if wrapped >= TAU {
        0.0
    } else {
        wrapped
    }
}

/// Measure the bone path of a ray with a recorded profile.
pub fn bone_path(ray: &RayData, params: &PlanParams) -> Option<BonePath> {
    let (outer, inner) = (ray.outer_index?, ray.inner_index?);

    // Degenerate single-sample crossing: one sample width, all at bone speed.
    if outer == inner {
        return Some(BonePath {
            total_mm: ray.sample_spacing_mm,
            outer_table_mm: 0.0,
            split_index: outer,
        });
    }

    let total = (ray.inner_distance_mm - ray.outer_distance_mm).max(0.0);

    let dip = ray.mid_minimum_index.filter(|&m| {
        let floor = ray.samples[m] as f64 + params.delamination_contrast_hu;
        let outer_peak = ray.samples[outer..m].iter().cloned().fold(f32::MIN, f32::max) as f64;
        let inner_peak = ray.samples[m + 1..=inner].iter().cloned().fold(f32::MIN, f32::max) as f64;
        outer_peak >= floor && inner_peak >= floor
    });

    let (outer_table, split_index) = match dip {
        Some(m) => (
            (ray.sample_distance(m) - ray.outer_distance_mm).clamp(0.0, total),
            m,
        ),
        None => (total / 2.0, outer + (inner - outer) / 2),
    };

    Some(BonePath {
        total_mm: total,
        outer_table_mm: outer_table,
        split_index,
    })
}

/// Travel time and phase along a ray, or `None` when the ray has no bone
/// profile or the speeds/frequency are unusable.
pub fn compute_travel_time(
    ray: &RayData,
    bone_speeds: &BoneSpeeds,
    frequency_hz: f64,
    params: &PlanParams,
) -> Option<TimeOfFlight> {
    let path = bone_path(ray, params)?;
    path_travel_time(
        ray.target_distance_mm,
        path.total_mm,
        path.outer_table_mm,
        bone_speeds,
        frequency_hz,
    )
}

/// Travel time from an already measured bone path.
///
/// Recomputing from the lengths stored on a traced ray yields exactly the
/// phase recorded during tracing for the same speeds and frequency.
pub fn path_travel_time(
    target_distance_mm: f64,
    bone_path_mm: f64,
    outer_table_mm: f64,
    bone_speeds: &BoneSpeeds,
    frequency_hz: f64,
) -> Option<TimeOfFlight> {
    bone_speeds.validate().ok()?;
    validate_frequency(frequency_hz).ok()?;

    let soft_mm = (target_distance_mm - bone_path_mm).max(0.0);
    let rest_mm = bone_path_mm - outer_table_mm;

    let travel_time_s = 1e-3
        * (soft_mm / SOFT_TISSUE_SPEED
            + outer_table_mm / bone_speeds.refraction_speed
            + rest_mm / bone_speeds.bone_speed);

    Some(TimeOfFlight {
        travel_time_s,
        phase_rad: wrap_phase(TAU * frequency_hz * travel_time_s),
    })
}

/// Time the same path would take entirely in soft tissue (s).
pub fn soft_tissue_time(ray: &RayData) -> f64 {
    1e-3 * (ray.target_distance_mm / SOFT_TISSUE_SPEED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    use crate::types::ElementStatus;

    /// Synthetic ray: 100 mm to target, bone from 20 mm to 26 mm.
    fn synthetic_ray(samples: Vec<f32>, outer: usize, inner: usize) -> RayData {
        let mut ray = RayData::inactive(
            0,
            ElementStatus::Active,
            Vector3::zeros(),
            Vector3::x(),
            Vector3::x(),
            100.0,
        );
        ray.window_start_mm = 10.0;
        ray.sample_spacing_mm = 0.5;
        ray.outer_distance_mm = ray.sample_distance(outer);
        ray.inner_distance_mm = ray.sample_distance(inner);
        ray.samples = samples;
        ray.outer_index = Some(outer);
        ray.inner_index = Some(inner);
        ray
    }

    fn uniform_bone_ray() -> RayData {
        let samples = (0..60).map(|i| if (20..=32).contains(&i) { 1500.0 } else { 40.0 }).collect();
        synthetic_ray(samples, 20, 32)
    }

    #[test]
    fn test_uniform_bone_splits_in_half() {
        let params = PlanParams::default();
        let path = bone_path(&uniform_bone_ray(), &params).unwrap();
        assert_relative_eq!(path.total_mm, 6.0);
        assert_relative_eq!(path.outer_table_mm, 3.0);
    }

    #[test]
    fn test_travel_time_formula() {
        let params = PlanParams::default();
        let speeds = BoneSpeeds::default();
        let tof = compute_travel_time(&uniform_bone_ray(), &speeds, 650e3, &params).unwrap();
        let expected = 1e-3 * (94.0 / 1540.0 + 3.0 / 2900.0 + 3.0 / 2652.0);
        assert_relative_eq!(tof.travel_time_s, expected, max_relative = 1e-12);
        assert_relative_eq!(tof.phase_rad, wrap_phase(TAU * 650e3 * expected), max_relative = 1e-12);
        assert!(tof.phase_rad >= 0.0 && tof.phase_rad < TAU);
    }

    #[test]
    fn test_boneless_path_takes_soft_tissue_time() {
        let ray = synthetic_ray(vec![40.0; 60], 0, 0);
        let tof = path_travel_time(ray.target_distance_mm, 0.0, 0.0, &BoneSpeeds::default(), 650e3).unwrap();
        assert_relative_eq!(tof.travel_time_s, soft_tissue_time(&ray), max_relative = 1e-15);
        assert!(compute_travel_time(&uniform_bone_ray(), &BoneSpeeds::default(), 650e3, &PlanParams::default())
            .unwrap()
            .travel_time_s
            < soft_tissue_time(&uniform_bone_ray()));
    }

    #[test]
    fn test_delamination_dip_ends_outer_table() {
        let mut samples: Vec<f32> =
            (0..60).map(|i| if (20..=32).contains(&i) { 1800.0 } else { 40.0 }).collect();
        samples[24] = 900.0;
        let mut ray = synthetic_ray(samples, 20, 32);
        ray.mid_minimum_index = Some(24);
        let path = bone_path(&ray, &PlanParams::default()).unwrap();
        assert_relative_eq!(path.outer_table_mm, 2.0);
        assert_eq!(path.split_index, 24);
    }

    #[test]
    fn test_degenerate_crossing_uses_one_sample_width() {
        let samples = (0..60).map(|i| if i == 25 { 1500.0 } else { 40.0 }).collect();
        let ray = synthetic_ray(samples, 25, 25);
        let path = bone_path(&ray, &PlanParams::default()).unwrap();
        assert_relative_eq!(path.total_mm, 0.5);
        assert_relative_eq!(path.outer_table_mm, 0.0);
    }

    #[test]
    fn test_invalid_inputs_exclude_element() {
        let params = PlanParams::default();
        let ray = uniform_bone_ray();
        assert!(compute_travel_time(&ray, &BoneSpeeds::default(), 0.0, &params).is_none());
        let bad = BoneSpeeds { bone_speed: -2652.0, ..Default::default() };
        assert!(compute_travel_time(&ray, &bad, 650e3, &params).is_none());
    }

    #[test]
    fn test_travel_time_decreases_with_bone_speed() {
        let params = PlanParams::default();
        let ray = uniform_bone_ray();
        let mut prev = f64::INFINITY;
        for c in (1482..=3500).step_by(100) {
            let speeds = BoneSpeeds { bone_speed: c as f64, ..Default::default() };
            let t = compute_travel_time(&ray, &speeds, 650e3, &params).unwrap().travel_time_s;
            assert!(t < prev);
            prev = t;
        }
    }

    #[test]
    fn test_wrap_phase_range() {
        assert_eq!(wrap_phase(0.0), 0.0);
        assert_relative_eq!(wrap_phase(-0.5), TAU - 0.5);
        assert_relative_eq!(wrap_phase(TAU + 1.0), 1.0, max_relative = 1e-12);
        assert!(wrap_phase(-1e-18) < TAU);
    }
}
