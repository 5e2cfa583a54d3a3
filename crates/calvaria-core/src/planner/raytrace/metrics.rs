//! Skull density ratio and per-element skull metrics.
//!
//! The SDR used here is a normalised mean-HU measure over the bone segment:
//!
//! $$ \mathrm{SDR} = \operatorname{clamp}_{[0,1]}\left(1 -
//!   \frac{\bar{H}_b - H_t}{H_c - H_t}\right) $$
//!
//! where $\bar{H}_b$ is the mean of the window samples between the outer and
//! inner crossings (the discrete HU integral over the segment divided by its
//! length), $H_t$ the bone threshold and $H_c$ the cortical reference. It is
//! non-increasing in $\bar{H}_b$; a ray with no bone path has SDR 0.

use calvaria_materials::SpeedOfSoundProvider;

use super::acoustics::bone_path;
use crate::types::{PlanParams, RayData};

/// Elements whose incidence exceeds this are flagged as geometrically poor.
pub const POOR_INCIDENCE_DEG: f64 = 36.0;

/// Neighbourhood size for the smoothed SDR (a 5×5 patch).
pub const SDR_NEIGHBOURHOOD: usize = 25;

/// Scalar skull metrics for one ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkullMetrics {
    pub sdr: f64,
    pub incidence_angle_deg: f64,
    pub skull_thickness_mm: f64,
    pub normalized_thickness_mm: f64,
}

/// Bone speeds derived from the HU profile, for reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSpeeds {
    pub outer: f64,
    pub inner: f64,
    pub average: f64,
}

fn mean(values: &[f32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64)
}

/// SDR from a mean bone HU.
pub fn sdr_from_mean_hu(mean_hu: f64, threshold: f64, cortical_reference_hu: f64) -> f64 {
    let span = cortical_reference_hu - threshold;
    if !(span > 0.0) || !mean_hu.is_finite() {
        return 0.0;
    }
    (1.0 - (mean_hu - threshold) / span).clamp(0.0, 1.0)
}

/// Compute SDR, incidence angle and thicknesses for a traced ray.
pub fn compute_sdr(ray: &RayData, threshold: f64, params: &PlanParams) -> SkullMetrics {
    let (Some(outer), Some(inner)) = (ray.outer_index, ray.inner_index) else {
        return SkullMetrics {
            sdr: 0.0,
            incidence_angle_deg: 0.0,
            skull_thickness_mm: 0.0,
            normalized_thickness_mm: 0.0,
        };
    };

    let thickness = (ray.inner_distance_mm - ray.outer_distance_mm).max(0.0);
    let path = bone_path(ray, params).map(|p| p.total_mm).unwrap_or(0.0);

    let sdr = if path > 0.0 {
        mean(&ray.samples[outer..=inner])
            .map(|m| sdr_from_mean_hu(m, threshold, params.cortical_reference_hu))
            .unwrap_or(0.0)
    } else {
        0.0
    };

    let incidence = ray
        .outer_normal
        .map(|n| ray.direction.dot(&n).abs().clamp(0.0, 1.0).acos().to_degrees())
        .unwrap_or(0.0);

    SkullMetrics {
        sdr,
        incidence_angle_deg: incidence,
        skull_thickness_mm: thickness,
        normalized_thickness_mm: thickness * incidence.to_radians().cos(),
    }
}

/// Outer-table, inner and path-averaged bone speeds from the HU profile.
pub fn profile_speeds(ray: &RayData, params: &PlanParams) -> Option<ProfileSpeeds> {
    let (outer, inner) = (ray.outer_index?, ray.inner_index?);
    let path = bone_path(ray, params)?;
    let map = &params.hu_speed_map;

    let split = path.split_index.clamp(outer, inner);
    let outer_speed = map.speed_of_sound(mean(&ray.samples[outer..=split])?);
    let inner_speed = match mean(&ray.samples[(split + 1).min(inner)..=inner]) {
        Some(m) if split < inner => map.speed_of_sound(m),
        _ => outer_speed,
    };

    let rest = path.total_mm - path.outer_table_mm;
    let time = path.outer_table_mm / outer_speed + rest / inner_speed;
    let average = if time > 0.0 { path.total_mm / time } else { inner_speed };

    Some(ProfileSpeeds {
        outer: outer_speed,
        inner: inner_speed,
        average,
    })
}

/// Smoothed SDR: mean over each element's neighbourhood, active members only.
///
/// `neighbours[i]` lists element indices near element `i` (itself included).
/// Elements with no active neighbour get 0.
pub fn sdr_neighbourhood_average(rays: &[RayData], neighbours: &[Vec<usize>]) -> Vec<f64> {
    neighbours
        .iter()
        .map(|hood| {
            let (sum, n) = hood
                .iter()
                .filter_map(|&j| rays.get(j))
                .filter(|r| r.is_active())
                .fold((0.0, 0usize), |(s, n), r| (s + r.sdr, n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    use crate::types::ElementStatus;

    fn bone_ray(hu: f32) -> RayData {
        let mut ray = RayData::inactive(0, ElementStatus::Active, Vector3::zeros(), Vector3::x(), Vector3::x(), 100.0);
        ray.window_start_mm = 10.0;
        ray.sample_spacing_mm = 0.5;
        ray.samples = (0..60).map(|i| if (20..=30).contains(&i) { hu } else { 40.0 }).collect();
        ray.outer_index = Some(20);
        ray.inner_index = Some(30);
        ray.outer_distance_mm = 20.0;
        ray.inner_distance_mm = 25.0;
        ray.outer_normal = Some(-Vector3::x());
        ray
    }

    #[test]
    fn test_sdr_bounded_and_non_increasing() {
        let params = PlanParams::default();
        let mut prev = f64::INFINITY;
        for hu in (700..=3500).step_by(100) {
            let m = compute_sdr(&bone_ray(hu as f32), 700.0, &params);
            assert!((0.0..=1.0).contains(&m.sdr));
            assert!(m.sdr <= prev, "SDR increased at {} HU", hu);
            prev = m.sdr;
        }
        assert_eq!(prev, 0.0);
    }

    #[test]
    fn test_radial_ray_has_zero_incidence() {
        let m = compute_sdr(&bone_ray(1500.0), 700.0, &PlanParams::default());
        assert_abs_diff_eq!(m.incidence_angle_deg, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.skull_thickness_mm, 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(m.normalized_thickness_mm, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_oblique_normal() {
        let mut ray = bone_ray(1500.0);
        let a = 30.0_f64.to_radians();
        ray.outer_normal = Some(Vector3::new(-a.cos(), a.sin(), 0.0));
        let m = compute_sdr(&ray, 700.0, &PlanParams::default());
        assert_abs_diff_eq!(m.incidence_angle_deg, 30.0, epsilon = 1e-9);
        assert_abs_diff_eq!(m.normalized_thickness_mm, 5.0 * a.cos(), epsilon = 1e-9);
    }

    #[test]
    fn test_no_bone_gives_zero_sdr() {
        let ray = RayData::inactive(0, ElementStatus::Miss, Vector3::zeros(), Vector3::x(), Vector3::x(), 100.0);
        assert_eq!(compute_sdr(&ray, 700.0, &PlanParams::default()).sdr, 0.0);
        assert_eq!(sdr_from_mean_hu(f64::NAN, 700.0, 2400.0), 0.0);
        assert_eq!(sdr_from_mean_hu(1000.0, 700.0, 700.0), 0.0);
    }

    #[test]
    fn test_profile_speeds_follow_hu_map() {
        let params = PlanParams::default();
        let ray = bone_ray(1500.0);
        let speeds = profile_speeds(&ray, &params).unwrap();
        let expected = params.hu_speed_map.speed_of_sound(1500.0);
        assert_abs_diff_eq!(speeds.outer, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(speeds.inner, expected, epsilon = 1e-9);
        assert_abs_diff_eq!(speeds.average, expected, epsilon = 1e-9);
    }

    #[test]
    fn test_neighbourhood_skips_inactive() {
        let mut rays: Vec<RayData> = (0..3).map(|_| bone_ray(1500.0)).collect();
        rays[0].sdr = 0.2;
        rays[1].sdr = 0.6;
        rays[2].sdr = 0.9;
        rays[2].status = ElementStatus::Miss;
        let hoods = vec![vec![0, 1, 2], vec![1, 0], vec![2]];
        let avg = sdr_neighbourhood_average(&rays, &hoods);
        assert_abs_diff_eq!(avg[0], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(avg[1], 0.4, epsilon = 1e-12);
        assert_eq!(avg[2], 0.0);
    }
}
