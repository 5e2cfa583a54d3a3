//! Per-element ray casting through the CT volume.
//!
//! A ray runs from the element toward the steered target. A coarse march at
//! the sample spacing finds the first bone sample closest to the element;
//! the skull window of `sample_count` samples then starts `pre_window_mm`
//! before that hit. Within the window:
//!
//! - the **outer crossing** is the first bone sample,
//! - the **inner crossing** is the last bone sample before the profile
//!   returns to soft tissue for good,
//! - the **mid-minimum** is the lowest sample strictly between the two.
//!
//! Only samples up to the target distance take part in the bone analysis.

use nalgebra::Vector3;

use calvaria_geometry::transducer::Element;

use crate::types::{ElementStatus, PlanParams, RayData};
use crate::volume::CtVolume;

/// Cast one element's ray and record its skull profile.
///
/// The returned ray carries geometry and profile only; acoustic and metric
/// fields are filled in by the later stages.
pub fn cast_ray(
    volume: &CtVolume,
    element_index: usize,
    element: &Element,
    focal_target: &Vector3<f64>,
    params: &PlanParams,
) -> RayData {
    let delta = focal_target - element.position;
    let distance = delta.norm();

    if !distance.is_finite() || distance < 1e-9 {
        return RayData::inactive(
            element_index,
            ElementStatus::DegenerateGeometry,
            element.position,
            element.normal,
            Vector3::zeros(),
            0.0,
        );
    }
    let direction = delta / distance;
    let inactive = |status| {
        RayData::inactive(element_index, status, element.position, element.normal, direction, distance)
    };

    if params.validate_sampling().is_err() {
        return inactive(ElementStatus::InvalidParameter);
    }
    let dt = params.sample_spacing_mm;

    if !volume.segment_intersects(&element.position, focal_target) {
        return inactive(ElementStatus::OutsideVolume);
    }

    let threshold = params.threshold_for(volume);
    let interp = params.interpolation;
    let sample_at = |t: f64| volume.sample(&(element.position + direction * t), interp) as f64;

    // Coarse search for the first bone sample from the element side.
    let steps = (distance / dt).floor() as usize;
    let Some(hit) = (0..=steps).map(|i| i as f64 * dt).find(|&t| sample_at(t) >= threshold) else {
        return inactive(ElementStatus::Miss);
    };

    let window_start = (hit - params.pre_window_mm.max(0.0)).max(0.0);
    let count = params.effective_sample_count();
    let samples: Vec<f32> = (0..count)
        .map(|i| volume.sample(&(element.position + direction * (window_start + i as f64 * dt)), interp))
        .collect();

    // Samples beyond the target do not belong to this ray's path.
    let valid = (0..count)
        .take_while(|&i| window_start + i as f64 * dt <= distance + 1e-9)
        .count();

    let is_bone = |i: usize| samples[i] as f64 >= threshold;
    let Some(outer) = (0..valid).find(|&i| is_bone(i)) else {
        return inactive(ElementStatus::Miss);
    };
    let inner = (outer..valid).rev().find(|&i| is_bone(i)).unwrap_or(outer);

    let mid_minimum = if inner >= outer + 2 {
        (outer + 1..inner).min_by(|&a, &b| samples[a].total_cmp(&samples[b]).then(a.cmp(&b)))
    } else {
        None
    };

    let position = |i: usize| window_start + i as f64 * dt;

    // Sub-sample refinement: linear interpolation of the threshold crossing.
    let outer_distance = if outer > 0 {
        let (h0, h1) = (samples[outer - 1] as f64, samples[outer] as f64);
        position(outer - 1) + crossing_fraction(h0, h1, threshold) * dt
    } else {
        position(outer)
    };
    let inner_distance = if inner + 1 < count {
        let (h0, h1) = (samples[inner] as f64, samples[inner + 1] as f64);
        position(inner) + (1.0 - crossing_fraction(h1, h0, threshold)) * dt
    } else {
        position(inner)
    };

    let outer_point = element.position + direction * outer_distance;
    let outer_normal = surface_normal(volume, &outer_point, &direction, params);

    RayData {
        window_start_mm: window_start,
        sample_spacing_mm: dt,
        samples,
        outer_index: Some(outer),
        inner_index: Some(inner),
        mid_minimum_index: mid_minimum,
        outer_distance_mm: outer_distance,
        inner_distance_mm: inner_distance.max(outer_distance),
        outer_normal: Some(outer_normal),
        ..inactive(ElementStatus::Active)
    }
}

/// Fraction in [0, 1] from `below` toward `above` where the profile reaches
/// `threshold`, assuming linear variation between the two samples.
fn crossing_fraction(below: f64, above: f64, threshold: f64) -> f64 {
    let span = above - below;
    if span.abs() < 1e-12 {
        return 1.0;
    }
    ((threshold - below) / span).clamp(0.0, 1.0)
}

/// Outer surface normal from the HU gradient, oriented toward the element.
///
/// Falls back to the reversed ray direction when the gradient vanishes.
fn surface_normal(
    volume: &CtVolume,
    point: &Vector3<f64>,
    direction: &Vector3<f64>,
    params: &PlanParams,
) -> Vector3<f64> {
    let g = volume.gradient(point, params.interpolation);
    let len = g.norm();
    if !len.is_finite() || len < 1e-9 {
        return -direction;
    }
    // HU increases into the bone; the outward normal points the other way.
    let n = -g / len;
    if n.dot(direction) > 0.0 {
        -n
    } else {
        n
    }
}
