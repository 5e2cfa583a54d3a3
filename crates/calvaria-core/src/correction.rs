//! Per-channel phase correction and activation.
//!
//! The drive phase of each active channel is the travel-time phase of its
//! ray, scaled by the correction amount and wrapped to [0, 2π). Amplitude is
//! binary: 1 for active channels and 0 otherwise.

use calvaria_materials::BoneSpeeds;

use crate::planner::raytrace::acoustics::{path_travel_time, wrap_phase};
use crate::types::{CorrectionVector, ElementCorrection, RayData};

/// Build the correction vector for a traced batch.
///
/// The raw phase is recomputed from each ray's stored path lengths with the
/// given speeds and frequency. `correction_amount` is clamped to [0, 1]; a
/// non-finite amount is treated as 0. Elements whose travel time cannot be
/// computed are deactivated.
pub fn build_correction_vector(
    rays: &[RayData],
    bone_speeds: &BoneSpeeds,
    frequency_hz: f64,
    correction_amount: f64,
) -> CorrectionVector {
    let amount = if correction_amount.is_finite() {
        correction_amount.clamp(0.0, 1.0)
    } else {
        0.0
    };

    let channels = rays
        .iter()
        .map(|ray| {
            let tof = ray.is_active().then(|| {
                path_travel_time(
                    ray.target_distance_mm,
                    ray.bone_path_mm,
                    ray.outer_table_mm,
                    bone_speeds,
                    frequency_hz,
                )
            });
            match tof.flatten() {
                Some(tof) => ElementCorrection {
                    phase_rad: wrap_phase(tof.phase_rad * amount),
                    amplitude: 1.0,
                    active: true,
                },
                None => ElementCorrection {
                    phase_rad: 0.0,
                    amplitude: 0.0,
                    active: false,
                },
            }
        })
        .collect();

    CorrectionVector { channels }
}
