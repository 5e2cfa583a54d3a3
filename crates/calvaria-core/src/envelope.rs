//! Relative pressure envelope around the focus.
//!
//! Every active element is treated as a point source at its world position.
//! At an observation point $\mathbf{x}$ with $r_i = |\mathbf{x} - \mathbf{e}_i|$:
//!
//! $$ p(\mathbf{x}) = \left| \sum_i \frac{a_i}{r_i}
//!   e^{\,i\left(2\pi f (r_i / c_s + \delta_i) - \psi_i\right)} \right| $$
//!
//! where $\delta_i = t_i - D_i / c_s$ is the extra delay the skull adds to
//! element $i$'s ray, $\psi_i$ the drive phase and $a_i$ the binary
//! amplitude. The field is normalised to its peak over the grid.

use nalgebra::Vector3;
use ndarray::Array3;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use calvaria_compute::ComputeBackend;
use calvaria_materials::tissue::SOFT_TISSUE_SPEED;
use calvaria_materials::validate_frequency;

use crate::planner::raytrace::acoustics::soft_tissue_time;
use crate::planner::PlanError;
use crate::types::{CorrectionVector, PlanParams, RayData, Target};

/// Largest grid the estimator accepts.
pub const MAX_GRID_POINTS: usize = 256 * 256 * 256;

/// Distances below this are clamped to avoid the point-source singularity (mm).
const MIN_DISTANCE_MM: f64 = 1e-3;

/// Observation grid centred on the steered target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeGrid {
    /// Half-width of the box along each axis (mm).
    pub half_extent_mm: [f64; 3],
    /// Points along each axis. An axis with one point sits on the target.
    pub dims: [usize; 3],
}

impl EnvelopeGrid {
    /// Coarse grid for interactive updates.
    pub fn interactive() -> Self {
        Self {
            half_extent_mm: [10.0; 3],
            dims: [21; 3],
        }
    }

    /// Fine grid for export.
    pub fn export() -> Self {
        Self {
            half_extent_mm: [20.0; 3],
            dims: [81; 3],
        }
    }

    /// Single axial (xy) slice through the target.
    pub fn slice_xy(half_extent_mm: f64, points: usize) -> Self {
        Self {
            half_extent_mm: [half_extent_mm, half_extent_mm, 0.0],
            dims: [points, points, 1],
        }
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spacing(&self) -> [f64; 3] {
        let mut s = [0.0; 3];
        for a in 0..3 {
            if self.dims[a] > 1 {
                s[a] = 2.0 * self.half_extent_mm[a] / (self.dims[a] - 1) as f64;
            }
        }
        s
    }

    fn validate(&self) -> Result<(), PlanError> {
        if self.dims.iter().any(|&n| n == 0) {
            return Err(PlanError::InvalidGrid(format!("zero-sized axis in {:?}", self.dims)));
        }
        if self.dims.iter().try_fold(1usize, |acc, &n| acc.checked_mul(n)).map_or(true, |n| n > MAX_GRID_POINTS) {
            return Err(PlanError::InvalidGrid(format!("{:?} exceeds {} points", self.dims, MAX_GRID_POINTS)));
        }
        if !self.half_extent_mm.iter().all(|h| h.is_finite() && *h >= 0.0) {
            return Err(PlanError::InvalidGrid(format!("bad extent {:?}", self.half_extent_mm)));
        }
        Ok(())
    }
}

/// Normalised envelope samples on an [`EnvelopeGrid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeImage {
    pub dims: [usize; 3],
    /// World position of grid point (0, 0, 0) (mm).
    pub origin: Vector3<f64>,
    pub spacing: [f64; 3],
    /// Values in [0, 1], flattened with z fastest: `(ix * ny + iy) * nz + iz`.
    pub values: Vec<f64>,
    pub peak_index: [usize; 3],
    pub peak_position: Vector3<f64>,
    /// Focal magnitude relative to a perfectly coherent sum, in [0, 1].
    pub beam_value: f64,
}

impl EnvelopeImage {
    pub fn value(&self, ix: usize, iy: usize, iz: usize) -> Option<f64> {
        let [nx, ny, nz] = self.dims;
        if ix >= nx || iy >= ny || iz >= nz {
            return None;
        }
        self.values.get((ix * ny + iy) * nz + iz).copied()
    }

    pub fn position(&self, ix: usize, iy: usize, iz: usize) -> Vector3<f64> {
        self.origin
            + Vector3::new(
                ix as f64 * self.spacing[0],
                iy as f64 * self.spacing[1],
                iz as f64 * self.spacing[2],
            )
    }

    pub fn to_array(&self) -> Array3<f64> {
        let [nx, ny, nz] = self.dims;
        Array3::from_shape_fn((nx, ny, nz), |(i, j, k)| self.value(i, j, k).unwrap_or(0.0))
    }
}

/// One contributing element, precomputed for the inner loop.
struct Source {
    position: Vector3<f64>,
    amplitude: f64,
    /// Phase offset independent of the observation point (rad).
    offset: f64,
    /// Element-to-target distance (mm).
    target_distance: f64,
}

fn collect_sources(rays: &[RayData], correction: &CorrectionVector, frequency_hz: f64) -> Vec<Source> {
    let omega = std::f64::consts::TAU * frequency_hz;
    rays.iter()
        .zip(&correction.channels)
        .filter(|(ray, ch)| ray.is_active() && ch.active && ch.amplitude > 0.0)
        .map(|(ray, ch)| {
            let excess = ray.travel_time_s - soft_tissue_time(ray);
            Source {
                position: ray.origin,
                amplitude: ch.amplitude,
                offset: omega * excess - ch.phase_rad,
                target_distance: ray.target_distance_mm.max(MIN_DISTANCE_MM),
            }
        })
        .collect()
}

fn field_at(point: &Vector3<f64>, sources: &[Source], k_per_mm: f64) -> f64 {
    sources
        .iter()
        .map(|s| {
            let r = (point - s.position).norm().max(MIN_DISTANCE_MM);
            Complex64::from_polar(s.amplitude / r, k_per_mm * r + s.offset)
        })
        .sum::<Complex64>()
        .norm()
}

/// Estimate the relative pressure envelope on `grid` around the target.
///
/// The per-point sums run through `backend`; output order does not depend on
/// the backend. With no contributing element every value is zero.
pub fn calc_envelope(
    rays: &[RayData],
    correction: &CorrectionVector,
    target: &Target,
    grid: &EnvelopeGrid,
    params: &PlanParams,
    backend: &dyn ComputeBackend,
) -> Result<EnvelopeImage, PlanError> {
    grid.validate()?;
    validate_frequency(params.frequency_hz)?;

    let focus = target.steered();
    let spacing = grid.spacing();
    let origin = focus - Vector3::from(grid.half_extent_mm);
    let origin = Vector3::new(
        if grid.dims[0] > 1 { origin.x } else { focus.x },
        if grid.dims[1] > 1 { origin.y } else { focus.y },
        if grid.dims[2] > 1 { origin.z } else { focus.z },
    );

    let sources = collect_sources(rays, correction, params.frequency_hz);
    let k_per_mm = std::f64::consts::TAU * params.frequency_hz / (SOFT_TISSUE_SPEED * 1e3);
    let [_, ny, nz] = grid.dims;
    let len = grid.len();

    let point = |idx: usize| {
        let (ix, rem) = (idx / (ny * nz), idx % (ny * nz));
        let (iy, iz) = (rem / nz, rem % nz);
        origin + Vector3::new(ix as f64 * spacing[0], iy as f64 * spacing[1], iz as f64 * spacing[2])
    };
    let raw = backend.parallel_fill(len, &|idx| field_at(&point(idx), &sources, k_per_mm))?;

    let (peak_flat, peak) = raw
        .iter()
        .enumerate()
        .fold((0, 0.0), |(bi, bv), (i, &v)| if v > bv { (i, v) } else { (bi, bv) });
    let values = if peak > 0.0 {
        raw.iter().map(|v| v / peak).collect()
    } else {
        vec![0.0; len]
    };

    let coherent: f64 = sources.iter().map(|s| s.amplitude / s.target_distance).sum();
    let beam_value = if coherent > 0.0 {
        (field_at(&focus, &sources, k_per_mm) / coherent).clamp(0.0, 1.0)
    } else {
        0.0
    };

    let peak_index = [peak_flat / (ny * nz), (peak_flat / nz) % ny, peak_flat % nz];
    log::debug!(
        "Envelope {:?} from {} sources: peak {:.3e}, beam value {:.3}",
        grid.dims,
        sources.len(),
        peak,
        beam_value
    );

    Ok(EnvelopeImage {
        dims: grid.dims,
        origin,
        spacing,
        values,
        peak_index,
        peak_position: point(peak_flat),
        beam_value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use calvaria_compute::SerialBackend;

    use crate::planner::raytrace::acoustics::wrap_phase;
    use crate::types::{ElementCorrection, ElementStatus};

    /// Four soft-tissue rays on the axes, 60 mm from the origin.
    fn on_axis_rays(skull_delay_s: f64) -> Vec<RayData> {
        let dirs = [Vector3::x(), -Vector3::x(), Vector3::y(), -Vector3::y()];
        dirs.iter()
            .enumerate()
            .map(|(i, d)| {
                let origin = d * 60.0;
                let mut ray = RayData::inactive(i, ElementStatus::Active, origin, -d, -d, 60.0);
                ray.travel_time_s = 1e-3 * (60.0 / SOFT_TISSUE_SPEED) + skull_delay_s * i as f64;
                ray
            })
            .collect()
    }

    fn correction_for(rays: &[RayData], amount: f64) -> CorrectionVector {
        CorrectionVector {
            channels: rays
                .iter()
                .map(|r| ElementCorrection {
                    phase_rad: wrap_phase(std::f64::consts::TAU * 650e3 * r.travel_time_s * amount),
                    amplitude: 1.0,
                    active: true,
                })
                .collect(),
        }
    }

    #[test]
    fn test_corrected_beam_focuses_on_target() {
        let rays = on_axis_rays(2e-7);
        let cv = correction_for(&rays, 1.0);
        let img = calc_envelope(
            &rays,
            &cv,
            &Target::default(),
            &EnvelopeGrid::slice_xy(4.0, 9),
            &PlanParams::default(),
            &SerialBackend,
        )
        .unwrap();

        assert_eq!(img.values.len(), 81);
        assert_eq!(img.peak_index, [4, 4, 0]);
        assert_abs_diff_eq!(img.value(4, 4, 0).unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(img.beam_value, 1.0, epsilon = 1e-9);
        assert!(img.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_uncorrected_skull_delay_loses_coherence() {
        let rays = on_axis_rays(3e-7);
        let img = calc_envelope(
            &rays,
            &correction_for(&rays, 0.0),
            &Target::default(),
            &EnvelopeGrid::slice_xy(4.0, 9),
            &PlanParams::default(),
            &SerialBackend,
        )
        .unwrap();
        assert!(img.beam_value < 0.9);
    }

    #[test]
    fn test_no_sources_gives_zero_field() {
        let rays = on_axis_rays(0.0);
        let mut cv = correction_for(&rays, 1.0);
        for ch in &mut cv.channels {
            ch.active = false;
            ch.amplitude = 0.0;
        }
        let img = calc_envelope(
            &rays,
            &cv,
            &Target::default(),
            &EnvelopeGrid::interactive(),
            &PlanParams::default(),
            &SerialBackend,
        )
        .unwrap();
        assert!(img.values.iter().all(|&v| v == 0.0));
        assert_eq!(img.beam_value, 0.0);
        assert_eq!(img.to_array().dim(), (21, 21, 21));
    }

    #[test]
    fn test_invalid_grid_rejected() {
        let rays = on_axis_rays(0.0);
        let grid = EnvelopeGrid {
            half_extent_mm: [1.0; 3],
            dims: [0, 4, 4],
        };
        let err = calc_envelope(
            &rays,
            &correction_for(&rays, 1.0),
            &Target::default(),
            &grid,
            &PlanParams::default(),
            &SerialBackend,
        );
        assert!(matches!(err, Err(PlanError::InvalidGrid(_))));
    }

    #[test]
    fn test_grid_spacing() {
        let g = EnvelopeGrid::export();
        assert_eq!(g.len(), 81 * 81 * 81);
        assert_abs_diff_eq!(g.spacing()[0], 0.5, epsilon = 1e-12);
        assert_eq!(EnvelopeGrid::slice_xy(5.0, 11).spacing()[2], 0.0);
    }
}
