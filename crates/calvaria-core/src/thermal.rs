//! CEM43 thermal dose from MR thermometry.
//!
//! The cumulative equivalent minutes at 43 °C accumulate per voxel as
//!
//! $$ \mathrm{CEM43} = \sum_k \tfrac12 \left(R^{43 - T_k} + R^{43 - T_{k+1}}\right)
//!   \frac{\Delta t_k}{60}, \qquad R = \begin{cases} 0.25 & T < 43 \\ 0.5 & T \ge 43
//!   \end{cases} $$
//!
//! with $\Delta t$ in seconds.

use ndarray::{Array3, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference temperature (°C).
pub const REFERENCE_TEMPERATURE_C: f64 = 43.0;

/// Ceiling on `ln(rate)`; keeps sums of many frames finite.
pub const MAX_LOG_RATE: f64 = 460.0;

/// Default half-width of the max-temperature search box (voxels).
pub const MAX_TEMPERATURE_RADIUS: usize = 8;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ThermalError {
    #[error("Thermometry series has no frames")]
    Empty,

    #[error("{times} timestamps for {frames} frames")]
    LengthMismatch { times: usize, frames: usize },

    #[error("Timestamp {index} is not finite or not after the previous one")]
    NonMonotonicTime { index: usize },

    #[error("Frame {index} has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        index: usize,
        expected: [usize; 3],
        found: [usize; 3],
    },

    #[error("Voxel {voxel:?} outside frame shape {shape:?}")]
    OutOfBounds { voxel: [usize; 3], shape: [usize; 3] },
}

/// Time-ordered temperature frames (°C) of equal shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ThermometrySeries {
    times_s: Vec<f64>,
    frames: Vec<Array3<f64>>,
}

fn shape_of(a: &Array3<f64>) -> [usize; 3] {
    let (x, y, z) = a.dim();
    [x, y, z]
}

impl ThermometrySeries {
    pub fn new(times_s: Vec<f64>, frames: Vec<Array3<f64>>) -> Result<Self, ThermalError> {
        if frames.is_empty() {
            return Err(ThermalError::Empty);
        }
        if times_s.len() != frames.len() {
            return Err(ThermalError::LengthMismatch {
                times: times_s.len(),
                frames: frames.len(),
            });
        }
        for (index, w) in times_s.windows(2).enumerate() {
            if !(w[1] > w[0]) || !w[1].is_finite() {
                return Err(ThermalError::NonMonotonicTime { index: index + 1 });
            }
        }
        if !times_s[0].is_finite() {
            return Err(ThermalError::NonMonotonicTime { index: 0 });
        }
        let expected = shape_of(&frames[0]);
        for (index, f) in frames.iter().enumerate().skip(1) {
            let found = shape_of(f);
            if found != expected {
                return Err(ThermalError::ShapeMismatch { index, expected, found });
            }
        }
        Ok(Self { times_s, frames })
    }

    /// Series for one voxel, e.g. a probe trace.
    pub fn single_voxel(times_s: Vec<f64>, temperatures_c: &[f64]) -> Result<Self, ThermalError> {
        let frames = temperatures_c.iter().map(|&t| Array3::from_elem((1, 1, 1), t)).collect();
        Self::new(times_s, frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn shape(&self) -> [usize; 3] {
        shape_of(&self.frames[0])
    }

    pub fn times(&self) -> &[f64] {
        &self.times_s
    }

    pub fn frames(&self) -> &[Array3<f64>] {
        &self.frames
    }
}

/// Dose rate `R^(43 − T)` in equivalent minutes per minute.
///
/// Non-finite temperatures give 0; the exponent is clamped to
/// [`MAX_LOG_RATE`].
pub fn dose_rate(temperature_c: f64) -> f64 {
    if !temperature_c.is_finite() {
        return 0.0;
    }
    let r: f64 = if temperature_c < REFERENCE_TEMPERATURE_C { 0.25 } else { 0.5 };
    ((REFERENCE_TEMPERATURE_C - temperature_c) * r.ln()).min(MAX_LOG_RATE).exp()
}

/// Trapezoidal CEM43 over the full series. A single frame yields zeros.
pub fn compute_thermal_dose(series: &ThermometrySeries) -> Array3<f64> {
    let mut dose = Array3::zeros(series.frames[0].raw_dim());
    for k in 0..series.len().saturating_sub(1) {
        let minutes = (series.times_s[k + 1] - series.times_s[k]) / 60.0;
        Zip::from(&mut dose)
            .and(&series.frames[k])
            .and(&series.frames[k + 1])
            .for_each(|d, &t0, &t1| *d += 0.5 * (dose_rate(t0) + dose_rate(t1)) * minutes);
    }
    dose
}

/// Cumulative dose at one voxel over frames `0..=upto`.
pub fn voxel_dose(series: &ThermometrySeries, voxel: [usize; 3], upto: usize) -> f64 {
    let idx = (voxel[0], voxel[1], voxel[2]);
    (0..upto.min(series.len().saturating_sub(1)))
        .map(|k| {
            let t0 = series.frames[k].get(idx).copied().unwrap_or(f64::NAN);
            let t1 = series.frames[k + 1].get(idx).copied().unwrap_or(f64::NAN);
            0.5 * (dose_rate(t0) + dose_rate(t1)) * (series.times_s[k + 1] - series.times_s[k]) / 60.0
        })
        .sum()
}

/// Hottest voxel near the target at one timepoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperaturePoint {
    pub time_s: f64,
    /// NaN when every voxel in the search box is non-finite.
    pub max_temperature_c: f64,
    pub voxel: [usize; 3],
    /// CEM43 at `voxel`, accumulated up to this timepoint.
    pub dose_cem43: f64,
}

/// Per timepoint, the maximum temperature within `radius` voxels of
/// `target` (box clamped to the frame) and the dose at that voxel.
pub fn max_temperature_track(
    series: &ThermometrySeries,
    target: [usize; 3],
    radius: usize,
) -> Result<Vec<TemperaturePoint>, ThermalError> {
    let shape = series.shape();
    if (0..3).any(|a| target[a] >= shape[a]) {
        return Err(ThermalError::OutOfBounds { voxel: target, shape });
    }
    let lo: Vec<usize> = (0..3).map(|a| target[a].saturating_sub(radius)).collect();
    let hi: Vec<usize> = (0..3).map(|a| (target[a] + radius).min(shape[a] - 1)).collect();

    let track = series
        .frames
        .iter()
        .enumerate()
        .map(|(k, frame)| {
            let mut best: Option<(f64, [usize; 3])> = None;
            for i in lo[0]..=hi[0] {
                for j in lo[1]..=hi[1] {
                    for l in lo[2]..=hi[2] {
                        let t = frame[(i, j, l)];
                        if t.is_finite() && best.map_or(true, |(b, _)| t > b) {
                            best = Some((t, [i, j, l]));
                        }
                    }
                }
            }
            let (max_temperature_c, voxel) = best.unwrap_or((f64::NAN, target));
            TemperaturePoint {
                time_s: series.times_s[k],
                max_temperature_c,
                voxel,
                dose_cem43: voxel_dose(series, voxel, k),
            }
        })
        .collect();
    Ok(track)
}
