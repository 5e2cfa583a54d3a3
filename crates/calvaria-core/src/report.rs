//! Plan aggregates, per-channel detail and text exports.
//!
//! Everything here reads a finished batch: aggregates are only ever computed
//! after the full per-element pass.

use std::io::{self, Write};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::planner::raytrace::metrics::POOR_INCIDENCE_DEG;
use crate::planner::PlanError;
use crate::types::{CorrectionVector, ElementStatus, RayData, Target};

/// Incidence histogram: 35 bins over [0°, 36°].
pub const INCIDENCE_BINS: usize = 35;
pub const INCIDENCE_MAX_DEG: f64 = 36.0;
/// SDR histogram: 22 bins over [0, 1].
pub const SDR_BINS: usize = 22;

/// Batch-level aggregates over the active elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub element_count: usize,
    pub active_count: usize,
    pub mean_sdr: f64,
    pub mean_incidence_deg: f64,
    pub mean_skull_thickness_mm: f64,
    /// Active elements beyond the poor-incidence limit.
    pub poor_incidence_count: usize,
}

fn mean_over<'a>(rays: impl Iterator<Item = &'a RayData>, f: impl Fn(&RayData) -> f64) -> f64 {
    let (sum, n) = rays.fold((0.0, 0usize), |(s, n), r| (s + f(r), n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

pub fn summarise(rays: &[RayData]) -> PlanSummary {
    let active = || rays.iter().filter(|r| r.is_active());
    PlanSummary {
        element_count: rays.len(),
        active_count: active().count(),
        mean_sdr: mean_over(active(), |r| r.sdr),
        mean_incidence_deg: mean_over(active(), |r| r.incidence_angle_deg),
        mean_skull_thickness_mm: mean_over(active(), |r| r.skull_thickness_mm),
        poor_incidence_count: active().filter(|r| r.incidence_angle_deg > POOR_INCIDENCE_DEG).count(),
    }
}

/// Fixed-range histogram. Out-of-range values clamp into the end bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub lower: f64,
    pub upper: f64,
    pub counts: Vec<usize>,
}

impl Histogram {
    pub fn new(lower: f64, upper: f64, bins: usize) -> Self {
        Self {
            lower,
            upper,
            counts: vec![0; bins.max(1)],
        }
    }

    pub fn bin_width(&self) -> f64 {
        (self.upper - self.lower) / self.counts.len() as f64
    }

    /// Add a value; non-finite values are ignored.
    pub fn add(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        let last = self.counts.len() - 1;
        let bin = ((value - self.lower) / self.bin_width()).floor();
        let bin = if bin < 0.0 { 0 } else { (bin as usize).min(last) };
        self.counts[bin] += 1;
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }
}

pub fn incidence_histogram(rays: &[RayData]) -> Histogram {
    let mut h = Histogram::new(0.0, INCIDENCE_MAX_DEG, INCIDENCE_BINS);
    rays.iter().filter(|r| r.is_active()).for_each(|r| h.add(r.incidence_angle_deg));
    h
}

pub fn sdr_histogram(rays: &[RayData]) -> Histogram {
    let mut h = Histogram::new(0.0, 1.0, SDR_BINS);
    rays.iter().filter(|r| r.is_active()).for_each(|r| h.add(r.sdr));
    h
}

/// Metrics of one selected channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelDetail {
    pub element: usize,
    pub status: ElementStatus,
    pub active: bool,
    pub incidence_angle_deg: f64,
    pub poor_incidence: bool,
    pub sdr: f64,
    pub sdr_avg: f64,
    pub skull_thickness_mm: f64,
    pub normalized_thickness_mm: f64,
    pub outer_bone_speed: f64,
    pub inner_bone_speed: f64,
    pub avg_bone_speed: f64,
    pub travel_time_s: f64,
    pub phase_rad: f64,
}

pub fn channel_detail(rays: &[RayData], index: usize) -> Result<ChannelDetail, PlanError> {
    let r = rays.get(index).ok_or(PlanError::IndexOutOfRange {
        index,
        count: rays.len(),
    })?;
    Ok(ChannelDetail {
        element: r.element,
        status: r.status,
        active: r.is_active(),
        incidence_angle_deg: r.incidence_angle_deg,
        poor_incidence: r.is_active() && r.incidence_angle_deg > POOR_INCIDENCE_DEG,
        sdr: r.sdr,
        sdr_avg: r.sdr_avg,
        skull_thickness_mm: r.skull_thickness_mm,
        normalized_thickness_mm: r.normalized_thickness_mm,
        outer_bone_speed: r.outer_bone_speed,
        inner_bone_speed: r.inner_bone_speed,
        avg_bone_speed: r.avg_bone_speed,
        travel_time_s: r.travel_time_s,
        phase_rad: r.phase_rad,
    })
}

/// Column separator for the skull-measures report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    #[default]
    Tab,
    Comma,
}

impl Delimiter {
    pub fn as_str(self) -> &'static str {
        match self {
            Delimiter::Tab => "\t",
            Delimiter::Comma => ",",
        }
    }
}

const MEASURE_COLUMNS: [&str; 13] = [
    "element",
    "active",
    "status",
    "sdr",
    "sdr_avg",
    "incidence_deg",
    "thickness_mm",
    "normalized_thickness_mm",
    "bone_path_mm",
    "outer_speed",
    "inner_speed",
    "avg_speed",
    "phase_rad",
];

/// Header plus one row per element.
pub fn write_skull_measures<W: Write>(out: &mut W, rays: &[RayData], delimiter: Delimiter) -> io::Result<()> {
    let sep = delimiter.as_str();
    writeln!(out, "{}", MEASURE_COLUMNS.join(sep))?;
    for r in rays {
        let row = [
            r.element.to_string(),
            u8::from(r.is_active()).to_string(),
            format!("{:?}", r.status),
            format!("{:.4}", r.sdr),
            format!("{:.4}", r.sdr_avg),
            format!("{:.3}", r.incidence_angle_deg),
            format!("{:.3}", r.skull_thickness_mm),
            format!("{:.3}", r.normalized_thickness_mm),
            format!("{:.3}", r.bone_path_mm),
            format!("{:.1}", r.outer_bone_speed),
            format!("{:.1}", r.inner_bone_speed),
            format!("{:.1}", r.avg_bone_speed),
            format!("{:.6}", r.phase_rad),
        ];
        writeln!(out, "{}", row.join(sep))?;
    }
    Ok(())
}

/// ACT file layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActFormat {
    /// Channel count line, then `phase amplitude` per channel.
    #[default]
    Cpc,
    /// Commented CSV header, then `channel,phase,amplitude,active`.
    Workstation,
}

/// Write per-channel phases (radians) and amplitudes.
pub fn write_act<W: Write>(out: &mut W, correction: &CorrectionVector, format: ActFormat) -> io::Result<()> {
    match format {
        ActFormat::Cpc => {
            writeln!(out, "{}", correction.len())?;
            for ch in &correction.channels {
                writeln!(out, "{:.6} {:.1}", ch.phase_rad, ch.amplitude)?;
            }
        }
        ActFormat::Workstation => {
            writeln!(out, "# channel,phase_rad,amplitude,active")?;
            for (i, ch) in correction.channels.iter().enumerate() {
                writeln!(out, "{},{:.6},{:.1},{}", i, ch.phase_rad, ch.amplitude, u8::from(ch.active))?;
            }
        }
    }
    Ok(())
}

fn write_vec<W: Write>(out: &mut W, v: &Vector3<f64>) -> io::Result<()> {
    write!(out, " {:.4} {:.4} {:.4}", v.x, v.y, v.z)
}

/// Beam-path table: `element nx ny nz vertex_count` followed by the ray
/// vertices (element, outer crossing, inner crossing, target). Rays without
/// bone list only the element and the target; missing normals are zero.
pub fn write_beam_paths<W: Write>(out: &mut W, rays: &[RayData], target: &Target) -> io::Result<()> {
    writeln!(out, "# element nx ny nz vertex_count x y z ...")?;
    let focus = target.steered();
    for r in rays {
        let mut vertices = vec![r.origin];
        vertices.extend(r.outer_point());
        vertices.extend(r.inner_point());
        vertices.push(focus);

        write!(out, "{}", r.element)?;
        write_vec(out, &r.outer_normal.unwrap_or_else(Vector3::zeros))?;
        write!(out, " {}", vertices.len())?;
        for v in &vertices {
            write_vec(out, v)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
