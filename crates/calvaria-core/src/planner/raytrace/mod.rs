//! Ray-tracing beam planner.
//!
//! Each transducer element is traced independently toward the steered
//! target. Per element the pipeline is
//!
//! 1. [`caster::cast_ray`]: skull window sampling and crossing detection,
//! 2. [`acoustics`]: bone path split and time of flight,
//! 3. [`metrics`]: SDR, incidence angle, thickness and profile speeds.
//!
//! Elements are dispatched through the [`ComputeBackend`], each writing into
//! its own slot. Neighbourhood-averaged SDR is filled in only after every
//! slot is complete.

pub mod acoustics;
pub mod caster;
pub mod metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use calvaria_compute::{ComputeBackend, SerialBackend};
use calvaria_geometry::transducer::{Element, TransducerGeometry};

use super::{BeamPlanner, PlanError};
use crate::correction::build_correction_vector;
use crate::envelope::{calc_envelope, EnvelopeGrid, EnvelopeImage};
use crate::types::{CorrectionVector, ElementStatus, PlanParams, RayData, Target};
use crate::volume::CtVolume;

use acoustics::bone_path;
use metrics::{compute_sdr, profile_speeds, sdr_neighbourhood_average, SDR_NEIGHBOURHOOD};

/// Planner that traces one straight ray per element.
pub struct RayTracePlanner {
    backend: Arc<dyn ComputeBackend>,
    /// Number of elements averaged into each element's smoothed SDR.
    pub neighbourhood: usize,
}

impl Default for RayTracePlanner {
    fn default() -> Self {
        Self::new(Arc::new(SerialBackend))
    }
}

impl RayTracePlanner {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self {
            backend,
            neighbourhood: SDR_NEIGHBOURHOOD,
        }
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    /// Trace, time and measure one element.
    fn trace_one(
        volume: &CtVolume,
        index: usize,
        element: &Element,
        focal_target: &nalgebra::Vector3<f64>,
        params: &PlanParams,
        params_valid: bool,
    ) -> RayData {
        let mut ray = caster::cast_ray(volume, index, element, focal_target, params);
        if ray.status != ElementStatus::Active {
            return ray;
        }
        if !params_valid {
            ray.status = ElementStatus::InvalidParameter;
            return ray;
        }

        if let Some(path) = bone_path(&ray, params) {
            ray.bone_path_mm = path.total_mm;
            ray.outer_table_mm = path.outer_table_mm;
        }
        match acoustics::path_travel_time(
            ray.target_distance_mm,
            ray.bone_path_mm,
            ray.outer_table_mm,
            &params.bone_speeds,
            params.frequency_hz,
        ) {
            Some(tof) => {
                ray.travel_time_s = tof.travel_time_s;
                ray.phase_rad = tof.phase_rad;
            }
            None => {
                ray.status = ElementStatus::InvalidParameter;
                return ray;
            }
        }

        let m = compute_sdr(&ray, params.threshold_for(volume), params);
        ray.sdr = m.sdr;
        ray.incidence_angle_deg = m.incidence_angle_deg;
        ray.skull_thickness_mm = m.skull_thickness_mm;
        ray.normalized_thickness_mm = m.normalized_thickness_mm;

        if let Some(speeds) = profile_speeds(&ray, params) {
            ray.outer_bone_speed = speeds.outer;
            ray.inner_bone_speed = speeds.inner;
            ray.avg_bone_speed = speeds.average;
        }
        ray
    }
}

impl BeamPlanner for RayTracePlanner {
    fn trace_elements(
        &self,
        volume: Option<&CtVolume>,
        geometry: &TransducerGeometry,
        target: &Target,
        params: &PlanParams,
        interrupt: Option<&AtomicBool>,
    ) -> Result<Vec<RayData>, PlanError> {
        let volume = volume.ok_or(PlanError::MissingVolume)?;
        if geometry.is_empty() {
            return Err(PlanError::MissingGeometry);
        }

        let params_valid = match params.validate() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Excluding all elements from correction: {}", e);
                false
            }
        };

        let elements = geometry.world_elements(&target.natural_focus);
        let focal_target = target.steered();
        let slots: Vec<OnceLock<RayData>> = (0..elements.len()).map(|_| OnceLock::new()).collect();
        let interrupted = || interrupt.is_some_and(|flag| flag.load(Ordering::Relaxed));

        self.backend.for_each_index(elements.len(), &|i| {
            if interrupted() {
                return;
            }
            let ray = Self::trace_one(volume, i, &elements[i], &focal_target, params, params_valid);
            let _ = slots[i].set(ray);
        });

        let mut rays = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot.into_inner() {
                Some(ray) => rays.push(ray),
                None => return Err(PlanError::Interrupted),
            }
        }

        let neighbours = geometry.nearest_neighbours(self.neighbourhood);
        let averages = sdr_neighbourhood_average(&rays, &neighbours);
        for (ray, avg) in rays.iter_mut().zip(averages) {
            ray.sdr_avg = if ray.is_active() { avg } else { 0.0 };
        }

        log::debug!(
            "Traced {} elements on {}: {} active",
            rays.len(),
            self.backend.device_info().name,
            rays.iter().filter(|r| r.is_active()).count()
        );
        Ok(rays)
    }

    fn build_correction(&self, rays: &[RayData], params: &PlanParams) -> CorrectionVector {
        build_correction_vector(rays, &params.bone_speeds, params.frequency_hz, params.correction_amount)
    }

    fn compute_envelope(
        &self,
        rays: &[RayData],
        correction: &CorrectionVector,
        target: &Target,
        grid: &EnvelopeGrid,
        params: &PlanParams,
    ) -> Result<EnvelopeImage, PlanError> {
        calc_envelope(rays, correction, target, grid, params, self.backend.as_ref())
    }

    fn method_name(&self) -> &str {
        "Ray tracing"
    }
}
