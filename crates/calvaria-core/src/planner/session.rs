//! Planning session: owns the mutable inputs and the published results.
//!
//! Inputs change through setters, and every setter drops the cached batch
//! and envelope. A recompute traces into a fresh buffer and only replaces the
//! published [`RayBatch`] once every element is done, so readers never see a
//! mix of old and new rays.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use calvaria_geometry::transducer::TransducerGeometry;

use super::raytrace::RayTracePlanner;
use super::{BeamPlanner, PlanError};
use crate::envelope::{EnvelopeGrid, EnvelopeImage};
use crate::report::{channel_detail, summarise, ChannelDetail, PlanSummary};
use crate::types::{CorrectionVector, PlanParams, RayBatch, Sonication, Target};
use crate::volume::CtVolume;

struct CachedEnvelope {
    generation: u64,
    grid: EnvelopeGrid,
    image: Arc<EnvelopeImage>,
}

pub struct PlanSession {
    planner: Box<dyn BeamPlanner>,
    geometry: TransducerGeometry,
    target: Target,
    params: PlanParams,
    batch: Option<Arc<RayBatch>>,
    correction: Option<Arc<CorrectionVector>>,
    envelope: Option<CachedEnvelope>,
    generation: u64,
}

impl PlanSession {
    /// Session using the default serial ray tracer.
    pub fn new(geometry: TransducerGeometry, target: Target, params: PlanParams) -> Self {
        Self::with_planner(Box::new(RayTracePlanner::default()), geometry, target, params)
    }

    pub fn with_planner(
        planner: Box<dyn BeamPlanner>,
        geometry: TransducerGeometry,
        target: Target,
        params: PlanParams,
    ) -> Self {
        Self {
            planner,
            geometry,
            target,
            params,
            batch: None,
            correction: None,
            envelope: None,
            generation: 0,
        }
    }

    pub fn geometry(&self) -> &TransducerGeometry {
        &self.geometry
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn params(&self) -> &PlanParams {
        &self.params
    }

    pub fn method_name(&self) -> &str {
        self.planner.method_name()
    }

    fn invalidate(&mut self) {
        self.batch = None;
        self.correction = None;
        self.envelope = None;
    }

    pub fn set_geometry(&mut self, geometry: TransducerGeometry) {
        self.geometry = geometry;
        self.invalidate();
    }

    pub fn set_target(&mut self, target: Target) {
        self.target = target;
        self.invalidate();
    }

    pub fn set_steering(&mut self, steering: nalgebra::Vector3<f64>) {
        self.target.steering = steering;
        self.invalidate();
    }

    pub fn set_params(&mut self, params: PlanParams) {
        self.params = params;
        self.invalidate();
    }

    /// The last published batch, if it is still valid for the current inputs.
    pub fn batch(&self) -> Option<Arc<RayBatch>> {
        self.batch.clone()
    }

    /// Recompute every element and publish the new batch.
    ///
    /// With no volume an all-inactive batch is published and
    /// [`PlanError::MissingVolume`] returned.
    pub fn recompute(&mut self, volume: Option<&CtVolume>) -> Result<Arc<RayBatch>, PlanError> {
        self.run(volume, None)
    }

    /// Like [`recompute`](Self::recompute), but stops between elements once
    /// `interrupt` is set. An interrupted run leaves the previous batch in
    /// place.
    pub fn recompute_interruptible(
        &mut self,
        volume: Option<&CtVolume>,
        interrupt: &AtomicBool,
    ) -> Result<Arc<RayBatch>, PlanError> {
        self.run(volume, Some(interrupt))
    }

    fn run(&mut self, volume: Option<&CtVolume>, interrupt: Option<&AtomicBool>) -> Result<Arc<RayBatch>, PlanError> {
        let traced = self
            .planner
            .trace_elements(volume, &self.geometry, &self.target, &self.params, interrupt);

        let rays = match traced {
            Ok(rays) => rays,
            Err(PlanError::MissingVolume) => {
                self.generation += 1;
                let empty = RayBatch::no_data(
                    self.generation,
                    self.target,
                    self.params.clone(),
                    self.geometry.element_count(),
                );
                self.publish(empty);
                log::info!("No CT volume: published empty batch {}", self.generation);
                return Err(PlanError::MissingVolume);
            }
            Err(e) => return Err(e),
        };

        self.generation += 1;
        let batch = RayBatch {
            generation: self.generation,
            target: self.target,
            params: self.params.clone(),
            rays,
        };
        let published = self.publish(batch);
        let summary = summarise(&published.rays);
        log::info!(
            "{} batch {}: {}/{} active, mean SDR {:.3}, mean incidence {:.1} deg",
            self.planner.method_name(),
            published.generation,
            summary.active_count,
            summary.element_count,
            summary.mean_sdr,
            summary.mean_incidence_deg
        );
        Ok(published)
    }

    fn publish(&mut self, batch: RayBatch) -> Arc<RayBatch> {
        let correction = self.planner.build_correction(&batch.rays, &batch.params);
        let batch = Arc::new(batch);
        self.batch = Some(Arc::clone(&batch));
        self.correction = Some(Arc::new(correction));
        self.envelope = None;
        batch
    }

    fn current(&self) -> Result<&Arc<RayBatch>, PlanError> {
        self.batch.as_ref().ok_or(PlanError::NotComputed)
    }

    pub fn correction(&self) -> Result<Arc<CorrectionVector>, PlanError> {
        self.current()?;
        self.correction.clone().ok_or(PlanError::NotComputed)
    }

    pub fn summary(&self) -> Result<PlanSummary, PlanError> {
        Ok(summarise(&self.current()?.rays))
    }

    pub fn channel_detail(&self, index: usize) -> Result<ChannelDetail, PlanError> {
        channel_detail(&self.current()?.rays, index)
    }

    /// Envelope for the published batch, cached per batch and grid.
    pub fn envelope(&mut self, grid: &EnvelopeGrid) -> Result<Arc<EnvelopeImage>, PlanError> {
        let batch = Arc::clone(self.current()?);
        if let Some(cached) = &self.envelope {
            if cached.generation == batch.generation && cached.grid == *grid {
                return Ok(Arc::clone(&cached.image));
            }
        }
        let correction = self.correction()?;
        let image = Arc::new(self.planner.compute_envelope(
            &batch.rays,
            &correction,
            &batch.target,
            grid,
            &batch.params,
        )?);
        self.envelope = Some(CachedEnvelope {
            generation: batch.generation,
            grid: *grid,
            image: Arc::clone(&image),
        });
        Ok(image)
    }

    /// Snapshot the current plan for delivery.
    pub fn sonication(&self, power_w: f64, duration_s: f64) -> Result<Sonication, PlanError> {
        let batch = self.current()?;
        Ok(Sonication {
            correction: (*self.correction()?).clone(),
            natural_focus: batch.target.natural_focus,
            steering: batch.target.steering,
            power_w,
            duration_s,
            frequency_hz: batch.params.frequency_hz,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use std::sync::atomic::Ordering;

    use calvaria_geometry::primitives::{Cuboid, Primitive};
    use calvaria_geometry::rasterise::PhantomLayer;

    fn slab() -> CtVolume {
        let layers = [PhantomLayer {
            shape: Primitive::Cuboid(Cuboid {
                centre: [0.0, 0.0, 20.0],
                half_extents: [30.0, 30.0, 3.0],
            }),
            hu: 1600.0,
        }];
        CtVolume::phantom(&layers, [61, 61, 81], [1.0; 3], 40.0).unwrap()
    }

    fn session() -> PlanSession {
        let geometry = TransducerGeometry::hemisphere(38.0, 8, 60.0).unwrap();
        PlanSession::new(geometry, Target::default(), PlanParams::default())
    }

    #[test]
    fn test_recompute_publishes_and_setters_invalidate() {
        let vol = slab();
        let mut s = session();
        assert!(matches!(s.correction(), Err(PlanError::NotComputed)));

        let batch = s.recompute(Some(&vol)).unwrap();
        assert_eq!(batch.rays.len(), 8);
        assert_eq!(batch.generation, 1);
        assert_eq!(s.correction().unwrap().len(), 8);

        s.set_steering(Vector3::new(0.0, 0.0, 2.0));
        assert!(s.batch().is_none());
        assert!(s.sonication(10.0, 5.0).is_err());

        let batch = s.recompute(Some(&vol)).unwrap();
        assert_eq!(batch.generation, 2);
        let son = s.sonication(10.0, 5.0).unwrap();
        assert_eq!(son.steering, Vector3::new(0.0, 0.0, 2.0));
        assert_eq!(son.correction.len(), 8);
    }

    #[test]
    fn test_missing_volume_publishes_no_data() {
        let mut s = session();
        assert!(matches!(s.recompute(None), Err(PlanError::MissingVolume)));
        let batch = s.batch().unwrap();
        assert_eq!(batch.rays.len(), 8);
        assert_eq!(batch.active_count(), 0);
        assert_eq!(s.correction().unwrap().active_count(), 0);
    }

    #[test]
    fn test_interrupt_keeps_previous_batch() {
        let vol = slab();
        let mut s = session();
        let first = s.recompute(Some(&vol)).unwrap();

        let flag = AtomicBool::new(false);
        flag.store(true, Ordering::Relaxed);
        let result = s.recompute_interruptible(Some(&vol), &flag);
        assert!(matches!(result, Err(PlanError::Interrupted)));
        assert_eq!(s.batch().unwrap().generation, first.generation);
    }

    #[test]
    fn test_envelope_cache() {
        let vol = slab();
        let mut s = session();
        s.recompute(Some(&vol)).unwrap();
        let grid = EnvelopeGrid::slice_xy(3.0, 7);
        let a = s.envelope(&grid).unwrap();
        let b = s.envelope(&grid).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        s.recompute(Some(&vol)).unwrap();
        let c = s.envelope(&grid).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(*a, *c);
    }
}
