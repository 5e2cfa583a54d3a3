//! CT volume representation and voxel sampling.
//!
//! A [`CtVolume`] is a 3D grid of Hounsfield samples indexed `[x, y, z]`
//! together with its voxel spacing and a typed [`VolumeMetadata`] block. A
//! world point $\mathbf{w}$ maps to volume-local millimetres by
//!
//! $$\mathbf{l} = \mathbf{R}^T (\mathbf{w} - \mathbf{t})$$
//!
//! and to continuous voxel index space by dividing by the spacing. Sampling
//! outside `[0, size - 1]` on any axis yields [`AIR_HU`] so rays can leave
//! the skull, or the volume entirely, without failing.

use nalgebra::{Matrix3, Vector3};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use calvaria_geometry::rasterise::{grid_origin, rasterise, PhantomLayer};

/// Sentinel returned for points outside the volume (air).
pub const AIR_HU: f32 = -1000.0;

/// Errors when constructing a volume.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Volume has no voxels (dims {0:?})")]
    Empty([usize; 3]),

    #[error("Voxel spacing must be positive and finite, got {0:?}")]
    InvalidSpacing([f64; 3]),

    #[error("Orientation matrix is not orthonormal")]
    NonOrthonormalOrientation,
}

/// Interpolation used when sampling between voxel centres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    Nearest,
    #[default]
    Trilinear,
}

/// Typed scalar metadata carried alongside the voxel data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMetadata {
    /// Rotation from volume-local axes to world axes.
    pub orientation: Matrix3<f64>,
    /// World position of voxel `(0, 0, 0)` (mm).
    pub translation: Vector3<f64>,
    /// Display window width (HU).
    pub window_width: f64,
    /// Display window centre (HU).
    pub window_center: f64,
    /// Stored-value to HU slope.
    pub rescale_slope: f64,
    /// Stored-value to HU intercept.
    pub rescale_intercept: f64,
    /// Bone threshold (HU).
    pub threshold: f64,
}

impl Default for VolumeMetadata {
    fn default() -> Self {
        Self {
            orientation: Matrix3::identity(),
            translation: Vector3::zeros(),
            window_width: 2000.0,
            window_center: 500.0,
            rescale_slope: 1.0,
            rescale_intercept: 0.0,
            threshold: 700.0,
        }
    }
}

impl VolumeMetadata {
    /// Display window as `(low, high)` HU bounds.
    pub fn window_bounds(&self) -> (f64, f64) {
        let half = self.window_width / 2.0;
        (self.window_center - half, self.window_center + half)
    }
}

/// A CT volume of HU samples.
#[derive(Debug, Clone)]
pub struct CtVolume {
    data: Array3<f32>,
    spacing: [f64; 3],
    metadata: VolumeMetadata,
}

impl CtVolume {
    /// Wrap HU samples with spacing and metadata.
    pub fn new(
        data: Array3<f32>,
        spacing: [f64; 3],
        metadata: VolumeMetadata,
    ) -> Result<Self, VolumeError> {
        let dims = data.dim();
        let dims = [dims.0, dims.1, dims.2];
        if dims.iter().any(|&n| n == 0) {
            return Err(VolumeError::Empty(dims));
        }
        if !spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(VolumeError::InvalidSpacing(spacing));
        }
        let r = &metadata.orientation;
        if ((r.transpose() * r) - Matrix3::identity()).abs().max() > 1e-6 {
            return Err(VolumeError::NonOrthonormalOrientation);
        }
        Ok(Self { data, spacing, metadata })
    }

    /// Build from raw stored values, applying the metadata rescale.
    pub fn from_stored(
        stored: &Array3<i16>,
        spacing: [f64; 3],
        metadata: VolumeMetadata,
    ) -> Result<Self, VolumeError> {
        let slope = metadata.rescale_slope;
        let intercept = metadata.rescale_intercept;
        let data = stored.mapv(|v| (v as f64 * slope + intercept) as f32);
        Self::new(data, spacing, metadata)
    }

    /// Rasterise a synthetic phantom centred on the world origin.
    pub fn phantom(
        layers: &[PhantomLayer],
        dims: [usize; 3],
        spacing: [f64; 3],
        background_hu: f32,
    ) -> Result<Self, VolumeError> {
        if !spacing.iter().all(|s| s.is_finite() && *s > 0.0) {
            return Err(VolumeError::InvalidSpacing(spacing));
        }
        let data = rasterise(layers, dims, spacing, background_hu);
        let origin = grid_origin(dims, spacing);
        let metadata = VolumeMetadata {
            translation: Vector3::new(origin[0], origin[1], origin[2]),
            ..Default::default()
        };
        Self::new(data, spacing, metadata)
    }

    /// Number of voxels along `axis` (0 = x, 1 = y, 2 = z).
    pub fn size(&self, axis: usize) -> usize {
        self.data.shape()[axis]
    }

    /// Voxel spacing along `axis` (mm).
    pub fn sample_spacing(&self, axis: usize) -> f64 {
        self.spacing[axis]
    }

    pub fn orientation(&self) -> &Matrix3<f64> {
        &self.metadata.orientation
    }

    pub fn translation(&self) -> &Vector3<f64> {
        &self.metadata.translation
    }

    pub fn metadata(&self) -> &VolumeMetadata {
        &self.metadata
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    /// World point to continuous voxel index.
    pub fn world_to_voxel(&self, world: &Vector3<f64>) -> Vector3<f64> {
        let local = self.metadata.orientation.transpose() * (world - self.metadata.translation);
        Vector3::new(
            local.x / self.spacing[0],
            local.y / self.spacing[1],
            local.z / self.spacing[2],
        )
    }

    /// Continuous voxel index to world point.
    pub fn voxel_to_world(&self, index: &Vector3<f64>) -> Vector3<f64> {
        let local = Vector3::new(
            index.x * self.spacing[0],
            index.y * self.spacing[1],
            index.z * self.spacing[2],
        );
        self.metadata.orientation * local + self.metadata.translation
    }

    fn in_range(&self, v: &Vector3<f64>) -> bool {
        (0..3).all(|a| v[a] >= 0.0 && v[a] <= (self.size(a) - 1) as f64)
    }

    /// Sample the volume at a world point.
    pub fn sample(&self, world: &Vector3<f64>, interpolation: Interpolation) -> f32 {
        let v = self.world_to_voxel(world);
        if !self.in_range(&v) {
            return AIR_HU;
        }
        match interpolation {
            Interpolation::Nearest => {
                let idx = [v.x.round() as usize, v.y.round() as usize, v.z.round() as usize];
                self.data[idx]
            }
            Interpolation::Trilinear => self.trilinear(&v),
        }
    }

    fn trilinear(&self, v: &Vector3<f64>) -> f32 {
        // Lower corner clamped so that the upper corner stays in range; on a
        // single-voxel axis both corners coincide.
        let mut i0 = [0usize; 3];
        let mut i1 = [0usize; 3];
        let mut f = [0.0f64; 3];
        for a in 0..3 {
            let n = self.size(a);
            if n == 1 {
                continue;
            }
            let lo = (v[a].floor() as usize).min(n - 2);
            i0[a] = lo;
            i1[a] = lo + 1;
            f[a] = v[a] - lo as f64;
        }

        let d = &self.data;
        let c = |x: usize, y: usize, z: usize| d[[x, y, z]] as f64;

        let c00 = c(i0[0], i0[1], i0[2]) * (1.0 - f[0]) + c(i1[0], i0[1], i0[2]) * f[0];
        let c10 = c(i0[0], i1[1], i0[2]) * (1.0 - f[0]) + c(i1[0], i1[1], i0[2]) * f[0];
        let c01 = c(i0[0], i0[1], i1[2]) * (1.0 - f[0]) + c(i1[0], i0[1], i1[2]) * f[0];
        let c11 = c(i0[0], i1[1], i1[2]) * (1.0 - f[0]) + c(i1[0], i1[1], i1[2]) * f[0];

        let c0 = c00 * (1.0 - f[1]) + c10 * f[1];
        let c1 = c01 * (1.0 - f[1]) + c11 * f[1];

        (c0 * (1.0 - f[2]) + c1 * f[2]) as f32
    }

    /// HU gradient at a world point by central differences along the world
    /// axes, with a step of the smallest voxel spacing.
    pub fn gradient(&self, world: &Vector3<f64>, interpolation: Interpolation) -> Vector3<f64> {
        let h = self.spacing.iter().cloned().fold(f64::INFINITY, f64::min);
        let mut g = Vector3::zeros();
        for a in 0..3 {
            let mut step = Vector3::zeros();
            step[a] = h;
            let plus = self.sample(&(world + step), interpolation) as f64;
            let minus = self.sample(&(world - step), interpolation) as f64;
            g[a] = (plus - minus) / (2.0 * h);
        }
        g
    }

    /// World-space axis-aligned bounding box over all voxel centres.
    pub fn world_bounds(&self) -> (Vector3<f64>, Vector3<f64>) {
        let hi = [
            (self.size(0) - 1) as f64,
            (self.size(1) - 1) as f64,
            (self.size(2) - 1) as f64,
        ];
        let mut min = Vector3::repeat(f64::INFINITY);
        let mut max = Vector3::repeat(f64::NEG_INFINITY);
        for corner in 0..8 {
            let idx = Vector3::new(
                if corner & 1 == 0 { 0.0 } else { hi[0] },
                if corner & 2 == 0 { 0.0 } else { hi[1] },
                if corner & 4 == 0 { 0.0 } else { hi[2] },
            );
            let w = self.voxel_to_world(&idx);
            min = min.inf(&w);
            max = max.sup(&w);
        }
        (min, max)
    }

    /// Whether the segment `a → b` passes through the sampled region.
    ///
    /// Slab test in voxel index space, so rotated volumes are handled exactly.
    pub fn segment_intersects(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        let va = self.world_to_voxel(a);
        let vb = self.world_to_voxel(b);
        let d = vb - va;

        let mut t0 = 0.0f64;
        let mut t1 = 1.0f64;
        for axis in 0..3 {
            let hi = (self.size(axis) - 1) as f64;
            if d[axis].abs() < 1e-15 {
                if va[axis] < 0.0 || va[axis] > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d[axis];
            let (mut near, mut far) = ((0.0 - va[axis]) * inv, (hi - va[axis]) * inv);
            if near > far {
                std::mem::swap(&mut near, &mut far);
            }
            t0 = t0.max(near);
            t1 = t1.min(far);
            if t0 > t1 {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;

    fn ramp_volume() -> CtVolume {
        // HU = 100 * x index, spacing 2 mm along x.
        let data = Array3::from_shape_fn((5, 3, 3), |(x, _, _)| 100.0 * x as f32);
        CtVolume::new(data, [2.0, 1.0, 1.0], VolumeMetadata::default()).unwrap()
    }

    #[test]
    fn test_trilinear_on_linear_ramp() {
        let vol = ramp_volume();
        let hu = vol.sample(&Vector3::new(3.0, 1.0, 1.0), Interpolation::Trilinear);
        assert_abs_diff_eq!(hu, 150.0, epsilon = 1e-4);
        let hu = vol.sample(&Vector3::new(8.0, 2.0, 0.0), Interpolation::Trilinear);
        assert_abs_diff_eq!(hu, 400.0, epsilon = 1e-4);
    }

    #[test]
    fn test_nearest_rounds_to_voxel() {
        let vol = ramp_volume();
        let hu = vol.sample(&Vector3::new(3.2, 0.4, 1.6), Interpolation::Nearest);
        assert_eq!(hu, 200.0);
    }

    #[test]
    fn test_out_of_range_is_air() {
        let vol = ramp_volume();
        assert_eq!(vol.sample(&Vector3::new(-0.1, 1.0, 1.0), Interpolation::Trilinear), AIR_HU);
        assert_eq!(vol.sample(&Vector3::new(8.1, 1.0, 1.0), Interpolation::Nearest), AIR_HU);
        assert_eq!(vol.sample(&Vector3::new(1.0, 1.0, f64::NAN), Interpolation::Trilinear), AIR_HU);
    }

    #[test]
    fn test_orientation_and_translation() {
        // Volume x axis along world y; voxel (0,0,0) at world (10, 0, 0).
        let orientation = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let metadata = VolumeMetadata {
            orientation,
            translation: Vector3::new(10.0, 0.0, 0.0),
            ..Default::default()
        };
        let data = Array3::from_shape_fn((5, 3, 3), |(x, _, _)| 100.0 * x as f32);
        let vol = CtVolume::new(data, [1.0, 1.0, 1.0], metadata).unwrap();
        let hu = vol.sample(&Vector3::new(10.0, 3.0, 1.0), Interpolation::Trilinear);
        assert_abs_diff_eq!(hu, 300.0, epsilon = 1e-4);
        let back = vol.voxel_to_world(&vol.world_to_voxel(&Vector3::new(9.0, 2.5, 1.5)));
        assert_abs_diff_eq!(back, Vector3::new(9.0, 2.5, 1.5), epsilon = 1e-12);
    }

    #[test]
    fn test_rescale_applied_from_stored() {
        let stored = Array3::from_elem((2, 2, 2), 2024i16);
        let metadata = VolumeMetadata {
            rescale_slope: 1.0,
            rescale_intercept: -1024.0,
            ..Default::default()
        };
        let vol = CtVolume::from_stored(&stored, [1.0; 3], metadata).unwrap();
        assert_eq!(vol.data()[[1, 1, 1]], 1000.0);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let data = Array3::<f32>::zeros((2, 2, 2));
        assert!(matches!(
            CtVolume::new(data.clone(), [0.0, 1.0, 1.0], VolumeMetadata::default()),
            Err(VolumeError::InvalidSpacing(_))
        ));
        let skew = VolumeMetadata {
            orientation: Matrix3::identity() * 2.0,
            ..Default::default()
        };
        assert!(matches!(
            CtVolume::new(data, [1.0; 3], skew),
            Err(VolumeError::NonOrthonormalOrientation)
        ));
        assert!(matches!(
            CtVolume::new(Array3::<f32>::zeros((0, 2, 2)), [1.0; 3], VolumeMetadata::default()),
            Err(VolumeError::Empty(_))
        ));
    }

    #[test]
    fn test_gradient_of_ramp() {
        let vol = ramp_volume();
        let g = vol.gradient(&Vector3::new(4.0, 1.0, 1.0), Interpolation::Trilinear);
        assert_abs_diff_eq!(g, Vector3::new(50.0, 0.0, 0.0), epsilon = 1e-3);
    }

    #[test]
    fn test_segment_box_test() {
        let vol = ramp_volume();
        let (min, max) = vol.world_bounds();
        assert_abs_diff_eq!(min, Vector3::zeros(), epsilon = 1e-12);
        assert_abs_diff_eq!(max, Vector3::new(8.0, 2.0, 2.0), epsilon = 1e-12);
        assert!(vol.segment_intersects(&Vector3::new(-5.0, 1.0, 1.0), &Vector3::new(20.0, 1.0, 1.0)));
        assert!(!vol.segment_intersects(&Vector3::new(-5.0, 5.0, 1.0), &Vector3::new(20.0, 5.0, 1.0)));
        // Stops short of the volume.
        assert!(!vol.segment_intersects(&Vector3::new(-5.0, 1.0, 1.0), &Vector3::new(-1.0, 1.0, 1.0)));
    }

    #[test]
    fn test_window_bounds() {
        assert_eq!(VolumeMetadata::default().window_bounds(), (-500.0, 1500.0));
    }
}
