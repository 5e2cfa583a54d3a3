//! Rasterisation of layered phantom primitives into voxel grids.
//!
//! The grid is centred on the origin: voxel `(i, j, k)` sits at
//! `origin + (i, j, k) * spacing` with `origin = -(dims - 1) / 2 * spacing`.
//! Layers are painted in order, so later layers overwrite earlier ones
//! wherever they overlap.

use ndarray::Array3;
use serde::{Deserialize, Serialize};

use crate::primitives::Primitive;

/// A primitive filled with a constant Hounsfield value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhantomLayer {
    pub shape: Primitive,
    /// Fill value (HU).
    pub hu: f32,
}

/// World position of voxel `(0, 0, 0)` for a grid centred on the origin.
pub fn grid_origin(dims: [usize; 3], spacing: [f64; 3]) -> [f64; 3] {
    [
        -((dims[0].max(1) - 1) as f64) / 2.0 * spacing[0],
        -((dims[1].max(1) - 1) as f64) / 2.0 * spacing[1],
        -((dims[2].max(1) - 1) as f64) / 2.0 * spacing[2],
    ]
}

/// Paint `layers` into a `dims` grid of `spacing` mm voxels.
///
/// # Panics
/// Panics if any spacing component is not positive.
pub fn rasterise(
    layers: &[PhantomLayer],
    dims: [usize; 3],
    spacing: [f64; 3],
    background_hu: f32,
) -> Array3<f32> {
    assert!(spacing.iter().all(|&s| s > 0.0), "Voxel spacing must be positive");

    let origin = grid_origin(dims, spacing);
    let mut grid = Array3::<f32>::from_elem((dims[0], dims[1], dims[2]), background_hu);

    for layer in layers {
        let (min, max) = layer.shape.bounding_box();

        // Index range covering the layer's bounding box.
        let range = |axis: usize| {
            let lo = ((min[axis] - origin[axis]) / spacing[axis]).floor().max(0.0) as usize;
            let hi = ((max[axis] - origin[axis]) / spacing[axis]).ceil();
            let hi = if hi < 0.0 { 0 } else { (hi as usize + 1).min(dims[axis]) };
            lo.min(hi)..hi
        };
        let (rx, ry, rz) = (range(0), range(1), range(2));

        for i in rx {
            let x = origin[0] + i as f64 * spacing[0];
            for j in ry.clone() {
                let y = origin[1] + j as f64 * spacing[1];
                for k in rz.clone() {
                    let z = origin[2] + k as f64 * spacing[2];
                    if layer.shape.contains(&[x, y, z]) {
                        grid[[i, j, k]] = layer.hu;
                    }
                }
            }
        }
    }

    grid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{Sphere, SphericalShell};

    #[test]
    fn test_sphere_voxel_count() {
        let layers = [PhantomLayer {
            shape: Primitive::Sphere(Sphere { centre: [0.0, 0.0, 0.0], radius: 10.0 }),
            hu: 1000.0,
        }];
        let grid = rasterise(&layers, [31, 31, 31], [1.0, 1.0, 1.0], -1000.0);
        let inside = grid.iter().filter(|&&v| v == 1000.0).count();

        // (4/3) π 10³ ≈ 4189 unit voxels; allow lattice error.
        assert!(inside > 3900 && inside < 4500, "Unexpected voxel count: {}", inside);
    }

    #[test]
    fn test_grid_is_centred() {
        assert_eq!(grid_origin([5, 3, 1], [2.0, 1.0, 1.0]), [-4.0, -1.0, 0.0]);
    }

    #[test]
    fn test_later_layers_overwrite() {
        let layers = [
            PhantomLayer {
                shape: Primitive::Sphere(Sphere { centre: [0.0, 0.0, 0.0], radius: 20.0 }),
                hu: 40.0,
            },
            PhantomLayer {
                shape: Primitive::SphericalShell(SphericalShell {
                    centre: [0.0, 0.0, 0.0],
                    outer_radius: 10.0,
                    thickness: 2.0,
                }),
                hu: 1500.0,
            },
        ];
        let grid = rasterise(&layers, [41, 41, 41], [1.0, 1.0, 1.0], -1000.0);
        // Centre voxel is index 20.
        assert_eq!(grid[[20, 20, 20]], 40.0);
        assert_eq!(grid[[29, 20, 20]], 1500.0);
        assert_eq!(grid[[35, 20, 20]], 40.0);
        assert_eq!(grid[[0, 0, 0]], -1000.0);
    }
}
