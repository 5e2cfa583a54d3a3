//! Parametric phantom primitives.
//!
//! Each primitive defines a closed region in 3D space that can be filled
//! with a Hounsfield value by the [`rasterise`](crate::rasterise) module to
//! build synthetic CT volumes (skull shells, water baths, bone slabs).

use serde::{Deserialize, Serialize};

/// A closed region that can be rasterised into a voxel volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Primitive {
    Sphere(Sphere),
    SphericalShell(SphericalShell),
    Cuboid(Cuboid),
}

/// A solid sphere defined by its centre and radius.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sphere {
    /// Centre position (mm).
    pub centre: [f64; 3],
    /// Radius (mm).
    pub radius: f64,
}

/// A spherical shell: the region `outer_radius - thickness < r <= outer_radius`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SphericalShell {
    /// Centre position (mm).
    pub centre: [f64; 3],
    /// Outer radius (mm).
    pub outer_radius: f64,
    /// Radial thickness (mm).
    pub thickness: f64,
}

/// An axis-aligned cuboid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cuboid {
    /// Centre position (mm).
    pub centre: [f64; 3],
    /// Half-extents along x, y, z (mm).
    pub half_extents: [f64; 3],
}

fn distance_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

impl Primitive {
    /// Check whether a point lies inside this primitive.
    pub fn contains(&self, point: &[f64; 3]) -> bool {
        match self {
            Primitive::Sphere(s) => distance_sq(point, &s.centre) <= s.radius * s.radius,
            Primitive::SphericalShell(s) => {
                let r_sq = distance_sq(point, &s.centre);
                let inner = (s.outer_radius - s.thickness).max(0.0);
                r_sq <= s.outer_radius * s.outer_radius && r_sq > inner * inner
            }
            Primitive::Cuboid(c) => {
                (point[0] - c.centre[0]).abs() <= c.half_extents[0]
                    && (point[1] - c.centre[1]).abs() <= c.half_extents[1]
                    && (point[2] - c.centre[2]).abs() <= c.half_extents[2]
            }
        }
    }

    /// Axis-aligned bounding box: returns (min_corner, max_corner).
    pub fn bounding_box(&self) -> ([f64; 3], [f64; 3]) {
        let (centre, half) = match self {
            Primitive::Sphere(s) => (s.centre, [s.radius; 3]),
            Primitive::SphericalShell(s) => (s.centre, [s.outer_radius; 3]),
            Primitive::Cuboid(c) => (c.centre, c.half_extents),
        };
        (
            [centre[0] - half[0], centre[1] - half[1], centre[2] - half[2]],
            [centre[0] + half[0], centre[1] + half[1], centre[2] + half[2]],
        )
    }
}
