//! Phased-array transducer element geometry.
//!
//! Elements are described in the transducer-local frame, whose origin is the
//! natural (geometric) focus. Each element has a position and a unit normal
//! pointing in the direction it radiates. The whole array is placed in the
//! world by a tilt about the focus followed by a translation onto the
//! natural focus point (see [`TransducerGeometry::placement`]).

use nalgebra::Vector3;
use thiserror::Error;

use crate::transform::Transform;

/// Largest array supported by the channel electronics.
pub const MAX_ELEMENTS: usize = 1024;

/// Errors when constructing a transducer geometry.
#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("Element {index} has a zero-length or non-finite normal")]
    InvalidNormal { index: usize },

    #[error("Element {index} has a non-finite position")]
    InvalidPosition { index: usize },

    #[error("Transducer has {count} elements, at most {max} are supported")]
    TooManyElements { count: usize, max: usize },
}

/// A single transducer element.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Position in transducer-local coordinates (mm).
    pub position: Vector3<f64>,
    /// Unit normal, pointing in the radiating direction.
    pub normal: Vector3<f64>,
}

/// An ordered, fixed-size list of elements plus the array tilt.
#[derive(Debug, Clone, PartialEq)]
pub struct TransducerGeometry {
    elements: Vec<Element>,
    /// Tilt about the x axis (degrees).
    pub tilt_x_deg: f64,
    /// Tilt about the y axis (degrees).
    pub tilt_y_deg: f64,
}

impl TransducerGeometry {
    /// Build a geometry from raw positions and normals. Normals are normalised.
    pub fn new(
        positions_normals: impl IntoIterator<Item = (Vector3<f64>, Vector3<f64>)>,
    ) -> Result<Self, GeometryError> {
        let mut elements = Vec::new();
        for (index, (position, normal)) in positions_normals.into_iter().enumerate() {
            if !position.iter().all(|c| c.is_finite()) {
                return Err(GeometryError::InvalidPosition { index });
            }
            let len = normal.norm();
            if !len.is_finite() || len < 1e-12 {
                return Err(GeometryError::InvalidNormal { index });
            }
            elements.push(Element {
                position,
                normal: normal / len,
            });
        }
        if elements.len() > MAX_ELEMENTS {
            return Err(GeometryError::TooManyElements {
                count: elements.len(),
                max: MAX_ELEMENTS,
            });
        }
        Ok(Self {
            elements,
            tilt_x_deg: 0.0,
            tilt_y_deg: 0.0,
        })
    }

    /// Generate a hemispherical (spherical cap) array focused at the origin.
    ///
    /// Elements follow a Fibonacci spiral over the cap around +z with a full
    /// opening angle of `aperture_deg`, each facing the focus.
    pub fn hemisphere(radius_mm: f64, count: usize, aperture_deg: f64) -> Result<Self, GeometryError> {
        let golden_angle = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        let cos_max = (aperture_deg.to_radians() / 2.0).cos();

        let elements = (0..count).map(|i| {
            let cos_theta = 1.0 - (i as f64 + 0.5) / count as f64 * (1.0 - cos_max);
            let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
            let phi = i as f64 * golden_angle;
            let dir = Vector3::new(sin_theta * phi.cos(), sin_theta * phi.sin(), cos_theta);
            (dir * radius_mm, -dir)
        });
        Self::new(elements)
    }

    /// Return a copy of this geometry with the given tilt angles.
    pub fn with_tilt(mut self, tilt_x_deg: f64, tilt_y_deg: f64) -> Self {
        self.tilt_x_deg = tilt_x_deg;
        self.tilt_y_deg = tilt_y_deg;
        self
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn element_position(&self, index: usize) -> Option<Vector3<f64>> {
        self.elements.get(index).map(|e| e.position)
    }

    pub fn element_normal(&self, index: usize) -> Option<Vector3<f64>> {
        self.elements.get(index).map(|e| e.normal)
    }

    /// Local-to-world placement: tilt about the focus, then translate onto it.
    pub fn placement(&self, natural_focus: &Vector3<f64>) -> Transform {
        Transform::tilt(self.tilt_x_deg, self.tilt_y_deg).then(&Transform::translation(
            natural_focus.x,
            natural_focus.y,
            natural_focus.z,
        ))
    }

    /// Elements transformed into world coordinates.
    pub fn world_elements(&self, natural_focus: &Vector3<f64>) -> Vec<Element> {
        let t = self.placement(natural_focus);
        self.elements
            .iter()
            .map(|e| Element {
                position: t.apply(&e.position),
                normal: t.apply_vector(&e.normal),
            })
            .collect()
    }

    /// For each element, the indices of its `k` geometrically nearest
    /// elements (itself included), nearest first, ties broken by index.
    ///
    /// Distances use the local positions, so the adjacency is independent of
    /// tilt and target.
    pub fn nearest_neighbours(&self, k: usize) -> Vec<Vec<usize>> {
        let k = k.min(self.elements.len());
        self.elements
            .iter()
            .map(|ei| {
                let mut by_distance: Vec<(f64, usize)> = self
                    .elements
                    .iter()
                    .enumerate()
                    .map(|(j, ej)| ((ej.position - ei.position).norm_squared(), j))
                    .collect();
                by_distance.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                by_distance.into_iter().take(k).map(|(_, j)| j).collect()
            })
            .collect()
    }
}
