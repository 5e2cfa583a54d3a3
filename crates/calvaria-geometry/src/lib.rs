//! # Calvaria Geometry
//!
//! Geometry handling for the Calvaria planning engine. This crate provides:
//!
//! - **Rigid transformations** ([`transform`]): rotations, tilts and
//!   translations used to place the transducer relative to the target.
//! - **Transducer geometry** ([`transducer`]): element positions and
//!   normals, hemispherical array generators and element adjacency.
//! - **Phantom primitives** ([`primitives`]): spheres, spherical shells and
//!   cuboids used to build synthetic CT volumes.
//! - **Rasterisation** ([`rasterise`]): converts layered primitives into a
//!   voxel grid of Hounsfield units.
//! - **File parsers** ([`parsers`]): import element geometries from plain
//!   text element tables.

pub mod parsers;
pub mod primitives;
pub mod rasterise;
pub mod transducer;
pub mod transform;
