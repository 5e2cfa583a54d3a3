//! File format parsers for importing transducer element geometries.
//!
//! Supported formats:
//! - [`element table`](elements): plain-text `x y z nx ny nz` element tables

pub mod elements;

use thiserror::Error;

use crate::transducer::GeometryError;

/// Errors during geometry file parsing.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error at line {line}: {message}")]
    FormatError { line: usize, message: String },

    #[error("Invalid element geometry: {0}")]
    Geometry(#[from] GeometryError),
}
