//! Parser for plain-text transducer element tables.
//!
//! The format is:
//! ```text
//! <num_elements>
//! <comment line>
//! <x> <y> <z> <nx> <ny> <nz>
//! <x> <y> <z> <nx> <ny> <nz>
//! ...
//! ```
//!
//! Positions are in millimetres in the transducer-local frame (natural focus
//! at the origin). Normals need not be unit length; they are normalised on
//! load. Lines starting with `#` after the header are ignored.

use std::path::Path;

use nalgebra::Vector3;

use super::ParseError;
use crate::transducer::{TransducerGeometry, MAX_ELEMENTS};

/// Parse an element table from a string.
pub fn parse_elements(content: &str) -> Result<TransducerGeometry, ParseError> {
    let lines: Vec<&str> = content.lines().collect();

    if lines.len() < 2 {
        return Err(ParseError::FormatError {
            line: 1,
            message: "Element table must have a count line and a comment line".into(),
        });
    }

    let num_elements: usize = lines[0].trim().parse().map_err(|_| ParseError::FormatError {
        line: 1,
        message: "First line must be the number of elements".into(),
    })?;

    if num_elements > MAX_ELEMENTS {
        return Err(ParseError::FormatError {
            line: 1,
            message: format!("Header declares {} elements, at most {} supported", num_elements, MAX_ELEMENTS),
        });
    }

    // Line 2 is the comment line (ignored)

    let mut rows = Vec::with_capacity(num_elements);
    for (idx, line) in lines[2..].iter().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = idx + 3;
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 6 {
            return Err(ParseError::FormatError {
                line: line_no,
                message: format!("Expected 'x y z nx ny nz', got '{}'", line),
            });
        }

        let mut values = [0.0_f64; 6];
        for (slot, part) in values.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| ParseError::FormatError {
                line: line_no,
                message: format!("Invalid number: {}", part),
            })?;
        }

        rows.push((
            Vector3::new(values[0], values[1], values[2]),
            Vector3::new(values[3], values[4], values[5]),
        ));
    }

    if rows.len() != num_elements {
        return Err(ParseError::FormatError {
            line: 1,
            message: format!("Header says {} elements but found {}", num_elements, rows.len()),
        });
    }

    Ok(TransducerGeometry::new(rows)?)
}

/// Read and parse an element table from disk.
pub fn load_elements(path: &Path) -> Result<TransducerGeometry, ParseError> {
    let content = std::fs::read_to_string(path)?;
    parse_elements(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_table() {
        let content = "2\nTwo-element test array\n100 0 0 -2 0 0\n# skipped\n0 100 0 0 -1 0\n";
        let geom = parse_elements(content).unwrap();
        assert_eq!(geom.element_count(), 2);
        assert_eq!(geom.element_position(1), Some(Vector3::new(0.0, 100.0, 0.0)));
        // Normal normalised on load.
        assert_eq!(geom.element_normal(0), Some(Vector3::new(-1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_count_mismatch_is_reported() {
        let content = "3\ncomment\n1 0 0 -1 0 0\n";
        match parse_elements(content) {
            Err(ParseError::FormatError { line, .. }) => assert_eq!(line, 1),
            other => panic!("Expected format error, got {:?}", other.map(|g| g.element_count())),
        }
    }

    #[test]
    fn test_bad_number_reports_line() {
        let content = "1\ncomment\n1 0 zero -1 0 0\n";
        match parse_elements(content) {
            Err(ParseError::FormatError { line, message }) => {
                assert_eq!(line, 3);
                assert!(message.contains("zero"));
            }
            other => panic!("Expected format error, got {:?}", other.map(|g| g.element_count())),
        }
    }

    #[test]
    fn test_oversized_header_is_rejected() {
        for count in [usize::MAX.to_string(), (MAX_ELEMENTS + 1).to_string()] {
            let content = format!("{}\ncomment\n0 0 1 0 0 -1\n", count);
            match parse_elements(&content) {
                Err(ParseError::FormatError { line, .. }) => assert_eq!(line, 1),
                other => panic!("Expected format error, got {:?}", other.map(|g| g.element_count())),
            }
        }
    }

    #[test]
    fn test_zero_normal_is_rejected() {
        let content = "1\ncomment\n1 0 0 0 0 0\n";
        assert!(matches!(parse_elements(content), Err(ParseError::Geometry(_))));
    }
}
