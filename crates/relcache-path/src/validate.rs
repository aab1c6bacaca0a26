//! Validation functions for record paths.

use crate::types::PathShape;
use crate::PathError;

/// Maximum allowed path depth.
const MAX_PATH_LENGTH: usize = 256;

/// Validate a path (array of path steps).
///
/// # Example
///
/// ```
/// use relcache_path::validate_path;
///
/// validate_path(&["planet".to_string(), "10".to_string()]).unwrap();
/// validate_path(&(0..300).map(|i| i.to_string()).collect::<Vec<_>>()).unwrap_err();
/// ```
pub fn validate_path(path: &[String]) -> Result<(), PathError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(PathError::PathTooLong);
    }
    Ok(())
}

/// Validate a path as a record path: a relationship marker at index 2 must
/// be followed by a non-empty link name. Elsewhere the marker is an ordinary
/// segment, so a type or record may be named `__rel`.
pub fn validate_record_path(path: &[String]) -> Result<(), PathError> {
    validate_path(path)?;
    match PathShape::of(path) {
        PathShape::BareMarker => Err(PathError::MissingLink),
        shape if shape.is_link() && path[3].is_empty() => Err(PathError::MissingLink),
        _ => Ok(()),
    }
}
