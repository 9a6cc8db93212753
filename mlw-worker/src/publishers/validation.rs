//! Argument checks shared by publishers
//!
//! Failures are programmer errors: they surface as `WorkerError::Validation`
//! before anything is sent.

use crate::error::{Result, WorkerError};
use crate::models::Polygon;

pub fn non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WorkerError::Validation(format!("{field} shouldn't be empty")));
    }
    Ok(())
}

/// Finite number in [0, 1]
pub fn confidence(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(WorkerError::Validation(format!(
            "{field} should be a number between 0 and 1, got {value}"
        )));
    }
    Ok(())
}

pub fn optional_confidence(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(value) => confidence(field, value),
        None => Ok(()),
    }
}

/// At least three points of finite coordinates
pub fn polygon(field: &str, points: &Polygon) -> Result<()> {
    if points.len() < 3 {
        return Err(WorkerError::Validation(format!(
            "{field} should have at least three points, got {}",
            points.len()
        )));
    }
    if let Some(point) = points.iter().find(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return Err(WorkerError::Validation(format!(
            "{field} has a non-finite point {point:?}"
        )));
    }
    Ok(())
}

pub fn non_empty_list<T>(field: &str, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Err(WorkerError::Validation(format!("{field} shouldn't be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_bounds() {
        assert!(confidence("confidence", 0.0).is_ok());
        assert!(confidence("confidence", 1.0).is_ok());
        assert!(confidence("confidence", 1.01).is_err());
        assert!(confidence("confidence", -0.1).is_err());
        assert!(confidence("confidence", f64::NAN).is_err());
        assert!(optional_confidence("confidence", None).is_ok());
    }

    #[test]
    fn test_polygon_shape() {
        assert!(polygon("polygon", &vec![[0.0, 0.0], [1.0, 1.0], [1.0, 0.0]]).is_ok());
        assert!(polygon("polygon", &vec![[0.0, 0.0], [1.0, 1.0]]).is_err());
        assert!(polygon("polygon", &vec![[0.0, 0.0], [f64::INFINITY, 1.0], [1.0, 0.0]]).is_err());
        // Points outside the image are left to the remote to judge
        assert!(polygon("polygon", &vec![[-5.0, 0.0], [1.0, -1.0], [1.0, 0.0]]).is_ok());
    }

    #[test]
    fn test_blank_strings_rejected() {
        assert!(non_empty("text", "  ").is_err());
        assert!(non_empty("text", "a").is_ok());
        assert!(non_empty_list::<u8>("items", &[]).is_err());
    }
}
