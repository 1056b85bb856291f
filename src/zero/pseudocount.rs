//! Pseudocount addition for zero handling.

use crate::error::{DaaError, Result};
use nalgebra::DMatrix;

/// Add a pseudocount to all entries.
///
/// The pseudocount is added to all entries (both zero and non-zero) so log
/// transformations such as CLR are defined everywhere.
///
/// # Common choices
/// - 0.5: LinDA and ALDEx2 default
/// - 1.0: Laplace smoothing
/// - Minimum non-zero / 2: data-adaptive, see [`adaptive_pseudocount`]
pub fn add_pseudocount(data: &DMatrix<f64>, pseudocount: f64) -> Result<DMatrix<f64>> {
    if !(pseudocount > 0.0) || !pseudocount.is_finite() {
        return Err(DaaError::invalid(format!(
            "pseudocount must be positive, got {}",
            pseudocount
        )));
    }
    Ok(data.add_scalar(pseudocount))
}

/// Half of the smallest non-zero value.
///
/// Falls back to 0.5 for an all-zero matrix.
pub fn adaptive_pseudocount(data: &DMatrix<f64>) -> f64 {
    let min_nonzero = data
        .iter()
        .copied()
        .filter(|&v| v > 0.0)
        .fold(f64::INFINITY, f64::min);

    if min_nonzero.is_infinite() {
        0.5
    } else {
        min_nonzero / 2.0
    }
}

/// Add an adaptive pseudocount (min non-zero / 2).
pub fn add_pseudocount_adaptive(data: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    add_pseudocount(data, adaptive_pseudocount(data))
}
