//! Centered Log-Ratio (CLR) transformation for compositional data.

use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Apply the CLR transformation to every sample (column).
///
/// For sample j: CLR(x_ij) = ln(x_ij) - mean_i(ln(x_ij)).
///
/// Input must be strictly positive; add pseudocounts first.
pub fn norm_clr(data: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let (n_features, n_samples) = data.shape();
    if n_features == 0 || n_samples == 0 {
        return Err(DaaError::invalid("cannot apply CLR to an empty matrix"));
    }
    if let Some(((i, j), val)) = data
        .iter()
        .enumerate()
        .map(|(k, v)| ((k % n_features, k / n_features), *v))
        .find(|(_, v)| !(*v > 0.0))
    {
        return Err(DaaError::invalid(format!(
            "CLR requires positive values; found {} at ({}, {})",
            val, i, j
        )));
    }

    let columns: Vec<Vec<f64>> = (0..n_samples)
        .into_par_iter()
        .map(|j| {
            let col: Vec<f64> = data.column(j).iter().copied().collect();
            clr_in_place(col)
        })
        .collect();

    Ok(DMatrix::from_fn(n_features, n_samples, |i, j| columns[j][i]))
}

/// CLR of a single composition. Values must be positive.
pub fn clr_vector(values: &[f64]) -> Vec<f64> {
    clr_in_place(values.to_vec())
}

fn clr_in_place(mut values: Vec<f64>) -> Vec<f64> {
    for v in values.iter_mut() {
        *v = v.ln();
    }
    let mean_log = values.iter().sum::<f64>() / values.len() as f64;
    for v in values.iter_mut() {
        *v -= mean_log;
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clr_columns_sum_to_zero() {
        let data = DMatrix::from_row_slice(3, 2, &[1.0, 4.0, 2.0, 4.0, 4.0, 4.0]);
        let clr = norm_clr(&data).unwrap();
        for j in 0..2 {
            assert!(clr.column(j).sum().abs() < 1e-12);
        }
        // equal composition is all zeros
        assert!(clr.column(1).iter().all(|v| v.abs() < 1e-12));
        assert!((clr[(2, 0)] - clr[(0, 0)] - 4.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_clr_rejects_zeros() {
        let data = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 3.0]);
        assert!(matches!(norm_clr(&data), Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_clr_vector_scale_invariant() {
        let a = clr_vector(&[1.0, 2.0, 3.0]);
        let b = clr_vector(&[10.0, 20.0, 30.0]);
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-12);
        }
    }
}
