//! Median-of-ratios size factors (DESeq2).

use crate::error::{DaaError, Result};
use crate::stats::median;
use nalgebra::DMatrix;

/// Size factors by the median-of-ratios method.
///
/// Features with a zero in any sample are excluded from the reference.
/// When every feature has at least one zero, which is common in sparse
/// functional tables, the geometric mean is taken over positive counts
/// only (divided by the total number of samples).
pub fn size_factors(counts: &DMatrix<f64>) -> Result<Vec<f64>> {
    let (n_features, n_samples) = counts.shape();
    if n_features == 0 || n_samples == 0 {
        return Err(DaaError::invalid("count matrix is empty"));
    }

    let all_positive = (0..n_features).any(|i| counts.row(i).iter().all(|&c| c > 0.0));
    if all_positive {
        median_of_ratios(counts, false)
    } else {
        log::debug!("every feature contains a zero; using positive-count geometric means");
        median_of_ratios(counts, true)
    }
}

fn median_of_ratios(counts: &DMatrix<f64>, poscounts: bool) -> Result<Vec<f64>> {
    let (n_features, n_samples) = counts.shape();

    let mut reference = Vec::with_capacity(n_features);
    for i in 0..n_features {
        let row = counts.row(i);
        let usable = if poscounts {
            row.iter().any(|&c| c > 0.0)
        } else {
            row.iter().all(|&c| c > 0.0)
        };
        if usable {
            let log_sum: f64 = row.iter().filter(|&&c| c > 0.0).map(|c| c.ln()).sum();
            reference.push((i, (log_sum / n_samples as f64).exp()));
        }
    }
    if reference.is_empty() {
        return Err(DaaError::invalid("no feature has positive counts; size factors are undefined"));
    }

    let mut factors = Vec::with_capacity(n_samples);
    for j in 0..n_samples {
        let ratios: Vec<f64> = reference
            .iter()
            .filter(|(i, _)| counts[(*i, j)] > 0.0)
            .map(|(i, geo)| counts[(*i, j)] / geo)
            .collect();
        if ratios.is_empty() {
            if poscounts {
                factors.push(1.0);
                continue;
            }
            return Err(DaaError::invalid(format!("no valid ratios for sample {}", j)));
        }
        factors.push(median(&ratios));
    }

    if poscounts {
        // rescale to a geometric mean of one
        let log_mean = factors.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
        for f in factors.iter_mut() {
            *f /= log_mean.exp();
        }
    }

    if factors.iter().any(|f| !(*f > 0.0) || !f.is_finite()) {
        return Err(DaaError::invalid("invalid size factors computed"));
    }
    Ok(factors)
}
