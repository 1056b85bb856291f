//! Trimmed Mean of M-values (TMM) normalization.
//!
//! TMM calculates scaling factors that account for compositional
//! differences between samples. It is robust to asymmetric differential
//! abundance where a subset of features dominates the change.
//!
//! # Algorithm
//!
//! 1. Select a reference sample: the one whose upper quartile of
//!    proportions is closest to the mean upper quartile
//! 2. For each sample, calculate M-values (log-ratios) and A-values
//!    (average log abundance) against the reference
//! 3. Trim extreme values (30% of M, 5% of A from each tail)
//! 4. The factor is 2^(precision-weighted mean of the remaining M-values)
//! 5. Factors are rescaled to a geometric mean of one
//!
//! # Reference
//!
//! Robinson MD, Oshlack A. A scaling normalization method for differential
//! expression analysis of RNA-seq data. Genome Biology 11, R25 (2010).

use crate::error::{DaaError, Result};
use crate::stats::{quantile, rank_average};
use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for TMM normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TmmConfig {
    /// Fraction of M-values to trim from each tail (default: 0.30).
    pub trim_m: f64,
    /// Fraction of A-values to trim from each tail (default: 0.05).
    pub trim_a: f64,
    /// Reference sample index (None = auto-select).
    pub reference_sample: Option<usize>,
}

impl Default for TmmConfig {
    fn default() -> Self {
        Self {
            trim_m: 0.30,
            trim_a: 0.05,
            reference_sample: None,
        }
    }
}

/// TMM factors with default trimming.
pub fn tmm_factors(counts: &DMatrix<f64>) -> Result<Vec<f64>> {
    tmm_factors_with_config(counts, &TmmConfig::default())
}

/// TMM normalization factors, one per sample (column).
pub fn tmm_factors_with_config(counts: &DMatrix<f64>, config: &TmmConfig) -> Result<Vec<f64>> {
    let (n_features, n_samples) = counts.shape();
    if n_features == 0 || n_samples == 0 {
        return Err(DaaError::invalid("cannot apply TMM to an empty matrix"));
    }
    if !(0.0..0.5).contains(&config.trim_m) || !(0.0..0.5).contains(&config.trim_a) {
        return Err(DaaError::invalid("TMM trim fractions must be in [0, 0.5)"));
    }

    let library_sizes: Vec<f64> = counts.column_iter().map(|c| c.sum()).collect();
    if let Some(j) = library_sizes.iter().position(|&l| l <= 0.0) {
        return Err(DaaError::invalid(format!("sample {} has zero total counts", j)));
    }

    let ref_idx = match config.reference_sample {
        Some(r) if r >= n_samples => {
            return Err(DaaError::invalid(format!(
                "reference sample index {} out of bounds (n_samples = {})",
                r, n_samples
            )))
        }
        Some(r) => r,
        None => select_reference_sample(counts, &library_sizes),
    };

    let reference: Vec<f64> = counts.column(ref_idx).iter().copied().collect();
    let raw: Vec<f64> = (0..n_samples)
        .into_par_iter()
        .map(|j| {
            let obs: Vec<f64> = counts.column(j).iter().copied().collect();
            calculate_tmm_factor(
                &obs,
                &reference,
                library_sizes[j],
                library_sizes[ref_idx],
                config,
            )
        })
        .collect();

    let log_mean = raw.iter().map(|f| f.ln()).sum::<f64>() / n_samples as f64;
    Ok(raw.iter().map(|f| f / log_mean.exp()).collect())
}

/// Effective library sizes: library size × TMM factor.
pub fn effective_library_sizes(counts: &DMatrix<f64>, factors: &[f64]) -> Vec<f64> {
    counts
        .column_iter()
        .zip(factors)
        .map(|(col, f)| col.sum() * f)
        .collect()
}

/// log2 counts per million with a 0.5 prior count.
///
/// `log2((y + 0.5) / (lib + 1) * 1e6)`, the transform used by voom.
pub fn log_cpm(counts: &DMatrix<f64>, lib_sizes: &[f64]) -> DMatrix<f64> {
    DMatrix::from_fn(counts.nrows(), counts.ncols(), |i, j| {
        ((counts[(i, j)] + 0.5) / (lib_sizes[j] + 1.0) * 1e6).log2()
    })
}

fn select_reference_sample(counts: &DMatrix<f64>, library_sizes: &[f64]) -> usize {
    let upper_quartiles: Vec<f64> = counts
        .column_iter()
        .zip(library_sizes)
        .map(|(col, lib)| {
            let props: Vec<f64> = col.iter().map(|c| c / lib).collect();
            quantile(&props, 0.75)
        })
        .collect();
    let mean_uq = upper_quartiles.iter().sum::<f64>() / upper_quartiles.len() as f64;

    upper_quartiles
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (*a - mean_uq)
                .abs()
                .partial_cmp(&(*b - mean_uq).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn calculate_tmm_factor(
    obs: &[f64],
    reference: &[f64],
    n_obs: f64,
    n_ref: f64,
    config: &TmmConfig,
) -> f64 {
    let mut log_r = Vec::new();
    let mut abs_e = Vec::new();
    let mut var = Vec::new();
    for (&o, &r) in obs.iter().zip(reference) {
        let lr = ((o / n_obs) / (r / n_ref)).log2();
        let ae = ((o / n_obs).log2() + (r / n_ref).log2()) / 2.0;
        if lr.is_finite() && ae.is_finite() {
            log_r.push(lr);
            abs_e.push(ae);
            var.push((n_obs - o) / n_obs / o + (n_ref - r) / n_ref / r);
        }
    }

    if log_r.is_empty() || log_r.iter().all(|m| m.abs() < 1e-6) {
        return 1.0;
    }

    let n = log_r.len() as f64;
    let lo_l = (n * config.trim_m).floor() + 1.0;
    let hi_l = n + 1.0 - lo_l;
    let lo_s = (n * config.trim_a).floor() + 1.0;
    let hi_s = n + 1.0 - lo_s;
    let (rank_m, _) = rank_average(&log_r);
    let (rank_a, _) = rank_average(&abs_e);

    let mut num = 0.0;
    let mut den = 0.0;
    for k in 0..log_r.len() {
        let keep = rank_m[k] >= lo_l && rank_m[k] <= hi_l && rank_a[k] >= lo_s && rank_a[k] <= hi_s;
        if keep && var[k] > 0.0 {
            num += log_r[k] / var[k];
            den += 1.0 / var[k];
        }
    }
    let f = if den > 0.0 { num / den } else { 0.0 };
    2.0_f64.powf(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_counts() -> DMatrix<f64> {
        // 6 features × 3 samples; sample 3 has double the depth
        DMatrix::from_row_slice(
            6,
            3,
            &[
                10.0, 12.0, 20.0, //
                20.0, 18.0, 40.0, //
                30.0, 33.0, 60.0, //
                40.0, 41.0, 80.0, //
                50.0, 47.0, 100.0, //
                60.0, 62.0, 120.0,
            ],
        )
    }

    #[test]
    fn test_tmm_factors_near_one_for_depth_only_differences() {
        let factors = tmm_factors(&create_test_counts()).unwrap();
        assert_eq!(factors.len(), 3);
        for f in &factors {
            assert!((f - 1.0).abs() < 0.1, "factor {}", f);
        }
        let log_mean: f64 = factors.iter().map(|f| f.ln()).sum::<f64>() / 3.0;
        assert!(log_mean.abs() < 1e-12);
    }

    #[test]
    fn test_tmm_asymmetric_shift() {
        // one dominant feature inflates sample 2
        let counts = DMatrix::from_row_slice(
            5,
            2,
            &[100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 100.0, 1000.0],
        );
        let factors = tmm_factors(&counts).unwrap();
        // sample 2's library is inflated by one feature, so its factor is lower
        assert!(factors[1] < factors[0]);
    }

    #[test]
    fn test_tmm_zero_library_error() {
        let counts = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 0.0]);
        assert!(tmm_factors(&counts).is_err());
    }

    #[test]
    fn test_log_cpm() {
        let counts = DMatrix::from_row_slice(1, 1, &[9.5]);
        let cpm = log_cpm(&counts, &[999.0]);
        assert!((cpm[(0, 0)] - (10.0 / 1000.0 * 1e6_f64).log2()).abs() < 1e-12);
    }
}
