//! Cumulative Sum Scaling (CSS) normalization from metagenomeSeq.
//!
//! CSS scales each sample by the sum of its counts up to a data-driven
//! percentile, which keeps a few highly abundant features from dominating
//! the scaling factor in sparse, zero-inflated tables.
//!
//! # Algorithm
//!
//! 1. Pick the percentile where the per-sample quantile curves start to
//!    deviate from the reference curve (relative change above 10%), with a
//!    floor of 0.5
//! 2. For each sample, sum the non-zero counts at or below that quantile
//! 3. Normalized value = count / (factor / 1000), optionally `log2(x + 1)`
//!
//! # Reference
//!
//! Paulson JN, Stine OC, Bravo HC, Pop M (2013). "Differential abundance analysis
//! for microbial marker-gene surveys." Nature Methods 10:1200-1202.

use crate::error::{DaaError, Result};
use crate::stats::{median, quantile_sorted, sorted};
use nalgebra::DMatrix;
use rayon::prelude::*;

/// Scale applied to CSS factors before dividing.
pub const CSS_SCALE: f64 = 1000.0;

/// Relative change in the median quantile deviation that fixes the percentile.
const CSS_REL: f64 = 0.1;

/// Data-driven percentile for CSS.
///
/// Fails with `InvalidInput` when a sample has fewer than two non-zero features.
pub fn css_percentile(counts: &DMatrix<f64>) -> Result<f64> {
    let per_sample: Vec<Vec<f64>> = counts
        .column_iter()
        .map(|col| sorted(&col.iter().copied().filter(|&v| v > 0.0).collect::<Vec<_>>()))
        .collect();
    if let Some(j) = per_sample.iter().position(|v| v.len() <= 1) {
        return Err(DaaError::invalid(format!(
            "sample {} has one or zero non-zero features; CSS is undefined",
            j
        )));
    }
    let leng = per_sample.iter().map(Vec::len).max().unwrap_or(0);

    // each sample's non-zero values, ascending, padded with zeros at the top
    let padded: Vec<Vec<f64>> = per_sample
        .iter()
        .map(|v| {
            let mut col = vec![0.0; leng - v.len()];
            col.extend_from_slice(v);
            col
        })
        .collect();
    let quantiles: Vec<Vec<f64>> = per_sample
        .iter()
        .map(|v| {
            (0..leng)
                .map(|k| quantile_sorted(v, k as f64 / (leng - 1).max(1) as f64))
                .collect()
        })
        .collect();

    let n = per_sample.len() as f64;
    let reference: Vec<f64> =
        (0..leng).map(|k| padded.iter().map(|c| c[k]).sum::<f64>() / n).collect();
    let deviation: Vec<f64> = (0..leng)
        .map(|k| {
            let diffs: Vec<f64> = quantiles.iter().map(|q| (reference[k] - q[k]).abs()).collect();
            median(&diffs)
        })
        .collect();

    let first_jump = (0..leng.saturating_sub(1))
        .find(|&k| (deviation[k + 1] - deviation[k]).abs() / deviation[k + 1] > CSS_REL)
        .map(|k| (k + 1) as f64 / leng as f64);

    Ok(match first_jump {
        Some(x) if x > 0.5 => x,
        _ => 0.5,
    })
}

/// Per-sample CSS factors at percentile `p`.
pub fn css_factors(counts: &DMatrix<f64>, p: f64) -> Result<Vec<f64>> {
    if !(0.0..=1.0).contains(&p) {
        return Err(DaaError::invalid("CSS percentile must be between 0 and 1"));
    }
    counts
        .column_iter()
        .enumerate()
        .map(|(j, col)| {
            let nonzero = sorted(&col.iter().copied().filter(|&v| v > 0.0).collect::<Vec<_>>());
            if nonzero.is_empty() {
                return Err(DaaError::invalid(format!("sample {} has no non-zero features", j)));
            }
            let q = quantile_sorted(&nonzero, p);
            Ok(nonzero.iter().filter(|&&v| v <= q).sum())
        })
        .collect()
}

/// CSS-normalized matrix; `log2(x + 1)` when `log` is set.
pub fn norm_css(counts: &DMatrix<f64>, factors: &[f64], log: bool) -> DMatrix<f64> {
    let columns: Vec<Vec<f64>> = (0..counts.ncols())
        .into_par_iter()
        .map(|j| {
            let scale = factors[j] / CSS_SCALE;
            counts
                .column(j)
                .iter()
                .map(|&c| {
                    let v = if scale > 0.0 { c / scale } else { c };
                    if log {
                        (v + 1.0).log2()
                    } else {
                        v
                    }
                })
                .collect()
        })
        .collect();
    DMatrix::from_fn(counts.nrows(), counts.ncols(), |i, j| columns[j][i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_counts() -> DMatrix<f64> {
        DMatrix::from_row_slice(
            5,
            3,
            &[
                1.0, 2.0, 0.0, //
                2.0, 4.0, 1.0, //
                3.0, 6.0, 2.0, //
                4.0, 8.0, 3.0, //
                100.0, 200.0, 50.0,
            ],
        )
    }

    #[test]
    fn test_css_factors_ignore_dominant_feature() {
        let counts = create_test_counts();
        let factors = css_factors(&counts, 0.5).unwrap();
        // sample 1: median of [1,2,3,4,100] is 3 -> 1+2+3
        assert_relative_eq!(factors[0], 6.0);
        assert_relative_eq!(factors[1], 12.0);
        // sample 3: non-zero [1,2,3,50], median 2.5 -> 1+2
        assert_relative_eq!(factors[2], 3.0);
    }

    #[test]
    fn test_css_percentile_floor() {
        let p = css_percentile(&create_test_counts()).unwrap();
        assert!((0.5..=1.0).contains(&p));
    }

    #[test]
    fn test_css_rejects_single_feature_sample() {
        let counts = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 2.0, 3.0]);
        assert!(css_percentile(&counts).is_err());
    }

    #[test]
    fn test_norm_css_log() {
        let counts = create_test_counts();
        let factors = css_factors(&counts, 0.5).unwrap();
        let norm = norm_css(&counts, &factors, true);
        // proportional samples 1 and 2 normalize to the same values
        for i in 0..5 {
            assert_relative_eq!(norm[(i, 0)], norm[(i, 1)], epsilon = 1e-12);
        }
        assert_relative_eq!(norm[(0, 0)], (1.0 / 0.006 + 1.0_f64).log2(), epsilon = 1e-9);
    }
}
