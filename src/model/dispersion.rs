//! Dispersion estimation and shrinkage for NB GLMs.
//!
//! Gene-wise moment estimates are shrunk towards a shared value: a
//! mean-dependent parametric trend for DESeq2, and a common dispersion
//! with a weighted prior for edgeR.

use crate::error::{DaaError, Result};
use crate::model::nb::MIN_DISPERSION;
use crate::stats::{mean, median, trigamma, variance};
use nalgebra::DMatrix;

/// Parametric fit `alpha(mu) = asymptotic + extra_poisson / mu`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispersionTrend {
    pub asymptotic: f64,
    pub extra_poisson: f64,
}

impl DispersionTrend {
    pub fn at(&self, mean: f64) -> f64 {
        (self.asymptotic + self.extra_poisson / mean.max(1e-8)).max(MIN_DISPERSION)
    }
}

/// Moment dispersion estimates from normalized counts.
///
/// `alpha = (var - mean * mean(1/sf)) / mean^2`, bounded below by
/// [`MIN_DISPERSION`] and above by `max(10, n_samples)`.
pub fn gene_wise_dispersions(normalized: &DMatrix<f64>, size_factors: &[f64]) -> Vec<f64> {
    let n = normalized.ncols();
    let xim = size_factors.iter().map(|s| 1.0 / s).sum::<f64>() / size_factors.len() as f64;
    let upper = (n as f64).max(10.0);
    normalized
        .row_iter()
        .map(|row| {
            let values: Vec<f64> = row.iter().copied().collect();
            let m = mean(&values);
            if m <= 0.0 {
                return MIN_DISPERSION;
            }
            let v = variance(&values);
            ((v - xim * m) / (m * m)).clamp(MIN_DISPERSION, upper)
        })
        .collect()
}

/// Gamma-family GLM (identity link) of dispersions on 1/mean, refit
/// after dropping outlying features until the coefficients settle.
pub fn fit_dispersion_trend(means: &[f64], dispersions: &[f64]) -> Result<DispersionTrend> {
    let mut usable: Vec<usize> = (0..means.len())
        .filter(|&i| means[i] > 0.0 && dispersions[i] > 100.0 * MIN_DISPERSION)
        .collect();
    if usable.len() < 3 {
        return Err(DaaError::method(
            "DESeq2",
            "too few features with usable dispersions to fit a trend",
        ));
    }

    let mut coefs = (0.1, 1.0);
    for _ in 0..10 {
        let fitted = gamma_identity_fit(&usable, means, dispersions, coefs);
        let Some(new) = fitted else { break };
        if new.0 <= 0.0 || new.1 < 0.0 {
            log::debug!("dispersion trend coefficients not positive; using mean dispersion");
            let m = mean(&usable.iter().map(|&i| dispersions[i]).collect::<Vec<_>>());
            return Ok(DispersionTrend {
                asymptotic: m,
                extra_poisson: 0.0,
            });
        }
        let change = ((new.0 / coefs.0).ln()).powi(2)
            + ((new.1.max(1e-12) / coefs.1.max(1e-12)).ln()).powi(2);
        coefs = new;

        let trend = DispersionTrend {
            asymptotic: coefs.0,
            extra_poisson: coefs.1,
        };
        let kept: Vec<usize> = usable
            .iter()
            .copied()
            .filter(|&i| {
                let ratio = dispersions[i] / trend.at(means[i]);
                ratio > 1e-4 && ratio < 15.0
            })
            .collect();
        if kept.len() >= 3 {
            usable = kept;
        }
        if change < 1e-6 {
            break;
        }
    }

    Ok(DispersionTrend {
        asymptotic: coefs.0,
        extra_poisson: coefs.1,
    })
}

/// IRLS for a gamma GLM with identity link on the design [1, 1/mean].
fn gamma_identity_fit(
    rows: &[usize],
    means: &[f64],
    dispersions: &[f64],
    start: (f64, f64),
) -> Option<(f64, f64)> {
    let (mut a0, mut a1) = start;
    for _ in 0..25 {
        // weights 1 / mu^2 for the gamma variance function
        let (mut s00, mut s01, mut s11, mut t0, mut t1) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &i in rows {
            let x = 1.0 / means[i];
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            s00 += w;
            s01 += w * x;
            s11 += w * x * x;
            t0 += w * dispersions[i];
            t1 += w * x * dispersions[i];
        }
        let det = s00 * s11 - s01 * s01;
        if det.abs() < 1e-300 {
            return None;
        }
        let n0 = (s11 * t0 - s01 * t1) / det;
        let n1 = (s00 * t1 - s01 * t0) / det;
        let done = (n0 - a0).abs() + (n1 - a1).abs() < 1e-10;
        a0 = n0;
        a1 = n1;
        if done {
            break;
        }
    }
    Some((a0, a1))
}

/// Shrink gene-wise dispersions towards the trend on the log scale.
///
/// The prior variance is the squared MAD of the log residuals minus the
/// sampling variance `trigamma((m - p) / 2)`, floored at 0.25.
pub fn shrink_dispersions(
    gene_wise: &[f64],
    means: &[f64],
    trend: &DispersionTrend,
    n_samples: usize,
    n_coefficients: usize,
) -> Vec<f64> {
    let df = n_samples.saturating_sub(n_coefficients).max(1) as f64;
    let sampling_var = trigamma(df / 2.0);

    let residuals: Vec<f64> = gene_wise
        .iter()
        .zip(means)
        .filter(|(d, _)| **d > 100.0 * MIN_DISPERSION)
        .map(|(d, m)| d.ln() - trend.at(*m).ln())
        .collect();
    let prior_var = if residuals.len() >= 2 {
        // robust spread of the log residuals
        let med = median(&residuals);
        let mad = median(&residuals.iter().map(|r| (r - med).abs()).collect::<Vec<_>>()) * 1.4826;
        (mad * mad - sampling_var).max(0.25)
    } else {
        0.25
    };

    gene_wise
        .iter()
        .zip(means)
        .map(|(&d, &m)| {
            let log_trend = trend.at(m).ln();
            let log_gw = d.max(MIN_DISPERSION).ln();
            let post = (log_gw / sampling_var + log_trend / prior_var)
                / (1.0 / sampling_var + 1.0 / prior_var);
            post.exp().max(MIN_DISPERSION)
        })
        .collect()
}

/// Common dispersion: the median of positive gene-wise estimates.
pub fn common_dispersion(gene_wise: &[f64]) -> f64 {
    let positive: Vec<f64> = gene_wise
        .iter()
        .copied()
        .filter(|d| *d > 100.0 * MIN_DISPERSION)
        .collect();
    if positive.is_empty() {
        MIN_DISPERSION
    } else {
        median(&positive)
    }
}

/// Tagwise dispersions: gene-wise estimates pulled towards the common
/// value with `prior_df` pseudo-degrees of freedom.
pub fn tagwise_dispersions(
    gene_wise: &[f64],
    common: f64,
    prior_df: f64,
    df_residual: usize,
) -> Vec<f64> {
    let df = df_residual as f64;
    gene_wise
        .iter()
        .map(|&d| ((df * d + prior_df * common) / (df + prior_df)).max(MIN_DISPERSION))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_gene_wise_poisson_is_floored() {
        // variance below the mean gives the floor
        let normalized = DMatrix::from_row_slice(1, 4, &[10.0, 10.0, 10.0, 10.0]);
        let d = gene_wise_dispersions(&normalized, &[1.0; 4]);
        assert_eq!(d[0], MIN_DISPERSION);
    }

    #[test]
    fn test_gene_wise_overdispersed() {
        let normalized = DMatrix::from_row_slice(1, 4, &[2.0, 18.0, 4.0, 16.0]);
        let d = gene_wise_dispersions(&normalized, &[1.0; 4]);
        // mean 10, variance 200 / 3
        assert_relative_eq!(d[0], (200.0 / 3.0 - 10.0) / 100.0, epsilon = 1e-12);
    }

    #[test]
    fn test_trend_recovers_exact_curve() {
        let means: Vec<f64> = (1..=20).map(|i| i as f64 * 5.0).collect();
        let disps: Vec<f64> = means.iter().map(|m| 0.05 + 2.0 / m).collect();
        let trend = fit_dispersion_trend(&means, &disps).unwrap();
        assert_relative_eq!(trend.asymptotic, 0.05, epsilon = 1e-6);
        assert_relative_eq!(trend.extra_poisson, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_shrinkage_moves_towards_trend() {
        let trend = DispersionTrend {
            asymptotic: 0.1,
            extra_poisson: 0.0,
        };
        let gene_wise = vec![0.5, 0.02, 0.1];
        let means = vec![50.0; 3];
        let shrunk = shrink_dispersions(&gene_wise, &means, &trend, 6, 2);
        assert!(shrunk[0] < 0.5 && shrunk[0] > 0.1);
        assert!(shrunk[1] > 0.02 && shrunk[1] < 0.1);
        assert_relative_eq!(shrunk[2], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_tagwise() {
        let t = tagwise_dispersions(&[0.4, 0.0], 0.2, 10.0, 10);
        assert_relative_eq!(t[0], 0.3, epsilon = 1e-12);
        assert_relative_eq!(t[1], 0.1, epsilon = 1e-12);
        assert_relative_eq!(common_dispersion(&[0.1, 0.3, 0.2, 0.0]), 0.2);
    }
}
