//! Negative Binomial GLM for count data.
//!
//! Log-link NB regression with per-sample offsets, fitted by IRLS. The
//! offsets carry library size normalization (log size factors for DESeq2,
//! log effective library sizes for edgeR).

use crate::data::DesignMatrix;
use crate::error::{DaaError, Result};
use crate::stats::ln_gamma;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum iterations for IRLS convergence.
const MAX_ITER: usize = 50;

/// Convergence tolerance on the relative deviance change.
const TOL: f64 = 1e-8;

/// Minimum value for mean to avoid log(0).
const MIN_MU: f64 = 1e-10;

/// Smallest dispersion used in fitting.
pub const MIN_DISPERSION: f64 = 1e-8;

/// How dispersions are obtained during fitting.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispersion {
    /// Re-estimate each feature's dispersion by moments at every IRLS step.
    MethodOfMoments,
    /// One dispersion per feature, held fixed.
    Fixed(Vec<f64>),
}

/// Results from fitting a negative binomial model to a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NbFitSingle {
    pub feature_id: String,
    /// Estimated coefficients (natural log scale).
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    /// Dispersion alpha, with Var = mu + alpha * mu^2.
    pub dispersion: f64,
    pub log_likelihood: f64,
    pub deviance: f64,
    pub df_residual: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Fitted means.
    #[serde(skip)]
    pub fitted_values: Vec<f64>,
}

impl NbFitSingle {
    /// Wald z-statistic for a coefficient.
    pub fn z_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 && se.is_finite() {
            Some(coef / se)
        } else {
            None
        }
    }
}

/// NB fits for all features.
#[derive(Debug, Clone)]
pub struct NbFit {
    pub fits: Vec<NbFitSingle>,
    pub coefficient_names: Vec<String>,
    pub n_samples: usize,
}

impl NbFit {
    pub fn get_feature(&self, feature_id: &str) -> Option<&NbFitSingle> {
        self.fits.iter().find(|f| f.feature_id == feature_id)
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    pub fn n_features(&self) -> usize {
        self.fits.len()
    }

    pub fn n_converged(&self) -> usize {
        self.fits.iter().filter(|f| f.converged).count()
    }
}

/// Fit NB GLMs to every row of `counts` (features × samples).
///
/// `offsets` holds one log-scale offset per sample.
pub fn model_nb(
    counts: &DMatrix<f64>,
    feature_ids: &[String],
    design: &DesignMatrix,
    offsets: &[f64],
    dispersion: &Dispersion,
) -> Result<NbFit> {
    let (n_features, n_samples) = counts.shape();
    if design.n_samples() != n_samples || offsets.len() != n_samples {
        return Err(DaaError::invalid(format!(
            "design has {} samples, offsets {}, counts {}",
            design.n_samples(),
            offsets.len(),
            n_samples
        )));
    }
    if feature_ids.len() != n_features {
        return Err(DaaError::invalid("feature IDs do not match count rows"));
    }
    if let Dispersion::Fixed(d) = dispersion {
        if d.len() != n_features {
            return Err(DaaError::invalid(format!(
                "{} dispersions for {} features",
                d.len(),
                n_features
            )));
        }
    }
    if design.df_residual() == 0 {
        return Err(DaaError::method(
            "negative binomial GLM",
            "model is saturated (n_samples <= n_coefficients)",
        ));
    }
    if !design.is_full_rank() {
        return Err(DaaError::method("negative binomial GLM", "design matrix is not full rank"));
    }

    let x = design.matrix();
    let offset = DVector::from_column_slice(offsets);

    let fits: Vec<NbFitSingle> = (0..n_features)
        .into_par_iter()
        .map(|i| {
            let y = DVector::from_iterator(n_samples, counts.row(i).iter().copied());
            let fixed = match dispersion {
                Dispersion::Fixed(d) => Some(d[i].max(MIN_DISPERSION)),
                Dispersion::MethodOfMoments => None,
            };
            fit_single_nb(&y, &feature_ids[i], x, &offset, fixed, design.df_residual())
        })
        .collect();

    let n_converged = fits.iter().filter(|f| f.converged).count();
    if n_converged < n_features {
        log::debug!("NB GLM: {}/{} features converged", n_converged, n_features);
    }

    Ok(NbFit {
        fits,
        coefficient_names: design.coefficient_names().to_vec(),
        n_samples,
    })
}

fn fit_single_nb(
    y: &DVector<f64>,
    feature_id: &str,
    x: &DMatrix<f64>,
    offset: &DVector<f64>,
    fixed_dispersion: Option<f64>,
    df_residual: usize,
) -> NbFitSingle {
    let n = y.len();
    let p = x.ncols();

    // start from the intercept-only solution on the offset scale
    let mut beta = DVector::zeros(p);
    let rate = y.sum() / offset.iter().map(|o| o.exp()).sum::<f64>();
    beta[0] = rate.max(MIN_MU).ln();
    let mut mu = compute_mu(x, &beta, offset);
    let mut alpha =
        fixed_dispersion.unwrap_or_else(|| estimate_dispersion_mom(y, &mu, df_residual));
    let mut deviance = nb_deviance(y, &mu, alpha);

    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..MAX_ITER {
        iterations = iter + 1;

        let w = DVector::from_iterator(n, mu.iter().map(|&m| m / (1.0 + alpha * m)));
        let z = DVector::from_iterator(
            n,
            (0..n).map(|k| {
                let m = mu[k].max(MIN_MU);
                m.ln() - offset[k] + (y[k] - m) / m
            }),
        );

        let mut xtw = x.transpose();
        for (k, mut col) in xtw.column_iter_mut().enumerate() {
            col *= w[k];
        }
        let Some(xtwx_inv) = (&xtw * x).try_inverse() else {
            break;
        };
        let beta_new = xtwx_inv * (&xtw * z);
        if beta_new.iter().any(|b| !b.is_finite()) {
            break;
        }

        beta = beta_new;
        mu = compute_mu(x, &beta, offset);
        if fixed_dispersion.is_none() {
            alpha = estimate_dispersion_mom(y, &mu, df_residual);
        }

        let new_deviance = nb_deviance(y, &mu, alpha);
        let change = (new_deviance - deviance).abs() / (new_deviance.abs() + 0.1);
        deviance = new_deviance;
        if change < TOL {
            converged = true;
            break;
        }
    }

    // Fisher information at the final estimates
    let w = DVector::from_iterator(n, mu.iter().map(|&m| m / (1.0 + alpha * m)));
    let mut xtw = x.transpose();
    for (k, mut col) in xtw.column_iter_mut().enumerate() {
        col *= w[k];
    }
    let std_errors = match (&xtw * x).try_inverse() {
        Some(cov) => (0..p).map(|j| cov[(j, j)].max(0.0).sqrt()).collect(),
        None => {
            converged = false;
            vec![f64::NAN; p]
        }
    };

    NbFitSingle {
        feature_id: feature_id.to_string(),
        coefficients: beta.iter().copied().collect(),
        std_errors,
        dispersion: alpha,
        log_likelihood: nb_log_likelihood(y, &mu, alpha),
        deviance,
        df_residual,
        iterations,
        converged,
        fitted_values: mu.iter().copied().collect(),
    }
}

fn compute_mu(x: &DMatrix<f64>, beta: &DVector<f64>, offset: &DVector<f64>) -> DVector<f64> {
    let eta = x * beta + offset;
    DVector::from_iterator(eta.len(), eta.iter().map(|e| e.exp().max(MIN_MU)))
}

/// Moment estimate of alpha from Var(Y) = mu + alpha * mu^2.
fn estimate_dispersion_mom(y: &DVector<f64>, mu: &DVector<f64>, df_residual: usize) -> f64 {
    let excess: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            ((yi - m).powi(2) - m) / (m * m)
        })
        .sum();
    (excess / df_residual.max(1) as f64).max(MIN_DISPERSION)
}

/// NB log-likelihood with dispersion alpha.
pub fn nb_log_likelihood(y: &DVector<f64>, mu: &DVector<f64>, alpha: f64) -> f64 {
    let theta = 1.0 / alpha.max(MIN_DISPERSION);
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            ln_gamma(yi + theta) - ln_gamma(theta) - ln_gamma(yi + 1.0)
                + theta * (theta / (theta + m)).ln()
                + if yi > 0.0 { yi * (m / (theta + m)).ln() } else { 0.0 }
        })
        .sum()
}

/// NB deviance with dispersion alpha.
pub fn nb_deviance(y: &DVector<f64>, mu: &DVector<f64>, alpha: f64) -> f64 {
    let theta = 1.0 / alpha.max(MIN_DISPERSION);
    let dev: f64 = y
        .iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let m = mi.max(MIN_MU);
            let term1 = if yi > 0.0 { yi * (yi / m).ln() } else { 0.0 };
            let term2 = (yi + theta) * ((yi + theta) / (m + theta)).ln();
            term1 - term2
        })
        .sum();
    2.0 * dev
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Metadata;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    fn create_test_design() -> DesignMatrix {
        let tsv = "sample_id\tgroup\n\
                   S1\tcontrol\nS2\tcontrol\nS3\tcontrol\nS4\tcontrol\n\
                   S5\ttreatment\nS6\ttreatment\nS7\ttreatment\nS8\ttreatment\n";
        let metadata = Metadata::from_reader(Cursor::new(tsv), None).unwrap();
        DesignMatrix::for_groups(&metadata, "group", "control", &[]).unwrap()
    }

    fn create_test_counts() -> (DMatrix<f64>, Vec<String>) {
        let counts = DMatrix::from_row_slice(
            2,
            8,
            &[
                // no effect
                50.0, 60.0, 45.0, 55.0, 52.0, 58.0, 48.0, 57.0, //
                // roughly fourfold up in treatment
                20.0, 25.0, 18.0, 22.0, 85.0, 90.0, 80.0, 95.0,
            ],
        );
        (counts, vec!["stable".into(), "up".into()])
    }

    #[test]
    fn test_model_nb_basic() {
        let design = create_test_design();
        let (counts, ids) = create_test_counts();
        let fit =
            model_nb(&counts, &ids, &design, &[0.0; 8], &Dispersion::MethodOfMoments).unwrap();

        assert_eq!(fit.n_features(), 2);
        assert_eq!(fit.n_converged(), 2);

        let up = fit.get_feature("up").unwrap();
        // group means 21.25 and 87.5
        assert_relative_eq!(up.coefficients[0], 21.25_f64.ln(), epsilon = 1e-4);
        assert_relative_eq!(up.coefficients[1], (87.5_f64 / 21.25).ln(), epsilon = 1e-4);
        assert!(up.z_statistic(1).unwrap() > 5.0);

        let stable = fit.get_feature("stable").unwrap();
        assert!(stable.coefficients[1].abs() < 0.2);
    }

    #[test]
    fn test_offsets_shift_intercept() {
        let design = create_test_design();
        let (counts, ids) = create_test_counts();
        let dispersion = Dispersion::Fixed(vec![0.01, 0.01]);
        let plain = model_nb(&counts, &ids, &design, &[0.0; 8], &dispersion).unwrap();
        let shifted = model_nb(&counts, &ids, &design, &[2.0_f64.ln(); 8], &dispersion).unwrap();
        assert_relative_eq!(
            plain.fits[1].coefficients[0] - shifted.fits[1].coefficients[0],
            2.0_f64.ln(),
            epsilon = 1e-5
        );
        assert_relative_eq!(
            plain.fits[1].coefficients[1],
            shifted.fits[1].coefficients[1],
            epsilon = 1e-5
        );
        assert_eq!(shifted.fits[1].dispersion, 0.01);
    }

    #[test]
    fn test_fixed_dispersion_length_checked() {
        let design = create_test_design();
        let (counts, ids) = create_test_counts();
        let result = model_nb(&counts, &ids, &design, &[0.0; 8], &Dispersion::Fixed(vec![0.1]));
        assert!(result.is_err());
    }

    #[test]
    fn test_deviance_zero_at_saturation() {
        let y = DVector::from_vec(vec![3.0, 0.0, 7.0]);
        assert_relative_eq!(nb_deviance(&y, &y, 0.2), 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_log_likelihood_matches_poisson_limit() {
        // tiny dispersion approaches the Poisson likelihood
        let y = DVector::from_vec(vec![2.0]);
        let mu = DVector::from_vec(vec![3.0]);
        let poisson = 2.0 * 3.0_f64.ln() - 3.0 - 2.0_f64.ln();
        assert_relative_eq!(nb_log_likelihood(&y, &mu, 1e-8), poisson, epsilon = 1e-4);
    }
}
