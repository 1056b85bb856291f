//! Linear model fitting via (weighted) least squares.

use crate::data::DesignMatrix;
use crate::error::{DaaError, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Results from fitting a linear model to a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmFitSingle {
    pub feature_id: String,
    /// Estimated coefficients.
    pub coefficients: Vec<f64>,
    /// Standard errors of coefficients.
    pub std_errors: Vec<f64>,
    /// sqrt(diag((X'WX)^-1)), the standard errors before scaling by sigma.
    pub stdev_unscaled: Vec<f64>,
    /// Residual standard error.
    pub sigma: f64,
    /// Degrees of freedom (residual).
    pub df_residual: usize,
    /// Whether the fit was successful.
    pub converged: bool,
}

impl LmFitSingle {
    /// t-statistic for a coefficient.
    pub fn t_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }
}

/// Results from fitting linear models to all features.
#[derive(Debug, Clone)]
pub struct LmFit {
    /// Individual fits, in feature order.
    pub fits: Vec<LmFitSingle>,
    /// Coefficient names from the design matrix.
    pub coefficient_names: Vec<String>,
    pub n_samples: usize,
}

impl LmFit {
    pub fn get_feature(&self, feature_id: &str) -> Option<&LmFitSingle> {
        self.fits.iter().find(|f| f.feature_id == feature_id)
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    pub fn n_features(&self) -> usize {
        self.fits.len()
    }

    pub fn n_coefficients(&self) -> usize {
        self.coefficient_names.len()
    }

    pub fn n_converged(&self) -> usize {
        self.fits.iter().filter(|f| f.converged).count()
    }
}

/// Fit OLS regressions of every row of `data` (features × samples) on the design.
pub fn model_lm(
    data: &DMatrix<f64>,
    feature_ids: &[String],
    design: &DesignMatrix,
) -> Result<LmFit> {
    check_shapes(data, feature_ids, design)?;
    let x = design.matrix();
    let xtx_inv = invert(&(x.transpose() * x))?;
    let df_residual = design.df_residual();

    let fits: Vec<LmFitSingle> = (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let y = DVector::from_iterator(data.ncols(), data.row(i).iter().copied());
            fit_single(&y, &feature_ids[i], x, &xtx_inv, None, df_residual)
        })
        .collect();

    Ok(LmFit {
        fits,
        coefficient_names: design.coefficient_names().to_vec(),
        n_samples: data.ncols(),
    })
}

/// Fit weighted least squares per feature with observation weights
/// (features × samples, same shape as `data`).
pub fn model_lm_weighted(
    data: &DMatrix<f64>,
    weights: &DMatrix<f64>,
    feature_ids: &[String],
    design: &DesignMatrix,
) -> Result<LmFit> {
    check_shapes(data, feature_ids, design)?;
    if weights.shape() != data.shape() {
        return Err(DaaError::invalid(format!(
            "weights have shape {:?}, data has shape {:?}",
            weights.shape(),
            data.shape()
        )));
    }
    let x = design.matrix();
    let df_residual = design.df_residual();

    let fits: Vec<LmFitSingle> = (0..data.nrows())
        .into_par_iter()
        .map(|i| {
            let n = data.ncols();
            let y = DVector::from_iterator(n, data.row(i).iter().copied());
            let w = DVector::from_iterator(n, weights.row(i).iter().copied());
            let mut xw = x.clone();
            for (r, mut row) in xw.row_iter_mut().enumerate() {
                row *= w[r];
            }
            match (x.transpose() * &xw).try_inverse() {
                Some(inv) => fit_single(&y, &feature_ids[i], x, &inv, Some(&w), df_residual),
                None => failed_fit(&feature_ids[i], x.ncols(), df_residual),
            }
        })
        .collect();

    Ok(LmFit {
        fits,
        coefficient_names: design.coefficient_names().to_vec(),
        n_samples: data.ncols(),
    })
}

fn check_shapes(data: &DMatrix<f64>, feature_ids: &[String], design: &DesignMatrix) -> Result<()> {
    if design.n_samples() != data.ncols() {
        return Err(DaaError::invalid(format!(
            "design has {} samples, data has {}",
            design.n_samples(),
            data.ncols()
        )));
    }
    if feature_ids.len() != data.nrows() {
        return Err(DaaError::invalid(format!(
            "{} feature IDs for {} rows",
            feature_ids.len(),
            data.nrows()
        )));
    }
    if design.df_residual() == 0 {
        return Err(DaaError::method(
            "linear model",
            "model is saturated (n_samples <= n_coefficients)",
        ));
    }
    Ok(())
}

fn invert(xtx: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    xtx.clone()
        .try_inverse()
        .ok_or_else(|| {
            DaaError::method("linear model", "design matrix is singular (X'X not invertible)")
        })
}

/// Fit one feature with a pre-computed (X'WX)^-1.
fn fit_single(
    y: &DVector<f64>,
    feature_id: &str,
    x: &DMatrix<f64>,
    xtwx_inv: &DMatrix<f64>,
    weights: Option<&DVector<f64>>,
    df_residual: usize,
) -> LmFitSingle {
    let n_coef = x.ncols();
    let wy = match weights {
        Some(w) => y.component_mul(w),
        None => y.clone(),
    };
    let beta = xtwx_inv * (x.transpose() * wy);
    let residuals = y - x * &beta;

    let rss: f64 = match weights {
        Some(w) => residuals.iter().zip(w.iter()).map(|(e, wi)| wi * e * e).sum(),
        None => residuals.iter().map(|e| e * e).sum(),
    };
    let sigma = (rss / df_residual as f64).sqrt();

    let stdev_unscaled: Vec<f64> = (0..n_coef).map(|j| xtwx_inv[(j, j)].max(0.0).sqrt()).collect();
    let std_errors = stdev_unscaled.iter().map(|s| s * sigma).collect();
    let converged = beta.iter().all(|b| b.is_finite()) && sigma.is_finite();

    LmFitSingle {
        feature_id: feature_id.to_string(),
        coefficients: beta.iter().copied().collect(),
        std_errors,
        stdev_unscaled,
        sigma,
        df_residual,
        converged,
    }
}

fn failed_fit(feature_id: &str, n_coef: usize, df_residual: usize) -> LmFitSingle {
    LmFitSingle {
        feature_id: feature_id.to_string(),
        coefficients: vec![f64::NAN; n_coef],
        std_errors: vec![f64::NAN; n_coef],
        stdev_unscaled: vec![f64::NAN; n_coef],
        sigma: f64::NAN,
        df_residual,
        converged: false,
    }
}
