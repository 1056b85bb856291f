//! Empirical Bayes moderation of linear model variances (limma).
//!
//! Residual variances are assumed to follow a scaled inverse chi-squared
//! prior. The prior degrees of freedom and scale are estimated from all
//! features by matching moments of log variances, and each variance is
//! shrunk towards the prior scale. Moderated t-statistics then use the
//! posterior variances with `df_residual + df_prior` degrees of freedom.

use crate::error::{DaaError, Result};
use crate::model::LmFit;
use crate::stats::{digamma, trigamma, trigamma_inverse};
use crate::test::wald::t_pvalue;
use serde::{Deserialize, Serialize};

/// Prior and posterior variances from [`squeeze_var`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqueezedVariances {
    /// Prior degrees of freedom; infinite when there is no extra variation.
    pub df_prior: f64,
    pub var_prior: f64,
    pub var_post: Vec<f64>,
}

/// Estimate a scaled F prior from sample variances `var` on `df` degrees
/// of freedom and shrink every variance towards it.
///
/// Non-finite or non-positive variances are excluded from the prior fit
/// and keep the prior value as posterior.
pub fn squeeze_var(var: &[f64], df: f64) -> Result<SqueezedVariances> {
    if !(df > 0.0) {
        return Err(DaaError::invalid("residual degrees of freedom must be positive"));
    }
    let usable: Vec<f64> = var.iter().copied().filter(|v| v.is_finite() && *v > 0.0).collect();
    if usable.is_empty() {
        return Err(DaaError::invalid("no positive finite variances to moderate"));
    }

    let half = df / 2.0;
    let e: Vec<f64> = usable.iter().map(|v| v.ln() - digamma(half) + half.ln()).collect();
    let n = e.len() as f64;
    let e_mean = e.iter().sum::<f64>() / n;
    let e_var = if e.len() > 1 {
        e.iter().map(|x| (x - e_mean).powi(2)).sum::<f64>() / (n - 1.0) - trigamma(half)
    } else {
        0.0
    };

    let (df_prior, var_prior) = if e_var > 0.0 {
        let d0 = 2.0 * trigamma_inverse(e_var);
        (d0, (e_mean + digamma(d0 / 2.0) - (d0 / 2.0).ln()).exp())
    } else {
        (f64::INFINITY, e_mean.exp())
    };

    let var_post = var
        .iter()
        .map(|&v| {
            if !(v.is_finite() && v > 0.0) || df_prior.is_infinite() {
                var_prior
            } else {
                (df * v + df_prior * var_prior) / (df + df_prior)
            }
        })
        .collect();

    Ok(SqueezedVariances {
        df_prior,
        var_prior,
        var_post,
    })
}

/// Moderated t-test of one coefficient for a single feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedTSingle {
    pub feature_id: String,
    pub estimate: f64,
    pub statistic: f64,
    pub df_total: f64,
    pub p_value: f64,
}

/// Moderated t-tests of one coefficient across features.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratedTResult {
    pub coefficient: String,
    pub df_prior: f64,
    pub var_prior: f64,
    pub results: Vec<ModeratedTSingle>,
}

/// Empirical Bayes moderated t-statistics for `coefficient`.
///
/// Total degrees of freedom are capped at the pooled residual degrees of
/// freedom over all features.
pub fn moderated_t(fit: &LmFit, coefficient: &str) -> Result<ModeratedTResult> {
    let idx = fit.coefficient_index(coefficient).ok_or_else(|| {
        DaaError::invalid(format!(
            "coefficient '{}' not found; available: {:?}",
            coefficient, fit.coefficient_names
        ))
    })?;
    let df = fit.fits.first().map(|f| f.df_residual as f64).unwrap_or(0.0);
    let variances: Vec<f64> = fit.fits.iter().map(|f| f.sigma * f.sigma).collect();
    let squeezed = squeeze_var(&variances, df)?;
    let df_pooled = df * fit.fits.len() as f64;
    let df_total = (df + squeezed.df_prior).min(df_pooled);

    let results = fit
        .fits
        .iter()
        .zip(&squeezed.var_post)
        .map(|(f, s2)| {
            let estimate = f.coefficients.get(idx).copied().unwrap_or(f64::NAN);
            let unscaled = f.stdev_unscaled.get(idx).copied().unwrap_or(f64::NAN);
            let se = unscaled * s2.sqrt();
            let statistic = if se > 0.0 { estimate / se } else { f64::NAN };
            ModeratedTSingle {
                feature_id: f.feature_id.clone(),
                estimate,
                statistic,
                df_total,
                p_value: t_pvalue(statistic, df_total),
            }
        })
        .collect();

    log::debug!(
        "eBayes prior: df = {:.3}, s2 = {:.4}",
        squeezed.df_prior,
        squeezed.var_prior
    );

    Ok(ModeratedTResult {
        coefficient: coefficient.to_string(),
        df_prior: squeezed.df_prior,
        var_prior: squeezed.var_prior,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DesignMatrix, Metadata};
    use crate::model::model_lm;
    use approx::assert_relative_eq;
    use nalgebra::DMatrix;
    use std::io::Cursor;

    #[test]
    fn test_identical_variances_give_infinite_prior() {
        let s = squeeze_var(&[0.5, 0.5, 0.5, 0.5], 4.0).unwrap();
        assert!(s.df_prior.is_infinite());
        // e_mean = ln(0.5) - digamma(2) + ln(2); exp of it
        let expected = (0.5_f64.ln() - digamma(2.0) + 2.0_f64.ln()).exp();
        assert_relative_eq!(s.var_prior, expected, epsilon = 1e-12);
        assert!(s.var_post.iter().all(|v| (*v - expected).abs() < 1e-12));
    }

    #[test]
    fn test_spread_variances_are_shrunk() {
        let var = [0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 20.0];
        let s = squeeze_var(&var, 3.0).unwrap();
        assert!(s.df_prior.is_finite() && s.df_prior > 0.0);
        for (v, post) in var.iter().zip(&s.var_post) {
            // posterior lies between the raw variance and the prior
            let (lo, hi) = if *v < s.var_prior { (*v, s.var_prior) } else { (s.var_prior, *v) };
            assert!(*post >= lo - 1e-12 && *post <= hi + 1e-12);
        }
    }

    #[test]
    fn test_squeeze_rejects_bad_input() {
        assert!(squeeze_var(&[1.0], 0.0).is_err());
        assert!(squeeze_var(&[f64::NAN, 0.0], 2.0).is_err());
    }

    #[test]
    fn test_moderated_t() {
        let tsv = "id\tgroup\nS1\ta\nS2\ta\nS3\ta\nS4\tb\nS5\tb\nS6\tb\n";
        let metadata = Metadata::from_reader(Cursor::new(tsv), None).unwrap();
        let design = DesignMatrix::for_groups(&metadata, "group", "a", &[]).unwrap();
        let data = DMatrix::from_row_slice(
            3,
            6,
            &[
                1.0, 1.2, 0.8, 4.0, 4.3, 3.9, //
                2.0, 2.5, 1.5, 2.1, 1.8, 2.2, //
                5.0, 3.0, 4.0, 4.5, 5.5, 3.5,
            ],
        );
        let ids: Vec<String> = vec!["up".into(), "flat".into(), "noisy".into()];
        let fit = model_lm(&data, &ids, &design).unwrap();
        let result = moderated_t(&fit, "groupb").unwrap();
        assert_eq!(result.results.len(), 3);
        assert!(result.results[0].p_value < 0.01);
        assert!(result.results[1].p_value > 0.2);
        assert!(result.results.iter().all(|r| r.df_total >= 4.0 && r.df_total <= 12.0));
        assert!(moderated_t(&fit, "groupz").is_err());
    }
}
