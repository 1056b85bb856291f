//! Maaslin2 defaults: total sum scaling, prevalence filtering, log2 with
//! half-minimum zero replacement and a linear model per feature.

use crate::dispatch::adapters::{bh, require_converged};
use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::{DaaError, Result};
use crate::model::model_lm;
use crate::test::t_pvalue;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Minimum fraction of samples in which a feature must be non-zero.
const MIN_PREVALENCE: f64 = 0.1;

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::Maaslin2,
    orientation: Orientation::SamplesByFeatures,
    encoding: InputEncoding::Abundance,
    covariates: CovariateEncoding::FactorAndNumeric,
    needs_baseline: true,
    max_levels: None,
    sub_methods: &[],
    prepare,
    invoke,
    collect,
};

/// One row of Maaslin2's `all_results.tsv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaaslinRow {
    pub feature: String,
    /// Metadata variable.
    pub metadata: String,
    /// Level for factors, the variable name for numeric terms.
    pub value: String,
    pub coef: f64,
    pub stderr: f64,
    pub n: usize,
    pub n_not_zero: usize,
    pub pval: f64,
    pub qval: f64,
}

/// All model terms plus what is needed to pick out the group contrasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaaslinOutput {
    pub group_column: String,
    pub reference: String,
    pub rows: Vec<MaaslinRow>,
}

fn prepare(input: &ValidatedInput, _options: &MethodOptions) -> Result<PreparedInput> {
    Ok(PreparedInput::from_validated(
        input,
        ADAPTER.orientation,
        ADAPTER.covariates,
        DMatrix::clone,
    ))
}

/// Split a design column name into (variable, value).
fn split_term(name: &str, variables: &[String]) -> (String, String) {
    let variable = variables
        .iter()
        .filter(|v| name.starts_with(v.as_str()))
        .max_by_key(|v| v.len());
    match variable {
        Some(v) if name.len() > v.len() => (v.clone(), name[v.len()..].to_string()),
        Some(v) => (v.clone(), v.clone()),
        None => (name.to_string(), name.to_string()),
    }
}

fn invoke(prepared: &PreparedInput, _options: &MethodOptions) -> Result<BackendOutput> {
    // samples x features
    let data = &prepared.data;
    let (n_samples, n_features) = data.shape();
    let design = prepared.design()?;

    let mut relative = data.clone();
    for mut row in relative.row_iter_mut() {
        let total: f64 = row.sum();
        if total > 0.0 {
            row /= total;
        }
    }

    let kept: Vec<usize> = (0..n_features)
        .filter(|&f| {
            let nonzero = relative.column(f).iter().filter(|v| **v > 0.0).count();
            nonzero as f64 / n_samples as f64 >= MIN_PREVALENCE
        })
        .collect();
    if kept.is_empty() {
        return Err(DaaError::method(
            ADAPTER.method.name(),
            format!("no feature is present in at least {}% of samples", MIN_PREVALENCE * 100.0),
        ));
    }
    if kept.len() < n_features {
        log::warn!(
            "Maaslin2: {} feature(s) below {}% prevalence were not tested",
            n_features - kept.len(),
            MIN_PREVALENCE * 100.0
        );
    }

    // features x samples, log2 with zeros at half the feature's minimum
    let logged = DMatrix::from_fn(kept.len(), n_samples, |k, j| {
        let column = relative.column(kept[k]);
        let half_min =
            column.iter().copied().filter(|v| *v > 0.0).fold(f64::INFINITY, f64::min) / 2.0;
        let v = relative[(j, kept[k])];
        if v > 0.0 {
            v.log2()
        } else {
            half_min.log2()
        }
    });
    let feature_ids: Vec<String> = kept.iter().map(|&f| prepared.feature_ids[f].clone()).collect();
    let n_not_zero: Vec<usize> = kept
        .iter()
        .map(|&f| data.column(f).iter().filter(|v| **v > 0.0).count())
        .collect();

    let fit = model_lm(&logged, &feature_ids, &design)?;
    require_converged(ADAPTER.method.name(), fit.n_converged(), fit.n_features())?;

    let mut variables = vec![prepared.group_column.clone()];
    variables.extend(prepared.covariates.iter().cloned());

    let mut rows = Vec::new();
    for (col, name) in design.coefficient_names().iter().enumerate().skip(1) {
        let (metadata, value) = split_term(name, &variables);
        for (k, f) in fit.fits.iter().enumerate() {
            let coef = f.coefficients.get(col).copied().unwrap_or(f64::NAN);
            let stderr = f.std_errors.get(col).copied().unwrap_or(f64::NAN);
            let pval = if f.converged && stderr > 0.0 {
                t_pvalue(coef / stderr, f.df_residual as f64)
            } else {
                f64::NAN
            };
            rows.push(MaaslinRow {
                feature: feature_ids[k].clone(),
                metadata: metadata.clone(),
                value: value.clone(),
                coef,
                stderr,
                n: n_samples,
                n_not_zero: n_not_zero[k],
                pval,
                qval: f64::NAN,
            });
        }
    }
    let p: Vec<f64> = rows.iter().map(|r| r.pval).collect();
    for (row, q) in rows.iter_mut().zip(bh(&p)) {
        row.qval = q;
    }

    Ok(BackendOutput::Maaslin2(MaaslinOutput {
        group_column: prepared.group_column.clone(),
        reference: prepared.reference.clone(),
        rows,
    }))
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    let output = match output {
        BackendOutput::Maaslin2(o) => o,
        other => return Err(other.mismatch(DaaMethod::Maaslin2)),
    };
    let MaaslinOutput {
        group_column,
        reference,
        rows,
    } = output;
    Ok(rows
        .into_iter()
        .filter(|r| r.metadata == group_column && r.pval.is_finite())
        .map(|r| RawRecord {
            feature_id: r.feature,
            method: ADAPTER.method.name().to_string(),
            group1: reference.clone(),
            group2: r.value,
            estimate: Some(r.coef),
            statistic: None,
            p_value: r.pval,
            p_adjust: Some(r.qval),
        })
        .collect())
}
