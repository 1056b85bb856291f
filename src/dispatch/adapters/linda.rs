//! LinDA: linear models on log2 CLR abundances with the compositional
//! bias removed.
//!
//! CLR coefficients are shifted by a common bias, the mean log ratio of
//! the whole composition. LinDA estimates it as the mode of all feature
//! coefficients for a term and subtracts it before testing.

use crate::dispatch::adapters::{bh, contrast_records, require_converged, Contrast, ContrastRow};
use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::Result;
use crate::model::model_lm;
use crate::normalize::norm_clr;
use crate::stats::kde_mode;
use crate::test::t_pvalue;
use crate::zero::add_pseudocount;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::Linda,
    orientation: Orientation::FeaturesBySamples,
    encoding: InputEncoding::Pseudocounted,
    covariates: CovariateEncoding::FactorAndNumeric,
    needs_baseline: true,
    max_levels: None,
    sub_methods: &[],
    prepare,
    invoke,
    collect,
};

/// One row of `linda(...)$output[[term]]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LindaRow {
    pub feature_id: String,
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    pub stat: f64,
    pub df: f64,
    pub pvalue: f64,
    pub padj: f64,
}

impl ContrastRow for LindaRow {
    fn feature_id(&self) -> &str {
        &self.feature_id
    }
    fn estimate(&self) -> Option<f64> {
        Some(self.log2_fold_change)
    }
    fn statistic(&self) -> Option<f64> {
        Some(self.stat)
    }
    fn p_value(&self) -> f64 {
        self.pvalue
    }
    fn p_adjust(&self) -> Option<f64> {
        Some(self.padj)
    }
}

fn prepare(input: &ValidatedInput, options: &MethodOptions) -> Result<PreparedInput> {
    let mut prepared = PreparedInput::from_validated(
        input,
        ADAPTER.orientation,
        ADAPTER.covariates,
        DMatrix::clone,
    );
    prepared.data = add_pseudocount(&prepared.data, options.pseudocount)?;
    Ok(prepared)
}

fn invoke(prepared: &PreparedInput, _options: &MethodOptions) -> Result<BackendOutput> {
    let design = prepared.design()?;
    let clr = norm_clr(&prepared.data)? / LN_2;

    let fit = model_lm(&clr, &prepared.feature_ids, &design)?;
    require_converged(ADAPTER.method.name(), fit.n_converged(), fit.n_features())?;
    let df = design.df_residual() as f64;

    let mut contrasts = Vec::new();
    for (level, col) in prepared.contrast_columns(&design)? {
        let betas: Vec<f64> = fit
            .fits
            .iter()
            .filter(|f| f.converged)
            .map(|f| f.coefficients[col])
            .collect();
        let bias = kde_mode(&betas);
        log::debug!("LinDA: bias {:.4} for {}{}", bias, prepared.group_column, level);

        let mut rows: Vec<LindaRow> = fit
            .fits
            .iter()
            .map(|f| {
                let beta = f.coefficients.get(col).copied().unwrap_or(f64::NAN) - bias;
                let se = f.std_errors.get(col).copied().unwrap_or(f64::NAN);
                let stat = if se > 0.0 { beta / se } else { f64::NAN };
                LindaRow {
                    feature_id: f.feature_id.clone(),
                    log2_fold_change: beta,
                    lfc_se: se,
                    stat,
                    df,
                    pvalue: if f.converged { t_pvalue(stat, df) } else { f64::NAN },
                    padj: f64::NAN,
                }
            })
            .collect();
        let p: Vec<f64> = rows.iter().map(|r| r.pvalue).collect();
        for (row, q) in rows.iter_mut().zip(bh(&p)) {
            row.padj = q;
        }
        contrasts.push(Contrast {
            group1: prepared.reference.clone(),
            group2: level,
            rows,
        });
    }
    Ok(BackendOutput::Linda(contrasts))
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    match output {
        BackendOutput::Linda(contrasts) => Ok(contrast_records(ADAPTER.method.name(), contrasts)),
        other => Err(other.mismatch(DaaMethod::Linda)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::adapters::fixtures;

    fn rows() -> Vec<LindaRow> {
        let prepared = fixtures::prepared(&ADAPTER);
        match invoke(&prepared, &MethodOptions::default()).unwrap() {
            BackendOutput::Linda(mut c) => c.remove(0).rows,
            other => panic!("unexpected output {:?}", other.method()),
        }
    }

    #[test]
    fn test_pseudocount_applied() {
        let prepared = fixtures::prepared(&ADAPTER);
        assert_eq!(prepared.data[(0, 0)], 20.5);
    }

    #[test]
    fn test_bias_correction_centres_null_features() {
        let rows = rows();
        // without correction the four unchanged features would all shift
        // by the same negative amount
        for r in &rows[2..] {
            assert!(r.log2_fold_change.abs() < 0.5, "{:?}", r);
        }
        assert!(rows[0].log2_fold_change > 2.5, "{:?}", rows[0]);
        assert!(rows[0].pvalue < 0.01);
        assert!(rows.iter().all(|r| r.df == 6.0));
    }
}
