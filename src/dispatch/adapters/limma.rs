//! limma-voom: TMM log-CPM with precision weights from the mean-variance
//! trend, weighted linear models and empirical Bayes moderated t-tests.

use crate::data::DesignMatrix;
use crate::dispatch::adapters::{
    bh, contrast_records, require_converged, round_counts, Contrast, ContrastRow,
};
use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::{DaaError, Result};
use crate::model::{model_lm, model_lm_weighted};
use crate::normalize::{effective_library_sizes, log_cpm, tmm_factors};
use crate::stats::{interpolate, lowess, mean};
use crate::test::moderated_t;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Lowess span used for the mean-variance trend.
const SPAN: f64 = 0.5;

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::LimmaVoom,
    orientation: Orientation::FeaturesBySamples,
    encoding: InputEncoding::IntegerCounts,
    covariates: CovariateEncoding::Factor,
    needs_baseline: true,
    max_levels: None,
    sub_methods: &[],
    prepare,
    invoke,
    collect,
};

/// One row of `topTable(eBayes(fit), coef)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimmaRow {
    pub feature_id: String,
    pub log_fc: f64,
    pub ave_expr: f64,
    pub t: f64,
    pub p_value: f64,
    pub adj_p_val: f64,
}

impl ContrastRow for LimmaRow {
    fn feature_id(&self) -> &str {
        &self.feature_id
    }
    fn estimate(&self) -> Option<f64> {
        Some(self.log_fc)
    }
    fn statistic(&self) -> Option<f64> {
        Some(self.t)
    }
    fn p_value(&self) -> f64 {
        self.p_value
    }
    fn p_adjust(&self) -> Option<f64> {
        Some(self.adj_p_val)
    }
}

fn prepare(input: &ValidatedInput, _options: &MethodOptions) -> Result<PreparedInput> {
    Ok(PreparedInput::from_validated(
        input,
        ADAPTER.orientation,
        ADAPTER.covariates,
        round_counts,
    ))
}

/// voom precision weights for `log_cpm` values (features × samples).
fn voom_weights(
    y: &DMatrix<f64>,
    lib_sizes: &[f64],
    feature_ids: &[String],
    design: &DesignMatrix,
) -> Result<DMatrix<f64>> {
    let fit = model_lm(y, feature_ids, design)?;
    let log_lib: Vec<f64> = lib_sizes.iter().map(|l| (l + 1.0).log2()).collect();
    let mean_log_lib = mean(&log_lib);

    // average log2 count against sqrt residual sd
    let (sx, sy): (Vec<f64>, Vec<f64>) = fit
        .fits
        .iter()
        .enumerate()
        .filter(|(_, f)| f.converged && f.sigma.is_finite())
        .map(|(i, f)| {
            let row_mean = mean(&y.row(i).iter().copied().collect::<Vec<_>>());
            (row_mean + mean_log_lib - 1e6_f64.log2(), f.sigma.sqrt())
        })
        .unzip();
    if sx.is_empty() {
        return Err(DaaError::method(
            ADAPTER.method.name(),
            "no feature has a finite residual variance for the mean-variance trend",
        ));
    }
    let (trend_x, trend_y) = lowess(&sx, &sy, SPAN, 3);
    let floor = trend_y.iter().copied().filter(|v| *v > 0.0).fold(f64::INFINITY, f64::min);
    let floor = if floor.is_finite() { floor } else { 1.0 };

    let x = design.matrix();
    let mut weights = DMatrix::from_element(y.nrows(), y.ncols(), 1.0);
    for (i, f) in fit.fits.iter().enumerate() {
        if !f.converged {
            continue;
        }
        for j in 0..y.ncols() {
            let fitted: f64 = (0..x.ncols()).map(|k| x[(j, k)] * f.coefficients[k]).sum();
            let log_count = fitted + log_lib[j] - 1e6_f64.log2();
            let predicted = interpolate(&trend_x, &trend_y, log_count).max(floor);
            weights[(i, j)] = 1.0 / predicted.powi(4);
        }
    }
    Ok(weights)
}

fn invoke(prepared: &PreparedInput, _options: &MethodOptions) -> Result<BackendOutput> {
    let counts = &prepared.data;
    let design = prepared.design()?;

    let tmm = tmm_factors(counts)?;
    let lib_sizes = effective_library_sizes(counts, &tmm);
    let y = log_cpm(counts, &lib_sizes);
    let weights = voom_weights(&y, &lib_sizes, &prepared.feature_ids, &design)?;

    let fit = model_lm_weighted(&y, &weights, &prepared.feature_ids, &design)?;
    require_converged(ADAPTER.method.name(), fit.n_converged(), fit.n_features())?;
    let ave_expr: Vec<f64> = y
        .row_iter()
        .map(|row| mean(&row.iter().copied().collect::<Vec<_>>()))
        .collect();

    let mut contrasts = Vec::new();
    for (level, col) in prepared.contrast_columns(&design)? {
        let tested = moderated_t(&fit, &design.coefficient_names()[col])?;
        log::debug!("limma voom: prior df {:.2} for {}", tested.df_prior, level);

        let mut rows: Vec<LimmaRow> = tested
            .results
            .iter()
            .zip(&fit.fits)
            .zip(&ave_expr)
            .map(|((r, f), &ave)| LimmaRow {
                feature_id: r.feature_id.clone(),
                log_fc: r.estimate,
                ave_expr: ave,
                t: r.statistic,
                p_value: if f.converged { r.p_value } else { f64::NAN },
                adj_p_val: f64::NAN,
            })
            .collect();
        let p: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
        for (row, q) in rows.iter_mut().zip(bh(&p)) {
            row.adj_p_val = q;
        }
        contrasts.push(Contrast {
            group1: prepared.reference.clone(),
            group2: level,
            rows,
        });
    }
    Ok(BackendOutput::LimmaVoom(contrasts))
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    match output {
        BackendOutput::LimmaVoom(contrasts) => {
            Ok(contrast_records(ADAPTER.method.name(), contrasts))
        }
        other => Err(other.mismatch(DaaMethod::LimmaVoom)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::adapters::fixtures;

    #[test]
    fn test_voom_weights_are_positive() {
        let prepared = fixtures::prepared(&ADAPTER);
        let design = prepared.design().unwrap();
        let tmm = tmm_factors(&prepared.data).unwrap();
        let libs = effective_library_sizes(&prepared.data, &tmm);
        let y = log_cpm(&prepared.data, &libs);
        let w = voom_weights(&y, &libs, &prepared.feature_ids, &design).unwrap();
        assert_eq!(w.shape(), y.shape());
        assert!(w.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn test_moderated_contrast() {
        let prepared = fixtures::prepared(&ADAPTER);
        let contrasts = match invoke(&prepared, &MethodOptions::default()).unwrap() {
            BackendOutput::LimmaVoom(c) => c,
            other => panic!("unexpected output {:?}", other.method()),
        };
        let rows = &contrasts[0].rows;
        assert_eq!(rows.len(), 6);
        assert!(rows[0].log_fc > 2.5 && rows[0].p_value < 0.01, "{:?}", rows[0]);
        assert!(rows.iter().all(|r| r.ave_expr.is_finite()));

        let records = collect(BackendOutput::LimmaVoom(contrasts)).unwrap();
        assert!(records.iter().all(|r| r.method == "limma voom"));
    }
}
