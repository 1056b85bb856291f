//! metagenomeSeq: cumulative sum scaling, log2 normalized abundances and
//! moderated linear models per contrast.

use crate::dispatch::adapters::{bh, contrast_records, require_converged, Contrast, ContrastRow};
use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::Result;
use crate::model::model_lm;
use crate::normalize::{css_factors, css_percentile, norm_css};
use crate::test::moderated_t;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::MetagenomeSeq,
    orientation: Orientation::FeaturesBySamples,
    encoding: InputEncoding::Abundance,
    covariates: CovariateEncoding::Factor,
    needs_baseline: true,
    max_levels: None,
    sub_methods: &[],
    prepare,
    invoke,
    collect,
};

/// One row of `MRfulltable(fit)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitZigRow {
    pub feature_id: String,
    pub log_fc: f64,
    pub se: f64,
    pub t: f64,
    pub p_value: f64,
    pub adj_p_value: f64,
}

impl ContrastRow for FitZigRow {
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
        Some(self.adj_p_value)
    }
}

fn prepare(input: &ValidatedInput, _options: &MethodOptions) -> Result<PreparedInput> {
    Ok(PreparedInput::from_validated(
        input,
        ADAPTER.orientation,
        ADAPTER.covariates,
        DMatrix::clone,
    ))
}

fn invoke(prepared: &PreparedInput, _options: &MethodOptions) -> Result<BackendOutput> {
    let data = &prepared.data;
    let design = prepared.design()?;

    let p = css_percentile(data)?;
    let factors = css_factors(data, p)?;
    log::debug!("metagenomeSeq: CSS percentile {:.3}", p);
    let y = norm_css(data, &factors, true);

    let fit = model_lm(&y, &prepared.feature_ids, &design)?;
    require_converged(ADAPTER.method.name(), fit.n_converged(), fit.n_features())?;

    let mut contrasts = Vec::new();
    for (level, col) in prepared.contrast_columns(&design)? {
        let tested = moderated_t(&fit, &design.coefficient_names()[col])?;
        let mut rows: Vec<FitZigRow> = tested
            .results
            .iter()
            .zip(&fit.fits)
            .map(|(r, f)| FitZigRow {
                feature_id: r.feature_id.clone(),
                log_fc: r.estimate,
                se: if r.statistic != 0.0 { r.estimate / r.statistic } else { f64::NAN },
                t: r.statistic,
                p_value: if f.converged { r.p_value } else { f64::NAN },
                adj_p_value: f64::NAN,
            })
            .collect();
        let p: Vec<f64> = rows.iter().map(|r| r.p_value).collect();
        for (row, q) in rows.iter_mut().zip(bh(&p)) {
            row.adj_p_value = q;
        }
        contrasts.push(Contrast {
            group1: prepared.reference.clone(),
            group2: level,
            rows,
        });
    }
    Ok(BackendOutput::MetagenomeSeq(contrasts))
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    match output {
        BackendOutput::MetagenomeSeq(contrasts) => {
            Ok(contrast_records(ADAPTER.method.name(), contrasts))
        }
        other => Err(other.mismatch(DaaMethod::MetagenomeSeq)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::adapters::fixtures;
    use approx::assert_relative_eq;

    #[test]
    fn test_css_contrast() {
        let prepared = fixtures::prepared(&ADAPTER);
        // abundances pass through untouched
        assert_eq!(prepared.data[(0, 4)], 210.0);

        let contrasts = match invoke(&prepared, &MethodOptions::default()).unwrap() {
            BackendOutput::MetagenomeSeq(c) => c,
            other => panic!("unexpected output {:?}", other.method()),
        };
        let rows = &contrasts[0].rows;
        // the raised features sit low in the treated quantiles, so CSS scales
        // treated samples up about 3.2x and the fold change shrinks to ~1.7
        let data = &prepared.data;
        let factors = css_factors(data, css_percentile(data).unwrap()).unwrap();
        assert_relative_eq!(factors[4] / factors[0], 448.0 / 140.0, epsilon = 1e-12);
        let norm = norm_css(data, &factors, true);
        let control: f64 = (0..4).map(|j| norm[(0, j)]).sum::<f64>() / 4.0;
        let treated: f64 = (4..8).map(|j| norm[(0, j)]).sum::<f64>() / 4.0;
        assert_relative_eq!(rows[0].log_fc, treated - control, epsilon = 1e-9);
        assert!((1.5..2.0).contains(&rows[0].log_fc), "{:?}", rows[0]);
        assert!(rows[0].p_value < 0.01, "{:?}", rows[0]);
        assert!(rows[0].se > 0.0);

        let records = collect(BackendOutput::MetagenomeSeq(contrasts)).unwrap();
        assert_eq!(records.len(), 6);
        assert!(records.iter().all(|r| r.method == "metagenomeSeq"));
    }
}
