//! edgeR: TMM effective library sizes, tagwise dispersions moderated
//! towards a common value, NB GLM likelihood ratio tests per contrast.

use crate::dispatch::adapters::{
    bh, contrast_records, require_converged, round_counts, Contrast, ContrastRow,
};
use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::Result;
use crate::model::{
    common_dispersion, gene_wise_dispersions, model_nb, tagwise_dispersions, Dispersion,
};
use crate::normalize::{effective_library_sizes, log_cpm, tmm_factors};
use crate::stats::mean;
use crate::test::test_lrt_nb_fitted;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

/// Prior degrees of freedom for tagwise moderation (edgeR's `prior.df`).
const PRIOR_DF: f64 = 10.0;

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::Edger,
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

/// One row of `topTags(glmLRT(fit, coef))`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgerRow {
    pub feature_id: String,
    pub log_fc: f64,
    pub log_cpm: f64,
    pub lr: f64,
    pub pvalue: f64,
    pub fdr: f64,
}

impl ContrastRow for EdgerRow {
    fn feature_id(&self) -> &str {
        &self.feature_id
    }
    fn estimate(&self) -> Option<f64> {
        Some(self.log_fc)
    }
    fn statistic(&self) -> Option<f64> {
        Some(self.lr)
    }
    fn p_value(&self) -> f64 {
        self.pvalue
    }
    fn p_adjust(&self) -> Option<f64> {
        Some(self.fdr)
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

fn invoke(prepared: &PreparedInput, _options: &MethodOptions) -> Result<BackendOutput> {
    let counts = &prepared.data;
    let design = prepared.design()?;

    let tmm = tmm_factors(counts)?;
    let lib_sizes = effective_library_sizes(counts, &tmm);
    let offsets: Vec<f64> = lib_sizes.iter().map(|l| l.ln()).collect();

    let geo = mean(&offsets).exp();
    let scale: Vec<f64> = lib_sizes.iter().map(|l| l / geo).collect();
    let normalized =
        DMatrix::from_fn(counts.nrows(), counts.ncols(), |i, j| counts[(i, j)] / scale[j]);
    let gene_wise = gene_wise_dispersions(&normalized, &scale);
    let common = common_dispersion(&gene_wise);
    let tagwise = tagwise_dispersions(&gene_wise, common, PRIOR_DF, design.df_residual());
    log::debug!("edgeR: common dispersion {:.4}", common);

    let cpm = log_cpm(counts, &lib_sizes);
    let ave_log_cpm: Vec<f64> = cpm
        .row_iter()
        .map(|row| mean(&row.iter().copied().collect::<Vec<_>>()))
        .collect();

    let dispersion = Dispersion::Fixed(tagwise);
    let full = model_nb(counts, &prepared.feature_ids, &design, &offsets, &dispersion)?;
    require_converged(ADAPTER.method.name(), full.n_converged(), full.n_features())?;

    let mut contrasts = Vec::new();
    for (level, col) in prepared.contrast_columns(&design)? {
        let reduced_design = design.without_columns(&[col]);
        let reduced =
            model_nb(counts, &prepared.feature_ids, &reduced_design, &offsets, &dispersion)?;
        let lrt = test_lrt_nb_fitted(&full, &reduced, 1)?;

        let mut rows: Vec<EdgerRow> = lrt
            .results
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let f = &full.fits[i];
                let testable = f.converged && reduced.fits[i].converged;
                EdgerRow {
                    feature_id: r.feature_id.clone(),
                    log_fc: f.coefficients.get(col).copied().unwrap_or(f64::NAN) / LN_2,
                    log_cpm: ave_log_cpm[i],
                    lr: r.statistic,
                    pvalue: if testable { r.p_value } else { f64::NAN },
                    fdr: f64::NAN,
                }
            })
            .collect();
        let p: Vec<f64> = rows.iter().map(|r| r.pvalue).collect();
        for (row, q) in rows.iter_mut().zip(bh(&p)) {
            row.fdr = q;
        }
        contrasts.push(Contrast {
            group1: prepared.reference.clone(),
            group2: level,
            rows,
        });
    }
    Ok(BackendOutput::Edger(contrasts))
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    match output {
        BackendOutput::Edger(contrasts) => Ok(contrast_records(ADAPTER.method.name(), contrasts)),
        other => Err(other.mismatch(DaaMethod::Edger)),
    }
}
