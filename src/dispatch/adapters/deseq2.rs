//! DESeq2: median-of-ratios size factors, dispersions shrunk towards a
//! mean-dependent trend, NB GLM and Wald tests per contrast.

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
    fit_dispersion_trend, gene_wise_dispersions, model_nb, shrink_dispersions, Dispersion,
    DispersionTrend,
};
use crate::normalize::size_factors;
use crate::stats::mean;
use crate::test::test_wald_nb;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::Deseq2,
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

/// One row of `results(dds, contrast)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeseqRow {
    pub feature_id: String,
    pub base_mean: f64,
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
}

impl ContrastRow for DeseqRow {
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
    let factors = size_factors(counts)?;
    let normalized =
        DMatrix::from_fn(counts.nrows(), counts.ncols(), |i, j| counts[(i, j)] / factors[j]);
    let base_means: Vec<f64> = normalized
        .row_iter()
        .map(|row| mean(&row.iter().copied().collect::<Vec<_>>()))
        .collect();

    let gene_wise = gene_wise_dispersions(&normalized, &factors);
    let trend = match fit_dispersion_trend(&base_means, &gene_wise) {
        Ok(trend) => trend,
        Err(e) => {
            log::warn!("DESeq2: {}; using the mean dispersion instead", e);
            DispersionTrend {
                asymptotic: mean(&gene_wise),
                extra_poisson: 0.0,
            }
        }
    };
    let dispersions = shrink_dispersions(
        &gene_wise,
        &base_means,
        &trend,
        counts.ncols(),
        design.n_coefficients(),
    );
    log::debug!(
        "DESeq2: trend asymptote {:.4}, extra-Poisson {:.4}",
        trend.asymptotic,
        trend.extra_poisson
    );

    let offsets: Vec<f64> = factors.iter().map(|f| f.ln()).collect();
    let fit = model_nb(
        counts,
        &prepared.feature_ids,
        &design,
        &offsets,
        &Dispersion::Fixed(dispersions),
    )?;
    require_converged(ADAPTER.method.name(), fit.n_converged(), fit.n_features())?;

    let mut contrasts = Vec::new();
    for (level, col) in prepared.contrast_columns(&design)? {
        let wald = test_wald_nb(&fit, &design.coefficient_names()[col])?;
        let mut rows: Vec<DeseqRow> = wald
            .results
            .iter()
            .zip(&fit.fits)
            .zip(&base_means)
            .map(|((w, f), &base_mean)| {
                // all-zero features and failed fits get no p-value
                let testable = f.converged && base_mean > 0.0;
                DeseqRow {
                    feature_id: w.feature_id.clone(),
                    base_mean,
                    log2_fold_change: w.estimate / LN_2,
                    lfc_se: w.std_error / LN_2,
                    stat: w.statistic,
                    pvalue: if testable { w.p_value } else { f64::NAN },
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
    Ok(BackendOutput::Deseq2(contrasts))
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    match output {
        BackendOutput::Deseq2(contrasts) => Ok(contrast_records(ADAPTER.method.name(), contrasts)),
        other => Err(other.mismatch(DaaMethod::Deseq2)),
    }
}
