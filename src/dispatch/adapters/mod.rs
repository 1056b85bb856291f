//! Built-in backends, one module per method.
//!
//! Every module exposes an `ADAPTER` record plus the row type that mirrors
//! the native result columns of that method.

pub mod aldex2;
pub mod deseq2;
pub mod edger;
pub mod lefser;
pub mod limma;
pub mod linda;
pub mod maaslin2;
pub mod metagenomeseq;

pub use aldex2::{Aldex2KwRow, Aldex2Output, Aldex2Row};
pub use deseq2::DeseqRow;
pub use edger::EdgerRow;
pub use lefser::{LefserOutput, LefserRow};
pub use limma::LimmaRow;
pub use linda::LindaRow;
pub use maaslin2::{MaaslinOutput, MaaslinRow};
pub use metagenomeseq::FitZigRow;

use crate::correct::{adjust_pvalues, AdjustMethod};
use crate::dispatch::registry::RawRecord;
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Result table of one `level vs reference` comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contrast<R> {
    /// Reference level.
    pub group1: String,
    pub group2: String,
    pub rows: Vec<R>,
}

/// Column accessors shared by per-contrast result rows.
pub trait ContrastRow {
    fn feature_id(&self) -> &str;
    fn estimate(&self) -> Option<f64>;
    fn statistic(&self) -> Option<f64>;
    fn p_value(&self) -> f64;
    fn p_adjust(&self) -> Option<f64>;
}

/// Abundances rounded to non-negative integer counts.
pub(crate) fn round_counts(data: &DMatrix<f64>) -> DMatrix<f64> {
    data.map(|v| v.round().max(0.0))
}

/// Benjamini-Hochberg, the adjustment the backends report natively.
pub(crate) fn bh(p_values: &[f64]) -> Vec<f64> {
    adjust_pvalues(p_values, AdjustMethod::BH)
}

/// Flatten per-contrast rows into raw records under one label.
///
/// Rows with a non-finite p-value are left out.
pub(crate) fn contrast_records<R: ContrastRow>(
    label: &str,
    contrasts: Vec<Contrast<R>>,
) -> Vec<RawRecord> {
    contrasts
        .into_iter()
        .flat_map(|c| {
            let Contrast { group1, group2, rows } = c;
            rows.into_iter()
                .filter(|r| r.p_value().is_finite())
                .map(|r| RawRecord {
                    feature_id: r.feature_id().to_string(),
                    method: label.to_string(),
                    group1: group1.clone(),
                    group2: group2.clone(),
                    estimate: r.estimate(),
                    statistic: r.statistic(),
                    p_value: r.p_value(),
                    p_adjust: r.p_adjust(),
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Fail when no feature produced a usable fit.
pub(crate) fn require_converged(method: &str, n_converged: usize, n_features: usize) -> Result<()> {
    if n_converged == 0 {
        return Err(DaaError::method(
            method,
            format!("none of the {} features converged", n_features),
        ));
    }
    if n_converged < n_features {
        log::warn!(
            "{}: {} of {} features did not converge and are omitted",
            method,
            n_features - n_converged,
            n_features
        );
    }
    Ok(())
}
