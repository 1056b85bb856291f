//! Raw backend records to a [`DaaResultSet`].

use crate::correct::{adjust_pvalues, AdjustMethod};
use crate::data::{DaaResult, DaaResultSet, FeatureKind};
use crate::dispatch::RawRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Normalize the union of raw records from one run.
///
/// Rows with a non-finite p-value are dropped and the rest clamped to
/// [0, 1]. Adjusted p-values are recomputed per method label with
/// `adjust`; whatever the backend reported is discarded. Rows are ordered
/// by method label (first appearance), adjusted p-value, feature ID and
/// finally `group2`.
pub fn normalize_results(
    records: Vec<RawRecord>,
    adjust: AdjustMethod,
    kind: FeatureKind,
) -> DaaResultSet {
    let total = records.len();
    let records: Vec<RawRecord> = records
        .into_iter()
        .filter(|r| r.p_value.is_finite())
        .map(|mut r| {
            r.p_value = r.p_value.clamp(0.0, 1.0);
            r
        })
        .collect();
    if records.len() < total {
        log::warn!(
            "dropped {} record(s) with a non-finite p-value",
            total - records.len()
        );
    }

    let mut labels: Vec<String> = Vec::new();
    for r in &records {
        if !labels.contains(&r.method) {
            labels.push(r.method.clone());
        }
    }

    let mut results = Vec::with_capacity(records.len());
    for label in &labels {
        let group: Vec<&RawRecord> = records.iter().filter(|r| &r.method == label).collect();
        let p: Vec<f64> = group.iter().map(|r| r.p_value).collect();
        let q = adjust_pvalues(&p, adjust);

        let mut rows: Vec<DaaResult> = group
            .into_iter()
            .zip(q)
            .map(|(r, q)| {
                DaaResult::new(
                    r.feature_id.clone(),
                    r.method.clone(),
                    r.group1.clone(),
                    r.group2.clone(),
                    r.estimate.filter(|v| v.is_finite()),
                    r.statistic.filter(|v| v.is_finite()),
                    r.p_value,
                    q.clamp(0.0, 1.0),
                )
            })
            .collect();
        rows.sort_by(|a, b| {
            a.p_adjust
                .partial_cmp(&b.p_adjust)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.feature_id.cmp(&b.feature_id))
                .then_with(|| a.group2.cmp(&b.group2))
        });
        results.extend(rows);
    }

    log::debug!(
        "normalized {} records under {} method label(s) with {}",
        results.len(),
        labels.len(),
        adjust
    );
    DaaResultSet::new(kind, adjust, results)
}

/// Per-label counts for a JSON run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSummary {
    pub method: String,
    pub tested: usize,
    pub significant: usize,
    pub alpha: f64,
}

pub fn summarize(results: &DaaResultSet, alpha: f64) -> Vec<MethodSummary> {
    results
        .method_labels()
        .into_iter()
        .map(|label| {
            let rows: Vec<&DaaResult> = results.for_method(label).collect();
            MethodSummary {
                method: label.to_string(),
                tested: rows.len(),
                significant: rows.iter().filter(|r| r.is_significant_at(alpha)).count(),
                alpha,
            }
        })
        .collect()
}
