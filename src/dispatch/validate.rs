//! Input validation and sample alignment ahead of any backend call.

use crate::data::{preview, AbundanceTable, FeatureId, FeatureKind, Metadata};
use crate::dispatch::registry::MethodAdapter;
use crate::dispatch::request::DaaRequest;
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use std::collections::HashSet;

/// Abundance and metadata after validation: samples aligned to metadata
/// order, features filtered, reference level resolved.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    pub feature_kind: FeatureKind,
    pub feature_ids: Vec<String>,
    /// Sample IDs in metadata order.
    pub sample_ids: Vec<String>,
    /// Features × samples.
    pub abundance: DMatrix<f64>,
    /// Metadata restricted to the analysed samples.
    pub metadata: Metadata,
    pub group_column: String,
    /// Group level of every sample.
    pub groups: Vec<String>,
    /// Distinct levels, reference first, the rest sorted.
    pub levels: Vec<String>,
    pub reference: String,
    pub covariates: Vec<String>,
}

impl ValidatedInput {
    pub fn n_features(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }
}

/// Run every check in order; nothing is invoked when any of them fails.
pub fn validate<I: FeatureId>(
    request: &DaaRequest,
    adapter: &MethodAdapter,
    abundance: &AbundanceTable<I>,
    metadata: &Metadata,
) -> Result<ValidatedInput> {
    // 1. abundance
    if abundance.n_features() == 0 || abundance.n_samples() == 0 {
        return Err(DaaError::invalid("abundance table is empty"));
    }

    // 2. metadata
    if metadata.is_empty() {
        return Err(DaaError::invalid("metadata has no samples"));
    }
    let mut seen = HashSet::with_capacity(metadata.n_samples());
    for sid in metadata.sample_ids() {
        if !seen.insert(sid.as_str()) {
            return Err(DaaError::invalid(format!("duplicate sample ID '{}' in metadata", sid)));
        }
    }

    // 3. group column
    if !metadata.has_column(&request.group) {
        return Err(DaaError::invalid(format!(
            "group column '{}' not found in metadata (columns: {})",
            request.group,
            metadata.column_names().join(", ")
        )));
    }

    // 4. sample alignment
    let missing: Vec<&str> = metadata
        .sample_ids()
        .iter()
        .filter(|sid| abundance.sample_index(sid).is_none())
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(DaaError::invalid(format!(
            "{} metadata sample(s) missing from the abundance table: {}",
            missing.len(),
            preview(&missing)
        )));
    }
    let sample_ids = metadata.sample_ids().to_vec();
    let extra = abundance.n_samples() - sample_ids.len();
    if extra > 0 {
        log::debug!("dropping {} abundance column(s) without metadata", extra);
    }
    let aligned = abundance.select_samples(&sample_ids)?;

    // 5. group values
    let group_values = metadata.categorical_values(&request.group)?;
    if let Some(pos) = group_values.iter().position(Option::is_none) {
        return Err(DaaError::invalid(format!(
            "sample '{}' has no value for group column '{}'",
            sample_ids[pos], request.group
        )));
    }
    let groups: Vec<String> = group_values.into_iter().flatten().collect();
    let sorted_levels = metadata.levels(&request.group)?;
    if sorted_levels.len() < 2 {
        return Err(DaaError::invalid(format!(
            "group column '{}' needs at least two levels, found {}",
            request.group,
            sorted_levels.len()
        )));
    }

    // 6. supplied reference
    if let Some(reference) = &request.reference {
        if !sorted_levels.contains(reference) {
            return Err(DaaError::invalid(format!(
                "reference '{}' is not a level of '{}' (levels: {})",
                reference,
                request.group,
                sorted_levels.join(", ")
            )));
        }
    }

    // 7. method requirements on the group
    if sorted_levels.len() > 2 && adapter.needs_baseline && request.reference.is_none() {
        return Err(DaaError::AmbiguousReference {
            column: request.group.clone(),
            levels: sorted_levels,
        });
    }
    if let Some(max) = adapter.max_levels {
        if sorted_levels.len() > max {
            return Err(DaaError::invalid(format!(
                "{} supports at most {} group levels, '{}' has {}",
                adapter.method,
                max,
                request.group,
                sorted_levels.len()
            )));
        }
    }
    for covariate in &request.covariates {
        if !metadata.has_column(covariate) {
            return Err(DaaError::invalid(format!(
                "covariate '{}' not found in metadata",
                covariate
            )));
        }
    }

    let reference = request
        .reference
        .clone()
        .unwrap_or_else(|| sorted_levels[0].clone());
    let mut levels = vec![reference.clone()];
    levels.extend(sorted_levels.into_iter().filter(|l| *l != reference));

    // 8. feature allow-list
    let all_ids: Vec<String> =
        aligned.feature_ids().iter().map(|f| f.as_str().to_string()).collect();
    let rows: Vec<usize> = match &request.select {
        Some(select) => {
            let wanted: HashSet<&str> = select.iter().map(String::as_str).collect();
            let rows: Vec<usize> = (0..all_ids.len())
                .filter(|&i| wanted.contains(all_ids[i].as_str()))
                .collect();
            if rows.is_empty() {
                return Err(DaaError::invalid(format!(
                    "none of the {} selected features are in the abundance table",
                    select.len()
                )));
            }
            rows
        }
        None => (0..all_ids.len()).collect(),
    };

    let dense = aligned.to_dense();
    let abundance = DMatrix::from_fn(rows.len(), dense.ncols(), |i, j| dense[(rows[i], j)]);
    let feature_ids = rows.iter().map(|&i| all_ids[i].clone()).collect();

    log::debug!(
        "validated {} features x {} samples, group '{}' with levels [{}]",
        rows.len(),
        sample_ids.len(),
        request.group,
        levels.join(", ")
    );

    Ok(ValidatedInput {
        feature_kind: I::KIND,
        feature_ids,
        sample_ids: sample_ids.clone(),
        abundance,
        metadata: metadata.subset_samples(&sample_ids)?,
        group_column: request.group.clone(),
        groups,
        levels,
        reference,
        covariates: request.covariates.clone(),
    })
}
