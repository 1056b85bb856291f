//! Per-group mean ± sd of relative abundance for significant features.

use crate::data::{AbundanceTable, AnnotatedResult, FeatureId, Metadata};
use crate::error::{DaaError, Result};
use crate::plot::{
    argmax, sort_features, Chart, ChartLayout, GroupedAbundance, OrderKey, OrderPolicy, PlotStyle,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Added to both means before taking the fold change.
const FOLD_CHANGE_OFFSET: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBarOptions {
    /// Method label to plot; the first label in the results when unset.
    pub method: Option<String>,
    /// Rows with `p_adjust` below this are shown.
    pub p_value_bar: f64,
    /// Restrict to these feature IDs.
    pub select: Option<Vec<String>>,
    pub order: OrderPolicy,
    pub max_features: usize,
}

impl Default for ErrorBarOptions {
    fn default() -> Self {
        Self {
            method: None,
            p_value_bar: 0.05,
            select: None,
            order: OrderPolicy::default(),
            max_features: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub level: String,
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBarRow {
    pub feature_id: String,
    /// Pathway name when annotated, otherwise the ID.
    pub label: String,
    pub pathway_class: Option<String>,
    /// One entry per group level.
    pub groups: Vec<GroupSummary>,
    pub group1: String,
    pub group2: String,
    /// `log2(mean(group2) / mean(group1))`.
    pub log2_fold_change: f64,
    pub p_adjust: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBarLayout {
    pub method: String,
    pub levels: Vec<String>,
    pub rows: Vec<ErrorBarRow>,
    /// Features left out by `max_features`.
    pub truncated: usize,
}

/// Lay out an error-bar chart of the significant features of one method.
pub fn pathway_errorbar<I: FeatureId>(
    abundance: &AbundanceTable<I>,
    metadata: &Metadata,
    group: &str,
    results: &[AnnotatedResult],
    options: &ErrorBarOptions,
    style: &PlotStyle,
) -> Result<Chart> {
    style.validate()?;
    if !(options.p_value_bar > 0.0 && options.p_value_bar <= 1.0) {
        return Err(DaaError::invalid(format!(
            "p_value_bar must be in (0, 1], got {}",
            options.p_value_bar
        )));
    }
    if options.max_features == 0 {
        return Err(DaaError::invalid("max_features must be at least 1"));
    }

    let method = match &options.method {
        Some(m) => m.clone(),
        None => results
            .first()
            .map(|r| r.result.method.clone())
            .ok_or_else(|| DaaError::invalid("no results to plot"))?,
    };
    let grouped = GroupedAbundance::new(abundance, metadata, group)?;
    let allowed: Option<HashSet<&str>> = options
        .select
        .as_ref()
        .map(|ids| ids.iter().map(String::as_str).collect());

    // best row per feature
    let mut best: BTreeMap<&str, &AnnotatedResult> = BTreeMap::new();
    for r in results {
        let res = &r.result;
        if res.method != method || !(res.p_adjust < options.p_value_bar) {
            continue;
        }
        if let Some(allowed) = &allowed {
            if !allowed.contains(res.feature_id.as_str()) {
                continue;
            }
        }
        if grouped.row(&res.feature_id).is_none() {
            log::debug!("errorbar: '{}' is not in the abundance table", res.feature_id);
            continue;
        }
        let slot = best.entry(res.feature_id.as_str()).or_insert(r);
        if res.p_adjust < slot.result.p_adjust {
            *slot = r;
        }
    }
    if best.is_empty() {
        return Err(DaaError::invalid(format!(
            "no {} result has p_adjust < {}",
            method, options.p_value_bar
        )));
    }

    let mut rows: Vec<ErrorBarRow> = Vec::with_capacity(best.len());
    let mut keys: Vec<OrderKey> = Vec::with_capacity(best.len());
    for (feature_id, r) in best {
        let Some(row) = grouped.row(feature_id) else {
            continue;
        };
        let stats = grouped.level_stats(row);
        let level_mean = |level: &str| {
            grouped
                .levels
                .iter()
                .position(|l| l == level)
                .map(|i| stats[i].0)
        };
        let log2_fold_change = match (level_mean(&r.result.group1), level_mean(&r.result.group2)) {
            (Some(m1), Some(m2)) => ((m2 + FOLD_CHANGE_OFFSET) / (m1 + FOLD_CHANGE_OFFSET)).log2(),
            _ => f64::NAN,
        };
        let label = r.name.clone().unwrap_or_else(|| feature_id.to_string());
        let means: Vec<f64> = stats.iter().map(|s| s.0).collect();

        keys.push(OrderKey {
            feature_id: feature_id.to_string(),
            name: label.clone(),
            p_adjust: r.result.p_adjust,
            class: r.pathway_class.clone(),
            top_level: argmax(&means),
        });
        rows.push(ErrorBarRow {
            feature_id: feature_id.to_string(),
            label,
            pathway_class: r.pathway_class.clone(),
            groups: grouped
                .levels
                .iter()
                .zip(&stats)
                .map(|(level, &(mean, sd))| GroupSummary {
                    level: level.clone(),
                    mean,
                    sd,
                })
                .collect(),
            group1: r.result.group1.clone(),
            group2: r.result.group2.clone(),
            log2_fold_change,
            p_adjust: r.result.p_adjust,
        });
    }

    sort_features(&mut keys, options.order);
    let mut ordered: Vec<ErrorBarRow> = keys
        .iter()
        .filter_map(|k| rows.iter().position(|r| r.feature_id == k.feature_id))
        .map(|i| rows[i].clone())
        .collect();

    let truncated = ordered.len().saturating_sub(options.max_features);
    if truncated > 0 {
        log::warn!(
            "errorbar: showing the first {} of {} significant features",
            options.max_features,
            ordered.len()
        );
        ordered.truncate(options.max_features);
    }

    Ok(Chart::new(
        ChartLayout::ErrorBar(ErrorBarLayout {
            method,
            levels: grouped.levels.clone(),
            rows: ordered,
            truncated,
        }),
        style.clone(),
    ))
}
