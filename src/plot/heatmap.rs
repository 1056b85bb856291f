//! Row z-scores of relative abundance, samples grouped.

use crate::data::{AbundanceTable, AnnotatedResult, FeatureId, Metadata};
use crate::error::{DaaError, Result};
use crate::plot::{
    argmax, sort_features, Chart, ChartLayout, GroupedAbundance, OrderKey, OrderPolicy, PlotStyle,
};
use crate::stats::{mean, sd};
use nalgebra::DMatrix;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct HeatmapOptions<'a> {
    pub order: OrderPolicy,
    /// Source of names, classes and adjusted p-values for ordering.
    pub results: Option<&'a [AnnotatedResult]>,
    pub max_features: usize,
}

impl Default for HeatmapOptions<'_> {
    fn default() -> Self {
        Self {
            order: OrderPolicy::default(),
            results: None,
            max_features: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapLayout {
    pub feature_ids: Vec<String>,
    pub labels: Vec<String>,
    /// Samples grouped by level, then by ID.
    pub sample_ids: Vec<String>,
    pub sample_groups: Vec<String>,
    pub levels: Vec<String>,
    /// Features × samples in the orders above.
    pub z_scores: DMatrix<f64>,
}

impl HeatmapLayout {
    pub fn z(&self, feature: usize, sample: usize) -> f64 {
        self.z_scores[(feature, sample)]
    }
}

/// Lay out a heatmap of `features`; an empty list means every feature.
/// IDs missing from the table are skipped.
pub fn pathway_heatmap<I: FeatureId>(
    abundance: &AbundanceTable<I>,
    metadata: &Metadata,
    group: &str,
    features: &[String],
    options: &HeatmapOptions<'_>,
    style: &PlotStyle,
) -> Result<Chart> {
    style.validate()?;
    let grouped = GroupedAbundance::new(abundance, metadata, group)?;

    let rows: Vec<usize> = if features.is_empty() {
        (0..grouped.feature_ids.len()).collect()
    } else {
        let mut seen = HashSet::new();
        features
            .iter()
            .filter(|f| seen.insert(f.as_str()))
            .filter_map(|f| grouped.row(f))
            .collect()
    };
    if rows.is_empty() {
        return Err(DaaError::invalid("none of the requested features are in the abundance table"));
    }

    // samples by level, then ID
    let mut samples: Vec<usize> = (0..grouped.sample_ids.len()).collect();
    samples.sort_by(|&a, &b| {
        grouped.groups[a]
            .cmp(&grouped.groups[b])
            .then_with(|| grouped.sample_ids[a].cmp(&grouped.sample_ids[b]))
    });

    let mut keys: Vec<OrderKey> = rows
        .iter()
        .map(|&row| {
            let id = &grouped.feature_ids[row];
            let annotated = options
                .results
                .unwrap_or(&[])
                .iter()
                .filter(|r| &r.result.feature_id == id);
            let mut p_adjust = f64::INFINITY;
            let mut name = None;
            let mut class = None;
            for r in annotated {
                p_adjust = p_adjust.min(r.result.p_adjust);
                name = name.or_else(|| r.name.clone());
                class = class.or_else(|| r.pathway_class.clone());
            }
            let means: Vec<f64> = grouped.level_stats(row).iter().map(|s| s.0).collect();
            OrderKey {
                feature_id: id.clone(),
                name: name.unwrap_or_else(|| id.clone()),
                p_adjust,
                class,
                top_level: argmax(&means),
            }
        })
        .collect();
    sort_features(&mut keys, options.order);
    if keys.len() > options.max_features {
        log::warn!(
            "heatmap: showing the first {} of {} features",
            options.max_features,
            keys.len()
        );
        keys.truncate(options.max_features.max(1));
    }

    let z_scores = DMatrix::from_fn(keys.len(), samples.len(), |i, j| {
        let row = grouped.row(&keys[i].feature_id).unwrap_or(0);
        let values: Vec<f64> = samples.iter().map(|&s| grouped.relative[(row, s)]).collect();
        let (m, s) = (mean(&values), sd(&values));
        if s > 0.0 && s.is_finite() {
            (values[j] - m) / s
        } else {
            0.0
        }
    });

    Ok(Chart::new(
        ChartLayout::Heatmap(HeatmapLayout {
            feature_ids: keys.iter().map(|k| k.feature_id.clone()).collect(),
            labels: keys.iter().map(|k| k.name.clone()).collect(),
            sample_ids: samples.iter().map(|&s| grouped.sample_ids[s].clone()).collect(),
            sample_groups: samples.iter().map(|&s| grouped.groups[s].clone()).collect(),
            levels: grouped.levels.clone(),
            z_scores,
        }),
        style.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{AbundanceTable, PathwayId};
    use crate::plot::fixtures;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    #[test]
    fn test_heatmap_layout() {
        let (table, metadata) = fixtures::table();
        let results = fixtures::results();
        let options = HeatmapOptions {
            order: OrderPolicy::PValue,
            results: Some(&results),
            ..Default::default()
        };
        let features = vec!["ko00020".to_string(), "ko00010".to_string(), "ko99999".to_string()];
        let chart = pathway_heatmap(
            &table,
            &metadata,
            "group",
            &features,
            &options,
            &PlotStyle::default(),
        )
        .unwrap();
        let layout = chart.heatmap().unwrap();

        assert_eq!(layout.feature_ids, vec!["ko00010", "ko00020"]);
        assert_eq!(layout.labels[0], "Glycolysis");
        assert_eq!(layout.z_scores.shape(), (2, 6));
        for i in 0..2 {
            let row: Vec<f64> = layout.z_scores.row(i).iter().copied().collect();
            assert_relative_eq!(mean(&row), 0.0, epsilon = 1e-10);
        }
        // ko00010 is high in B
        assert!(layout.z(0, 5) > 0.0 && layout.z(0, 0) < 0.0);
    }

    #[test]
    fn test_samples_grouped_then_sorted() {
        let samples: Vec<String> = ["S3", "S1", "S2", "S4"].iter().map(|s| s.to_string()).collect();
        let table = AbundanceTable::from_rows(
            vec![PathwayId::from("ko00010")],
            samples,
            vec![vec![1.0, 2.0, 3.0, 4.0]],
        )
        .unwrap();
        let tsv = "sample\tgroup\nS3\tB\nS1\tB\nS2\tA\nS4\tA\n";
        let metadata = Metadata::from_reader(Cursor::new(tsv), None).unwrap();
        let chart = pathway_heatmap(
            &table,
            &metadata,
            "group",
            &[],
            &HeatmapOptions::default(),
            &PlotStyle::default(),
        )
        .unwrap();
        let layout = chart.heatmap().unwrap();
        assert_eq!(layout.sample_ids, vec!["S2", "S4", "S1", "S3"]);
        assert_eq!(layout.sample_groups, vec!["A", "A", "B", "B"]);
        // single feature, every column sums to one
        assert!(layout.z_scores.iter().all(|z| *z == 0.0));
    }

    #[test]
    fn test_unknown_features_only_fails() {
        let (table, metadata) = fixtures::table();
        let features = vec!["ko99999".to_string()];
        assert!(
            pathway_heatmap(
                &table,
                &metadata,
                "group",
                &features,
                &HeatmapOptions::default(),
                &PlotStyle::default(),
            )
            .is_err()
        );
    }
}
