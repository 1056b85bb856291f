//! Chart layout and rendering for result tables.
//!
//! Renderers borrow their inputs and return a [`Chart`] holding the
//! computed layout. The layout can be inspected directly or rendered to
//! SVG and PNG with `plotters`.

mod chart;
mod errorbar;
mod heatmap;
mod pca;
mod style;

pub use chart::{Chart, ChartLayout};
pub use errorbar::{pathway_errorbar, ErrorBarLayout, ErrorBarOptions, ErrorBarRow, GroupSummary};
pub use heatmap::{pathway_heatmap, HeatmapLayout, HeatmapOptions};
pub use pca::{pathway_pca, PcaLayout, PcaPoint};
pub use style::{OrderPolicy, PlotStyle};

use crate::data::{AbundanceTable, FeatureId, Metadata};
use crate::error::{DaaError, Result};
use crate::stats::{mean, sd};
use nalgebra::DMatrix;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Relative abundance of the samples that have a group value.
pub(crate) struct GroupedAbundance {
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    /// Group level of every sample.
    pub groups: Vec<String>,
    /// Sorted distinct levels.
    pub levels: Vec<String>,
    /// Features × samples, columns summing to one.
    pub relative: DMatrix<f64>,
    index: HashMap<String, usize>,
}

impl GroupedAbundance {
    pub fn new<I: FeatureId>(
        abundance: &AbundanceTable<I>,
        metadata: &Metadata,
        group: &str,
    ) -> Result<Self> {
        if !metadata.has_column(group) {
            return Err(DaaError::invalid(format!(
                "group column '{}' not found in metadata",
                group
            )));
        }
        let values = metadata.categorical_values(group)?;
        let (sample_ids, groups): (Vec<String>, Vec<String>) = metadata
            .sample_ids()
            .iter()
            .zip(values)
            .filter_map(|(sid, g)| match g {
                Some(g) if abundance.sample_index(sid).is_some() => Some((sid.clone(), g)),
                _ => None,
            })
            .unzip();
        if sample_ids.is_empty() {
            return Err(DaaError::invalid(format!(
                "no abundance sample has a value for group column '{}'",
                group
            )));
        }

        let mut levels = groups.clone();
        levels.sort();
        levels.dedup();

        let relative = abundance.select_samples(&sample_ids)?.relative_abundance();
        let feature_ids: Vec<String> =
            abundance.feature_ids().iter().map(|f| f.as_str().to_string()).collect();
        let index = feature_ids.iter().enumerate().map(|(i, f)| (f.clone(), i)).collect();
        Ok(Self {
            feature_ids,
            sample_ids,
            groups,
            levels,
            relative,
            index,
        })
    }

    pub fn row(&self, feature_id: &str) -> Option<usize> {
        self.index.get(feature_id).copied()
    }

    /// Mean and standard deviation of one feature per level, in `levels` order.
    pub fn level_stats(&self, row: usize) -> Vec<(f64, f64)> {
        self.levels
            .iter()
            .map(|level| {
                let values: Vec<f64> = self
                    .groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| *g == level)
                    .map(|(j, _)| self.relative[(row, j)])
                    .collect();
                let s = if values.len() > 1 { sd(&values) } else { 0.0 };
                (mean(&values), s)
            })
            .collect()
    }
}

/// What features are sorted by.
#[derive(Debug, Clone)]
pub(crate) struct OrderKey {
    pub feature_id: String,
    pub name: String,
    pub p_adjust: f64,
    pub class: Option<String>,
    /// Index of the level with the highest mean.
    pub top_level: usize,
}

pub(crate) fn sort_features(keys: &mut [OrderKey], policy: OrderPolicy) {
    let by_p = |a: &OrderKey, b: &OrderKey| {
        a.p_adjust
            .partial_cmp(&b.p_adjust)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.feature_id.cmp(&b.feature_id))
    };
    match policy {
        OrderPolicy::PValue => keys.sort_by(by_p),
        OrderPolicy::Group => {
            keys.sort_by(|a, b| a.top_level.cmp(&b.top_level).then_with(|| by_p(a, b)))
        }
        OrderPolicy::PathwayClass => keys.sort_by(|a, b| {
            // unclassified last
            match (&a.class, &b.class) {
                (Some(x), Some(y)) => x.cmp(y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| by_p(a, b))
        }),
        OrderPolicy::Name => {
            keys.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.feature_id.cmp(&b.feature_id)))
        }
    }
}

pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::data::{AbundanceTable, AnnotatedResult, DaaResult, Metadata, PathwayId};
    use std::io::Cursor;

    /// 4 pathways × 6 samples; `ko00010` up in `B`, `ko00020` up in `A`.
    pub fn table() -> (AbundanceTable<PathwayId>, Metadata) {
        let samples: Vec<String> = (1..=6).map(|i| format!("S{}", i)).collect();
        let rows = vec![
            vec![10.0, 12.0, 11.0, 60.0, 55.0, 58.0],
            vec![50.0, 48.0, 52.0, 12.0, 15.0, 11.0],
            vec![30.0, 30.0, 30.0, 30.0, 30.0, 30.0],
            vec![10.0, 10.0, 7.0, 8.0, 10.0, 11.0],
        ];
        let ids = ["ko00010", "ko00020", "ko00030", "ko00040"]
            .iter()
            .map(|s| PathwayId::from(*s))
            .collect();
        let table = AbundanceTable::from_rows(ids, samples, rows).unwrap();
        let tsv = "sample\tgroup\nS1\tA\nS2\tA\nS3\tA\nS4\tB\nS5\tB\nS6\tB\n";
        (table, Metadata::from_reader(Cursor::new(tsv), None).unwrap())
    }

    pub fn results() -> Vec<AnnotatedResult> {
        let row = |id: &str, p: f64, name: &str, class: Option<&str>| AnnotatedResult {
            result: DaaResult::new(id, "LinDA", "A", "B", Some(1.0), None, p / 2.0, p),
            name: Some(name.to_string()),
            description: None,
            pathway_class: class.map(String::from),
        };
        vec![
            row("ko00010", 0.001, "Glycolysis", Some("Metabolism; Carbohydrate")),
            row("ko00020", 0.01, "Citrate cycle", Some("Metabolism; Carbohydrate")),
            row("ko00030", 0.5, "Pentose phosphate", Some("Metabolism; Carbohydrate")),
            row("ko00040", 0.03, "Aminoacyl", None),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str, name: &str, p: f64, class: Option<&str>, top: usize) -> OrderKey {
        OrderKey {
            feature_id: id.into(),
            name: name.into(),
            p_adjust: p,
            class: class.map(String::from),
            top_level: top,
        }
    }

    #[test]
    fn test_sort_features() {
        let keys = vec![
            key("f1", "zeta", 0.04, None, 1),
            key("f2", "alpha", 0.01, Some("B"), 1),
            key("f3", "mu", 0.02, Some("A"), 0),
        ];
        let order = |policy| {
            let mut k = keys.clone();
            sort_features(&mut k, policy);
            k.into_iter().map(|k| k.feature_id).collect::<Vec<_>>()
        };
        assert_eq!(order(OrderPolicy::PValue), vec!["f2", "f3", "f1"]);
        assert_eq!(order(OrderPolicy::Group), vec!["f3", "f2", "f1"]);
        assert_eq!(order(OrderPolicy::PathwayClass), vec!["f3", "f2", "f1"]);
        assert_eq!(order(OrderPolicy::Name), vec!["f2", "f3", "f1"]);
    }

    #[test]
    fn test_grouped_abundance() {
        let (table, metadata) = fixtures::table();
        let grouped = GroupedAbundance::new(&table, &metadata, "group").unwrap();
        assert_eq!(grouped.levels, vec!["A", "B"]);
        let col: f64 = grouped.relative.column(0).sum();
        assert!((col - 1.0).abs() < 1e-12);
        let stats = grouped.level_stats(grouped.row("ko00010").unwrap());
        assert!(stats[1].0 > stats[0].0);
        assert!(GroupedAbundance::new(&table, &metadata, "site").is_err());
    }
}
