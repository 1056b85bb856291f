//! Principal components of scaled relative abundance.

use crate::data::{AbundanceTable, FeatureId, Metadata};
use crate::error::{DaaError, Result};
use crate::plot::{Chart, ChartLayout, GroupedAbundance, PlotStyle};
use crate::stats::{mean, sd};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaPoint {
    pub sample_id: String,
    pub group: String,
    pub pc1: f64,
    pub pc2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaLayout {
    pub points: Vec<PcaPoint>,
    pub levels: Vec<String>,
    /// Fraction of total variance on PC1 and PC2.
    pub explained: [f64; 2],
    /// Non-constant features that entered the decomposition.
    pub n_features: usize,
}

/// PCA of samples on centred, unit-variance relative abundances.
pub fn pathway_pca<I: FeatureId>(
    abundance: &AbundanceTable<I>,
    metadata: &Metadata,
    group: &str,
    style: &PlotStyle,
) -> Result<Chart> {
    style.validate()?;
    let grouped = GroupedAbundance::new(abundance, metadata, group)?;
    let n_samples = grouped.sample_ids.len();
    if n_samples < 3 {
        return Err(DaaError::invalid(format!("PCA needs at least 3 samples, found {}", n_samples)));
    }

    let mut columns: Vec<Vec<f64>> = Vec::new();
    for row in grouped.relative.row_iter() {
        let values: Vec<f64> = row.iter().copied().collect();
        let (m, s) = (mean(&values), sd(&values));
        if s > 1e-12 && s.is_finite() {
            columns.push(values.iter().map(|v| (v - m) / s).collect());
        }
    }
    let dropped = grouped.feature_ids.len() - columns.len();
    if dropped > 0 {
        log::debug!("pca: dropped {} constant feature(s)", dropped);
    }
    if columns.len() < 2 {
        return Err(DaaError::invalid("PCA needs at least two non-constant features"));
    }

    // samples × features
    let x = DMatrix::from_fn(n_samples, columns.len(), |i, k| columns[k][i]);
    let svd = x.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| DaaError::Plot("singular value decomposition did not converge".into()))?;
    let singular = svd.singular_values;

    let mut order: Vec<usize> = (0..singular.len()).collect();
    order.sort_by(|&a, &b| singular[b].partial_cmp(&singular[a]).unwrap_or(Ordering::Equal));
    let total: f64 = singular.iter().map(|s| s * s).sum();
    if !(total > 0.0) {
        return Err(DaaError::invalid("abundance has no variance across samples"));
    }
    let component = |c: usize| -> (Vec<f64>, f64) {
        match order.get(c) {
            Some(&k) => (
                (0..n_samples).map(|i| u[(i, k)] * singular[k]).collect(),
                singular[k] * singular[k] / total,
            ),
            None => (vec![0.0; n_samples], 0.0),
        }
    };
    let (pc1, explained1) = component(0);
    let (pc2, explained2) = component(1);

    let points = (0..n_samples)
        .map(|i| PcaPoint {
            sample_id: grouped.sample_ids[i].clone(),
            group: grouped.groups[i].clone(),
            pc1: pc1[i],
            pc2: pc2[i],
        })
        .collect();

    Ok(Chart::new(
        ChartLayout::Pca(PcaLayout {
            points,
            levels: grouped.levels.clone(),
            explained: [explained1, explained2],
            n_features: columns.len(),
        }),
        style.clone(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plot::fixtures;

    #[test]
    fn test_pca_separates_groups() {
        let (table, metadata) = fixtures::table();
        let chart = pathway_pca(&table, &metadata, "group", &PlotStyle::default()).unwrap();
        let layout = chart.pca().unwrap();

        assert_eq!(layout.points.len(), 6);
        assert_eq!(layout.n_features, 4);
        assert!(layout.explained[0] >= layout.explained[1]);
        assert!(layout.explained[0] > 0.5);
        assert!(layout.explained[0] + layout.explained[1] <= 1.0 + 1e-9);

        let group_mean = |g: &str| {
            let v: Vec<f64> =
                layout.points.iter().filter(|p| p.group == g).map(|p| p.pc1).collect();
            mean(&v)
        };
        assert!(group_mean("A") * group_mean("B") < 0.0);
    }

    #[test]
    fn test_pca_needs_samples() {
        let (table, metadata) = fixtures::table();
        let small = metadata.subset_samples(&["S1".to_string(), "S4".to_string()]).unwrap();
        assert!(pathway_pca(&table, &small, "group", &PlotStyle::default()).is_err());
    }
}
