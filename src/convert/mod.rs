//! Gene family to pathway abundance conversion.
//!
//! Each pathway's abundance in a sample is the sum of its member gene
//! families present in the table. A gene family mapped to several pathways
//! contributes its full value to each one.

use crate::data::{preview, AbundanceTable, FeatureId, GeneFamilyId, MappingTable, PathwayId};
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use sprs::TriMat;
use std::collections::BTreeMap;

/// Pathway table plus bookkeeping on what was dropped.
#[derive(Debug, Clone)]
pub struct Conversion {
    pub table: AbundanceTable<PathwayId>,
    pub unmapped: UnmappedFeatures,
}

/// Gene families that had no entry in the mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmappedFeatures {
    pub ids: Vec<GeneFamilyId>,
}

impl UnmappedFeatures {
    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Aggregate gene-family abundances into pathway abundances.
///
/// Fails with `InvalidInput` when no gene family maps to any pathway.
pub fn convert_to_pathway(
    table: &AbundanceTable<GeneFamilyId>,
    mapping: &MappingTable,
) -> Result<Conversion> {
    if table.n_features() == 0 || table.n_samples() == 0 {
        return Err(DaaError::invalid("cannot convert an empty abundance table"));
    }

    // pathway -> input rows, ordered by pathway ID
    let mut members: BTreeMap<&PathwayId, Vec<usize>> = BTreeMap::new();
    let mut unmapped = Vec::new();
    for (row, family) in table.feature_ids().iter().enumerate() {
        let pathways = mapping.pathways_for(family);
        if pathways.is_empty() {
            unmapped.push(family.clone());
            continue;
        }
        for pathway in pathways {
            members.entry(pathway).or_default().push(row);
        }
    }

    if members.is_empty() {
        let ids: Vec<&str> = table.feature_ids().iter().map(|f| f.as_str()).collect();
        return Err(DaaError::invalid(format!(
            "none of the {} gene families map to a pathway ({})",
            table.n_features(),
            preview(&ids)
        )));
    }
    if !unmapped.is_empty() {
        log::warn!(
            "{} of {} gene families have no pathway mapping and were dropped",
            unmapped.len(),
            table.n_features()
        );
    }

    let n_samples = table.n_samples();
    let mut tri = TriMat::new((members.len(), n_samples));
    let mut pathway_ids = Vec::with_capacity(members.len());
    for (out_row, (pathway, rows)) in members.into_iter().enumerate() {
        let mut sums = vec![0.0; n_samples];
        for &row in &rows {
            if let Some(view) = table.data().outer_view(row) {
                for (col, &val) in view.iter() {
                    sums[col] += val;
                }
            }
        }
        for (col, v) in sums.into_iter().enumerate() {
            if v != 0.0 {
                tri.add_triplet(out_row, col, v);
            }
        }
        pathway_ids.push(pathway.clone());
    }

    log::debug!(
        "converted {} gene families into {} pathways",
        table.n_features() - unmapped.len(),
        pathway_ids.len()
    );

    let table = AbundanceTable::new(tri.to_csr(), pathway_ids, table.sample_ids().to_vec())?;
    Ok(Conversion {
        table,
        unmapped: UnmappedFeatures { ids: unmapped },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn create_test_table() -> AbundanceTable<GeneFamilyId> {
        AbundanceTable::from_rows(
            vec!["K00001".into(), "K00002".into(), "K00003".into(), "K99999".into()],
            vec!["S1".into(), "S2".into()],
            vec![
                vec![1.0, 2.0],
                vec![3.0, 0.0],
                vec![0.5, 4.5],
                vec![10.0, 10.0],
            ],
        )
        .unwrap()
    }

    fn create_test_mapping() -> MappingTable {
        MappingTable::from_pairs(vec![
            ("K00001", "ko00010"),
            ("K00002", "ko00010"),
            ("K00002", "ko00020"),
            ("K00003", "ko00030"),
            ("K00004", "ko00040"),
        ])
    }

    #[test]
    fn test_convert_sums_members() {
        let conversion = convert_to_pathway(&create_test_table(), &create_test_mapping()).unwrap();
        let table = &conversion.table;
        let ids: Vec<&str> = table.feature_ids().iter().map(|p| p.as_str()).collect();
        assert_eq!(ids, vec!["ko00010", "ko00020", "ko00030"]);

        assert_relative_eq!(table.get(0, 0), 4.0);
        assert_relative_eq!(table.get(0, 1), 2.0);
        assert_relative_eq!(table.get(1, 0), 3.0);
        assert_relative_eq!(table.get(2, 1), 4.5);
    }

    #[test]
    fn test_unmapped_reported() {
        let conversion = convert_to_pathway(&create_test_table(), &create_test_mapping()).unwrap();
        assert_eq!(conversion.unmapped.count(), 1);
        assert_eq!(conversion.unmapped.ids[0].as_str(), "K99999");
    }

    #[test]
    fn test_total_counts_each_membership() {
        let input = create_test_table();
        let mapping = create_test_mapping();
        let conversion = convert_to_pathway(&input, &mapping).unwrap();
        let out_totals = conversion.table.col_sums();

        for (j, total) in out_totals.iter().enumerate() {
            let expected: f64 = input
                .feature_ids()
                .iter()
                .enumerate()
                .map(|(i, f)| input.get(i, j) * mapping.pathways_for(f).len() as f64)
                .sum();
            assert_relative_eq!(*total, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_nothing_maps() {
        let table = AbundanceTable::<GeneFamilyId>::from_rows(
            vec!["K99999".into()],
            vec!["S1".into()],
            vec![vec![1.0]],
        )
        .unwrap();
        assert!(matches!(
            convert_to_pathway(&table, &create_test_mapping()),
            Err(DaaError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bundled_mapping_shares_ko_across_pathways() {
        let mapping = MappingTable::bundled_ko_to_kegg().unwrap();
        let table = AbundanceTable::<GeneFamilyId>::from_rows(
            vec!["K01810".into()],
            vec!["S1".into()],
            vec![vec![2.0]],
        )
        .unwrap();
        let conversion = convert_to_pathway(&table, &mapping).unwrap();
        assert!(conversion.table.n_features() >= 3);
        assert!(conversion.table.col_sums()[0] >= 6.0);
    }
}
