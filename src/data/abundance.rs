//! Sparse feature-by-sample abundance table.

use crate::data::FeatureId;
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use rayon::prelude::*;
use sprs::{CsMat, TriMat};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A sparse abundance table.
///
/// Rows are features keyed by `I` (gene families or pathways), columns are
/// samples. Functional-profile tables carry fractional values, so cells are
/// stored as `f64`. Uses CSR storage; most gene-family tables are sparse.
#[derive(Debug, Clone)]
pub struct AbundanceTable<I: FeatureId> {
    data: CsMat<f64>,
    feature_ids: Vec<I>,
    sample_ids: Vec<String>,
    feature_index: HashMap<I, usize>,
}

impl<I: FeatureId> AbundanceTable<I> {
    /// Create a table from a sparse matrix and identifiers.
    ///
    /// Fails with `InvalidInput` on empty dimensions, duplicate IDs, or
    /// negative / non-finite cells.
    pub fn new(data: CsMat<f64>, feature_ids: Vec<I>, sample_ids: Vec<String>) -> Result<Self> {
        let (nrows, ncols) = data.shape();
        if nrows == 0 || ncols == 0 {
            return Err(DaaError::invalid(format!(
                "abundance table must have at least one feature and one sample (got {} x {})",
                nrows, ncols
            )));
        }
        if nrows != feature_ids.len() {
            return Err(DaaError::invalid(format!(
                "{} rows but {} feature IDs",
                nrows,
                feature_ids.len()
            )));
        }
        if ncols != sample_ids.len() {
            return Err(DaaError::invalid(format!(
                "{} columns but {} sample IDs",
                ncols,
                sample_ids.len()
            )));
        }

        let mut feature_index = HashMap::with_capacity(nrows);
        for (i, id) in feature_ids.iter().enumerate() {
            if feature_index.insert(id.clone(), i).is_some() {
                return Err(DaaError::invalid(format!("duplicate feature ID '{}'", id)));
            }
        }
        let mut seen = HashSet::with_capacity(ncols);
        for id in &sample_ids {
            if !seen.insert(id.as_str()) {
                return Err(DaaError::invalid(format!("duplicate sample ID '{}'", id)));
            }
        }
        if let Some(&bad) = data.data().iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(DaaError::invalid(format!(
                "abundances must be finite and non-negative, found {}",
                bad
            )));
        }

        Ok(Self {
            data,
            feature_ids,
            sample_ids,
            feature_index,
        })
    }

    /// Build a table from dense rows (one `Vec` per feature).
    pub fn from_rows(
        feature_ids: Vec<I>,
        sample_ids: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let n_samples = sample_ids.len();
        let mut tri = TriMat::new((rows.len(), n_samples));
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_samples {
                return Err(DaaError::invalid(format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    n_samples
                )));
            }
            for (j, &v) in row.iter().enumerate() {
                if v != 0.0 {
                    tri.add_triplet(i, j, v);
                }
            }
        }
        Self::new(tri.to_csr(), feature_ids, sample_ids)
    }

    /// Load a table from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with sample IDs (first column is the feature ID header)
    /// - Subsequent rows: feature ID followed by abundances
    ///
    /// Blank lines and lines starting with `#` are skipped.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    /// Load a table from any buffered TSV reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader
            .lines()
            .filter(|l| l.as_ref().map_or(true, |s| !s.trim().is_empty() && !s.starts_with('#')));

        let header_line = lines
            .next()
            .ok_or_else(|| DaaError::invalid("empty abundance table"))??;
        let header: Vec<&str> = header_line.trim_end_matches('\r').split('\t').collect();
        if header.len() < 2 {
            return Err(DaaError::invalid("abundance table must have at least one sample column"));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.trim().to_string()).collect();
        let n_samples = sample_ids.len();

        let mut triplets: Vec<(usize, usize, f64)> = Vec::new();
        let mut feature_ids = Vec::new();

        for (row_idx, line) in lines.enumerate() {
            let line = line?;
            let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
            if fields.len() != n_samples + 1 {
                return Err(DaaError::invalid(format!(
                    "row {} ('{}') has {} values, expected {}",
                    row_idx + 1,
                    fields[0],
                    fields.len() - 1,
                    n_samples
                )));
            }
            feature_ids.push(I::new(fields[0].trim()));
            for (col_idx, raw) in fields[1..].iter().enumerate() {
                let value: f64 = raw.trim().parse().map_err(|_| {
                    DaaError::invalid(format!(
                        "invalid abundance '{}' at row {}, column {}",
                        raw,
                        row_idx + 1,
                        col_idx + 1
                    ))
                })?;
                if value != 0.0 {
                    triplets.push((row_idx, col_idx, value));
                }
            }
        }

        let n_features = feature_ids.len();
        if n_features == 0 {
            return Err(DaaError::invalid("abundance table has no feature rows"));
        }
        let mut tri = TriMat::with_capacity((n_features, n_samples), triplets.len());
        for (r, c, v) in triplets {
            tri.add_triplet(r, c, v);
        }

        Self::new(tri.to_csr(), feature_ids, sample_ids)
    }

    /// Write the table as TSV.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_tsv(BufWriter::new(file))
    }

    /// Write the table as TSV to any writer.
    pub fn write_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        write!(writer, "feature_id")?;
        for sample_id in &self.sample_ids {
            write!(writer, "\t{}", sample_id)?;
        }
        writeln!(writer)?;

        for (row, feature_id) in self.feature_ids.iter().enumerate() {
            write!(writer, "{}", feature_id)?;
            for col in 0..self.n_samples() {
                write!(writer, "\t{}", self.get(row, col))?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Get the value at (row, col), returning 0 for missing entries.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data.get(row, col).copied().unwrap_or(0.0)
    }

    /// Number of features (rows).
    #[inline]
    pub fn n_features(&self) -> usize {
        self.data.rows()
    }

    /// Number of samples (columns).
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.data.cols()
    }

    #[inline]
    pub fn feature_ids(&self) -> &[I] {
        &self.feature_ids
    }

    #[inline]
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Row index of a feature.
    pub fn feature_index(&self, id: &I) -> Option<usize> {
        self.feature_index.get(id).copied()
    }

    /// Row index of a feature given its raw identifier.
    pub fn feature_position(&self, id: &str) -> Option<usize> {
        self.feature_index(&I::new(id))
    }

    /// Column index of a sample.
    pub fn sample_index(&self, id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|s| s == id)
    }

    /// Underlying sparse matrix.
    #[inline]
    pub fn data(&self) -> &CsMat<f64> {
        &self.data
    }

    /// Dense copy of a single row.
    pub fn row_dense(&self, row: usize) -> Vec<f64> {
        let mut dense = vec![0.0; self.n_samples()];
        if let Some(row_vec) = self.data.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Total abundance per feature.
    pub fn row_sums(&self) -> Vec<f64> {
        (0..self.n_features())
            .into_par_iter()
            .map(|row| {
                self.data
                    .outer_view(row)
                    .map(|v| v.iter().map(|(_, &val)| val).sum())
                    .unwrap_or(0.0)
            })
            .collect()
    }

    /// Total abundance per sample (library size).
    pub fn col_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_samples()];
        for row_vec in self.data.outer_iterator() {
            for (col, &val) in row_vec.iter() {
                sums[col] += val;
            }
        }
        sums
    }

    /// Keep only the given rows, in the given order.
    pub fn subset_features(&self, indices: &[usize]) -> Result<Self> {
        let mut tri = TriMat::new((indices.len(), self.n_samples()));
        let mut ids = Vec::with_capacity(indices.len());
        for (new_row, &old_row) in indices.iter().enumerate() {
            if old_row >= self.n_features() {
                return Err(DaaError::invalid(format!("feature index {} out of bounds", old_row)));
            }
            ids.push(self.feature_ids[old_row].clone());
            if let Some(row_vec) = self.data.outer_view(old_row) {
                for (col, &val) in row_vec.iter() {
                    tri.add_triplet(new_row, col, val);
                }
            }
        }
        Self::new(tri.to_csr(), ids, self.sample_ids.clone())
    }

    /// Keep only the given columns, in the given order.
    pub fn subset_samples(&self, indices: &[usize]) -> Result<Self> {
        let mut col_map = HashMap::with_capacity(indices.len());
        let mut ids = Vec::with_capacity(indices.len());
        for (new_col, &old_col) in indices.iter().enumerate() {
            if old_col >= self.n_samples() {
                return Err(DaaError::invalid(format!("sample index {} out of bounds", old_col)));
            }
            col_map.insert(old_col, new_col);
            ids.push(self.sample_ids[old_col].clone());
        }

        let mut tri = TriMat::new((self.n_features(), indices.len()));
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (old_col, &val) in row_vec.iter() {
                if let Some(&new_col) = col_map.get(&old_col) {
                    tri.add_triplet(row, new_col, val);
                }
            }
        }
        Self::new(tri.to_csr(), self.feature_ids.clone(), ids)
    }

    /// Reorder / subset columns to match `sample_ids`.
    ///
    /// Every requested sample must be present.
    pub fn select_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let positions: HashMap<&str, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();
        let missing: Vec<&str> = sample_ids
            .iter()
            .filter(|s| !positions.contains_key(s.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(DaaError::invalid(format!(
                "{} metadata sample(s) missing from the abundance table: {}",
                missing.len(),
                preview(&missing)
            )));
        }
        let indices: Vec<usize> = sample_ids.iter().map(|s| positions[s.as_str()]).collect();
        self.subset_samples(&indices)
    }

    /// Dense features × samples copy.
    pub fn to_dense(&self) -> DMatrix<f64> {
        let mut dense = DMatrix::zeros(self.n_features(), self.n_samples());
        for (row, row_vec) in self.data.outer_iterator().enumerate() {
            for (col, &val) in row_vec.iter() {
                dense[(row, col)] = val;
            }
        }
        dense
    }

    /// Dense copy rounded to integer counts.
    pub fn to_counts(&self) -> DMatrix<f64> {
        self.to_dense().map(|v| v.round())
    }

    /// Relative abundance: each column divided by its total.
    ///
    /// Samples with zero total stay at zero.
    pub fn relative_abundance(&self) -> DMatrix<f64> {
        let sums = self.col_sums();
        let mut dense = self.to_dense();
        for (j, &total) in sums.iter().enumerate() {
            if total > 0.0 {
                dense.column_mut(j).scale_mut(1.0 / total);
            }
        }
        dense
    }

    /// Fraction of samples in which each feature is non-zero.
    pub fn prevalence(&self) -> Vec<f64> {
        let n = self.n_samples() as f64;
        self.data
            .outer_iterator()
            .map(|row| row.iter().filter(|(_, &v)| v > 0.0).count() as f64 / n)
            .collect()
    }
}

/// First few items of a list, for error messages.
pub(crate) fn preview(items: &[&str]) -> String {
    const SHOWN: usize = 5;
    let head = items.iter().take(SHOWN).copied().collect::<Vec<_>>().join(", ");
    if items.len() > SHOWN {
        format!("{}, ...", head)
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{GeneFamilyId, PathwayId};
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn create_test_table() -> AbundanceTable<GeneFamilyId> {
        // 3 features × 4 samples
        AbundanceTable::from_rows(
            vec!["K00001".into(), "K00002".into(), "K00003".into()],
            vec!["S1".into(), "S2".into(), "S3".into(), "S4".into()],
            vec![
                vec![10.0, 20.0, 0.0, 5.0],
                vec![100.0, 200.0, 150.0, 175.0],
                vec![1.5, 0.0, 0.0, 0.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_dimensions_and_values() {
        let table = create_test_table();
        assert_eq!(table.n_features(), 3);
        assert_eq!(table.n_samples(), 4);
        assert_eq!(table.get(0, 1), 20.0);
        assert_eq!(table.get(0, 2), 0.0);
        assert_eq!(table.get(2, 0), 1.5);
        assert_eq!(table.row_dense(0), vec![10.0, 20.0, 0.0, 5.0]);
    }

    #[test]
    fn test_sums() {
        let table = create_test_table();
        assert_eq!(table.col_sums(), vec![111.5, 220.0, 150.0, 180.0]);
        assert_eq!(table.row_sums(), vec![35.0, 625.0, 1.5]);
    }

    #[test]
    fn test_from_reader_skips_comments() {
        let tsv = "# predicted metagenome\nfunction\tA\tB\nK00001\t1.5\t0\nK00002\t3\t4\n";
        let table: AbundanceTable<GeneFamilyId> =
            AbundanceTable::from_reader(Cursor::new(tsv)).unwrap();
        assert_eq!(table.sample_ids(), &["A", "B"]);
        assert_eq!(table.feature_ids()[1].as_str(), "K00002");
        assert_eq!(table.get(0, 0), 1.5);
    }

    #[test]
    fn test_tsv_roundtrip() {
        let table = create_test_table();
        let file = NamedTempFile::new().unwrap();
        table.to_tsv(file.path()).unwrap();
        let loaded: AbundanceTable<GeneFamilyId> = AbundanceTable::from_tsv(file.path()).unwrap();
        assert_eq!(loaded.feature_ids(), table.feature_ids());
        assert_eq!(loaded.to_dense(), table.to_dense());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "id\tS1\tS2").unwrap();
        writeln!(file, "ko00010\t1\tNA").unwrap();
        file.flush().unwrap();
        let result: Result<AbundanceTable<PathwayId>> = AbundanceTable::from_tsv(file.path());
        assert!(matches!(result, Err(DaaError::InvalidInput(_))));

        let negative = AbundanceTable::<PathwayId>::from_rows(
            vec!["ko00010".into()],
            vec!["S1".into()],
            vec![vec![-1.0]],
        );
        assert!(matches!(negative, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        let empty = AbundanceTable::<PathwayId>::from_rows(vec![], vec!["S1".into()], vec![]);
        assert!(matches!(empty, Err(DaaError::InvalidInput(_))));

        let dup = AbundanceTable::<PathwayId>::from_rows(
            vec!["ko00010".into(), "ko00010".into()],
            vec!["S1".into()],
            vec![vec![1.0], vec![2.0]],
        );
        assert!(matches!(dup, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_select_samples() {
        let table = create_test_table();
        let selected = table.select_samples(&["S4".into(), "S1".into()]).unwrap();
        assert_eq!(selected.sample_ids(), &["S4", "S1"]);
        assert_eq!(selected.row_dense(0), vec![5.0, 10.0]);

        let missing = table.select_samples(&["S9".into()]);
        assert!(matches!(missing, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_subset_features() {
        let table = create_test_table();
        let subset = table.subset_features(&[2, 0]).unwrap();
        assert_eq!(subset.feature_ids()[0].as_str(), "K00003");
        assert_eq!(subset.feature_position("K00001"), Some(1));
    }

    #[test]
    fn test_relative_abundance_and_prevalence() {
        let table = create_test_table();
        let rel = table.relative_abundance();
        for j in 0..4 {
            let s: f64 = rel.column(j).sum();
            assert!((s - 1.0).abs() < 1e-12);
        }
        assert_eq!(table.prevalence(), vec![0.75, 1.0, 0.25]);
    }

    #[test]
    fn test_to_counts_rounds() {
        let table = create_test_table();
        assert_eq!(table.to_counts()[(2, 0)], 2.0);
    }
}
