//! Sample metadata.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A variable value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; ordinals are widened.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_ordinal(&self) -> Option<i64> {
        match self {
            Variable::Ordinal(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value as a factor level.
    ///
    /// Group columns coded as `1`/`2` are read as continuous but still
    /// describe groups, so numbers are rendered without a trailing `.0`.
    pub fn as_level(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) if v.fract() == 0.0 && v.is_finite() => {
                Some(format!("{}", *v as i64))
            }
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }

    fn parse(raw: &str, var_type: VariableType) -> Self {
        let raw = raw.trim();
        if is_missing_token(raw) {
            return Variable::Missing;
        }
        match var_type {
            VariableType::Continuous => {
                raw.parse().map(Variable::Continuous).unwrap_or(Variable::Missing)
            }
            VariableType::Ordinal => {
                raw.parse().map(Variable::Ordinal).unwrap_or(Variable::Missing)
            }
            VariableType::Categorical => Variable::Categorical(raw.to_string()),
        }
    }
}

fn is_missing_token(raw: &str) -> bool {
    raw.is_empty() || raw.eq_ignore_ascii_case("na") || raw.eq_ignore_ascii_case("nan")
}

/// Type hint for columns when loading metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

/// Sample metadata: one row per sample, typed variables per column.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    sample_ids: Vec<String>,
    column_names: Vec<String>,
    /// sample_id -> column_name -> value
    data: HashMap<String, HashMap<String, Variable>>,
    column_types: HashMap<String, VariableType>,
}

impl Metadata {
    /// Build metadata from already-split rows.
    ///
    /// `rows` holds one `(sample_id, values)` pair per sample, with values in
    /// `column_names` order. Column types are inferred: a column whose
    /// non-missing values all parse as numbers is continuous, otherwise it is
    /// categorical.
    pub fn from_records(
        column_names: Vec<String>,
        rows: Vec<(String, Vec<String>)>,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(DaaError::invalid("metadata has no samples"));
        }
        if column_names.is_empty() {
            return Err(DaaError::invalid("metadata must have at least one variable column"));
        }

        let mut column_types = HashMap::new();
        for (col_idx, col_name) in column_names.iter().enumerate() {
            let all_numeric = rows.iter().all(|(_, values)| {
                values
                    .get(col_idx)
                    .map_or(true, |v| is_missing_token(v.trim()) || v.trim().parse::<f64>().is_ok())
            });
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            column_types.insert(col_name.clone(), var_type);
        }

        let mut sample_ids = Vec::with_capacity(rows.len());
        let mut data = HashMap::with_capacity(rows.len());
        for (sample_id, values) in rows {
            if data.contains_key(&sample_id) {
                return Err(DaaError::invalid(format!(
                    "duplicate sample ID '{}' in metadata",
                    sample_id
                )));
            }
            let sample_data: HashMap<String, Variable> = column_names
                .iter()
                .enumerate()
                .map(|(col_idx, col_name)| {
                    let var = values
                        .get(col_idx)
                        .map(|raw| Variable::parse(raw, column_types[col_name]))
                        .unwrap_or(Variable::Missing);
                    (col_name.clone(), var)
                })
                .collect();
            sample_ids.push(sample_id.clone());
            data.insert(sample_id, sample_data);
        }

        Ok(Self {
            sample_ids,
            column_names,
            data,
            column_types,
        })
    }

    /// Load metadata from a TSV file whose first column holds sample IDs.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), None)
    }

    /// Load metadata from a TSV file with sample IDs in the named column.
    pub fn from_tsv_with_id_column<P: AsRef<Path>>(path: P, id_column: &str) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), Some(id_column))
    }

    /// Load metadata from any buffered TSV reader.
    ///
    /// With `id_column = None` the first column holds sample IDs.
    pub fn from_reader<R: BufRead>(reader: R, id_column: Option<&str>) -> Result<Self> {
        let mut lines = reader.lines();
        let header_line = lines
            .next()
            .ok_or_else(|| DaaError::invalid("empty metadata file"))??;
        let header: Vec<String> = header_line
            .trim_end_matches('\r')
            .split('\t')
            .map(|s| s.trim().to_string())
            .collect();

        let id_idx = match id_column {
            None => 0,
            Some(name) => header.iter().position(|h| h == name).ok_or_else(|| {
                DaaError::invalid(format!("sample ID column '{}' not found in metadata", name))
            })?,
        };
        let column_names: Vec<String> = header
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != id_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let mut rows = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
            let sample_id = fields
                .get(id_idx)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| {
                    DaaError::invalid(format!("metadata row '{}' has no sample ID", line))
                })?;
            let values = fields
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != id_idx)
                .map(|(_, v)| v.to_string())
                .collect();
            rows.push((sample_id, values));
        }

        Self::from_records(column_names, rows)
    }

    /// Override the inferred type of specific columns.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Self {
        for (col_name, var_type) in types {
            if !self.column_types.contains_key(&col_name) {
                continue;
            }
            for sample_data in self.data.values_mut() {
                if let Some(var) = sample_data.get_mut(&col_name) {
                    if let Some(raw) = var.as_level() {
                        *var = Variable::parse(&raw, var_type);
                    }
                }
            }
            self.column_types.insert(col_name, var_type);
        }
        self
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample_ids.is_empty()
    }

    /// Value for a specific sample and column.
    pub fn get(&self, sample_id: &str, column: &str) -> Option<&Variable> {
        self.data.get(sample_id).and_then(|m| m.get(column))
    }

    /// All values of a column, in sample order.
    pub fn column(&self, column: &str) -> Result<Vec<&Variable>> {
        if !self.has_column(column) {
            return Err(DaaError::invalid(format!("column '{}' not found in metadata", column)));
        }
        Ok(self
            .sample_ids
            .iter()
            .map(|sid| {
                self.data
                    .get(sid)
                    .and_then(|m| m.get(column))
                    .unwrap_or(&Variable::Missing)
            })
            .collect())
    }

    /// A column read as factor levels, in sample order.
    pub fn categorical_values(&self, column: &str) -> Result<Vec<Option<String>>> {
        Ok(self.column(column)?.into_iter().map(Variable::as_level).collect())
    }

    /// A column read as numbers, in sample order.
    pub fn numeric_values(&self, column: &str) -> Result<Vec<Option<f64>>> {
        Ok(self.column(column)?.into_iter().map(Variable::as_continuous).collect())
    }

    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Sorted distinct levels of a column.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let levels: BTreeSet<String> =
            self.categorical_values(column)?.into_iter().flatten().collect();
        Ok(levels.into_iter().collect())
    }

    /// Keep only the given samples, in the given order.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let mut new_data = HashMap::with_capacity(sample_ids.len());
        let mut seen = HashSet::with_capacity(sample_ids.len());
        for sid in sample_ids {
            let sample_data = self
                .data
                .get(sid)
                .ok_or_else(|| {
                    DaaError::invalid(format!("sample '{}' not found in metadata", sid))
                })?;
            if !seen.insert(sid.as_str()) {
                return Err(DaaError::invalid(format!("sample '{}' requested twice", sid)));
            }
            new_data.insert(sid.clone(), sample_data.clone());
        }

        Ok(Self {
            sample_ids: sample_ids.to_vec(),
            column_names: self.column_names.clone(),
            data: new_data,
            column_types: self.column_types.clone(),
        })
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_names.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn create_test_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "sample_id\tgroup\tage\tseverity").unwrap();
        writeln!(file, "S1\tcontrol\t25\t1").unwrap();
        writeln!(file, "S2\ttreatment\t30\t2").unwrap();
        writeln!(file, "S3\tcontrol\t35\t1").unwrap();
        writeln!(file, "S4\ttreatment\t28\t3").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_metadata() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();

        assert_eq!(meta.n_samples(), 4);
        assert_eq!(meta.n_columns(), 3);
        assert_eq!(meta.sample_ids(), &["S1", "S2", "S3", "S4"]);
        assert_eq!(meta.column_names(), &["group", "age", "severity"]);
        assert_eq!(meta.get("S1", "group").unwrap().as_categorical(), Some("control"));
        assert_eq!(meta.get("S2", "age").unwrap().as_continuous(), Some(30.0));
    }

    #[test]
    fn test_column_type_inference() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();
        assert_eq!(meta.column_type("group"), Some(VariableType::Categorical));
        assert_eq!(meta.column_type("age"), Some(VariableType::Continuous));
    }

    #[test]
    fn test_named_id_column() {
        let tsv = "group\tsample\nA\tS1\nB\tS2\n";
        let meta = Metadata::from_reader(Cursor::new(tsv), Some("sample")).unwrap();
        assert_eq!(meta.sample_ids(), &["S1", "S2"]);
        assert_eq!(meta.column_names(), &["group"]);

        let missing = Metadata::from_reader(Cursor::new(tsv), Some("id"));
        assert!(matches!(missing, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_duplicate_samples_rejected() {
        let tsv = "id\tgroup\nS1\tA\nS1\tB\n";
        let result = Metadata::from_reader(Cursor::new(tsv), None);
        assert!(matches!(result, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_numeric_groups_become_levels() {
        let tsv = "id\tgroup\nS1\t1\nS2\t2\nS3\t1\n";
        let meta = Metadata::from_reader(Cursor::new(tsv), None).unwrap();
        assert_eq!(meta.levels("group").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_with_column_types() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();
        let mut types = HashMap::new();
        types.insert("severity".to_string(), VariableType::Ordinal);
        let meta = meta.with_column_types(types);
        assert_eq!(meta.get("S2", "severity").unwrap().as_ordinal(), Some(2));
    }

    #[test]
    fn test_subset_samples() {
        let file = create_test_tsv();
        let meta = Metadata::from_tsv(file.path()).unwrap();
        let subset = meta.subset_samples(&["S3".to_string(), "S1".to_string()]).unwrap();
        assert_eq!(subset.sample_ids(), &["S3", "S1"]);
        assert!(meta.subset_samples(&["S9".to_string()]).is_err());
    }

    #[test]
    fn test_missing_values() {
        let tsv = "sample_id\tgroup\tage\nS1\tcontrol\t25\nS2\ttreatment\tNA\nS3\t\t30\n";
        let meta = Metadata::from_reader(Cursor::new(tsv), None).unwrap();
        assert!(meta.get("S2", "age").unwrap().is_missing());
        assert!(meta.get("S3", "group").unwrap().is_missing());
        assert_eq!(
            meta.categorical_values("group").unwrap(),
            vec![Some("control".to_string()), Some("treatment".to_string()), None]
        );
    }
}
