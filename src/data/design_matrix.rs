//! Design matrix construction from metadata.

use crate::data::{Metadata, VariableType};
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// A design matrix for linear modeling (samples × coefficients).
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    matrix: DMatrix<f64>,
    coefficient_names: Vec<String>,
    sample_ids: Vec<String>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Build `~ group + covariates` with treatment coding.
    ///
    /// The group column is coded against `reference`; one indicator column per
    /// other level is named `{group}{level}`. Numeric covariates enter as a
    /// single column, categorical covariates are dummy coded against their
    /// alphabetically first level. Missing covariate values are an error.
    pub fn for_groups(
        metadata: &Metadata,
        group: &str,
        reference: &str,
        covariates: &[String],
    ) -> Result<Self> {
        let sample_ids = metadata.sample_ids().to_vec();
        let n_samples = sample_ids.len();

        let mut coefficient_names = vec!["(Intercept)".to_string()];
        let mut columns: Vec<Vec<f64>> = vec![vec![1.0; n_samples]];
        let mut reference_levels = HashMap::new();

        let group_values = metadata.categorical_values(group)?;
        let levels = metadata.levels(group)?;
        if !levels.iter().any(|l| l == reference) {
            return Err(DaaError::invalid(format!(
                "reference level '{}' is not a level of '{}'",
                reference, group
            )));
        }
        reference_levels.insert(group.to_string(), reference.to_string());
        for level in levels.iter().filter(|l| *l != reference) {
            coefficient_names.push(format!("{}{}", group, level));
            columns.push(indicator(&group_values, level));
        }

        for covariate in covariates {
            if covariate == group {
                continue;
            }
            match metadata.column_type(covariate) {
                Some(VariableType::Continuous) | Some(VariableType::Ordinal) => {
                    let values = metadata.numeric_values(covariate)?;
                    let col = values
                        .into_iter()
                        .zip(&sample_ids)
                        .map(|(v, sid)| v.ok_or_else(|| missing_covariate(covariate, sid)))
                        .collect::<Result<Vec<f64>>>()?;
                    coefficient_names.push(covariate.clone());
                    columns.push(col);
                }
                Some(VariableType::Categorical) => {
                    let values = metadata.categorical_values(covariate)?;
                    if let Some(pos) = values.iter().position(Option::is_none) {
                        return Err(missing_covariate(covariate, &sample_ids[pos]));
                    }
                    let cov_levels = metadata.levels(covariate)?;
                    if let Some(first) = cov_levels.first() {
                        reference_levels.insert(covariate.clone(), first.clone());
                    }
                    for level in cov_levels.iter().skip(1) {
                        coefficient_names.push(format!("{}{}", covariate, level));
                        columns.push(indicator(&values, level));
                    }
                }
                None => {
                    return Err(DaaError::invalid(format!(
                        "covariate '{}' not found in metadata",
                        covariate
                    )))
                }
            }
        }

        let matrix = DMatrix::from_fn(n_samples, columns.len(), |i, j| columns[j][i]);
        Ok(Self {
            matrix,
            coefficient_names,
            sample_ids,
            reference_levels,
        })
    }

    /// Copy of this design without the given columns.
    pub fn without_columns(&self, drop: &[usize]) -> Self {
        let keep: Vec<usize> = (0..self.n_coefficients()).filter(|j| !drop.contains(j)).collect();
        let matrix =
            DMatrix::from_fn(self.n_samples(), keep.len(), |i, k| self.matrix[(i, keep[k])]);
        Self {
            matrix,
            coefficient_names: keep.iter().map(|&j| self.coefficient_names[j].clone()).collect(),
            sample_ids: self.sample_ids.clone(),
            reference_levels: self.reference_levels.clone(),
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Residual degrees of freedom.
    pub fn df_residual(&self) -> usize {
        self.n_samples().saturating_sub(self.n_coefficients())
    }

    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Column holding the `level` vs reference contrast of `group`.
    pub fn group_coefficient(&self, group: &str, level: &str) -> Option<usize> {
        self.coefficient_index(&format!("{}{}", group, level))
    }

    /// True when X'X is numerically invertible.
    pub fn is_full_rank(&self) -> bool {
        if self.n_samples() <= self.n_coefficients() {
            return false;
        }
        let xtx = self.matrix.transpose() * &self.matrix;
        let svd = xtx.svd(false, false);
        let max = svd.singular_values.max();
        max > 0.0 && svd.singular_values.min() / max > 1e-10
    }
}

fn indicator(values: &[Option<String>], level: &str) -> Vec<f64> {
    values
        .iter()
        .map(|v| if v.as_deref() == Some(level) { 1.0 } else { 0.0 })
        .collect()
}

fn missing_covariate(covariate: &str, sample: &str) -> DaaError {
    DaaError::invalid(format!("covariate '{}' is missing for sample '{}'", covariate, sample))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn create_test_metadata() -> Metadata {
        let tsv = "sample_id\tgroup\tage\tsite\n\
                   S1\tcontrol\t25\tgut\n\
                   S2\ttreatment\t30\toral\n\
                   S3\tcontrol\t35\toral\n\
                   S4\ttreatment\t28\tgut\n\
                   S5\tplacebo\t40\tgut\n";
        Metadata::from_reader(Cursor::new(tsv), None).unwrap()
    }

    #[test]
    fn test_group_coding() {
        let meta = create_test_metadata();
        let dm = DesignMatrix::for_groups(&meta, "group", "control", &[]).unwrap();
        assert_eq!(dm.coefficient_names(), &["(Intercept)", "groupplacebo", "grouptreatment"]);
        assert_eq!(dm.reference_level("group"), Some("control"));

        let treat: Vec<f64> = (0..5).map(|i| dm.matrix()[(i, 2)]).collect();
        assert_eq!(treat, vec![0.0, 1.0, 0.0, 1.0, 0.0]);
        assert_eq!(dm.group_coefficient("group", "placebo"), Some(1));
        assert_eq!(dm.df_residual(), 2);
    }

    #[test]
    fn test_covariates() {
        let meta = create_test_metadata();
        let covs = vec!["age".to_string(), "site".to_string()];
        let dm = DesignMatrix::for_groups(&meta, "group", "treatment", &covs).unwrap();
        assert_eq!(
            dm.coefficient_names(),
            &["(Intercept)", "groupcontrol", "groupplacebo", "age", "siteoral"]
        );
        let age: Vec<f64> = (0..5).map(|i| dm.matrix()[(i, 3)]).collect();
        assert_eq!(age, vec![25.0, 30.0, 35.0, 28.0, 40.0]);
    }

    #[test]
    fn test_unknown_reference() {
        let meta = create_test_metadata();
        let result = DesignMatrix::for_groups(&meta, "group", "nope", &[]);
        assert!(matches!(result, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_without_columns() {
        let meta = create_test_metadata();
        let dm = DesignMatrix::for_groups(&meta, "group", "control", &[]).unwrap();
        let reduced = dm.without_columns(&[1, 2]);
        assert_eq!(reduced.coefficient_names(), &["(Intercept)"]);
        assert_eq!(reduced.n_samples(), 5);
        assert!(reduced.is_full_rank());
    }
}
