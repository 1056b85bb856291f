//! Method registry: one adapter record per backend.
//!
//! An adapter is three plain functions. `prepare` reshapes the validated
//! input into what the backend expects, `invoke` runs the backend and
//! returns its native output, and `collect` maps that output onto
//! [`RawRecord`]s. The registry is built once and never mutated.

use crate::data::{DesignMatrix, Metadata, VariableType};
use crate::dispatch::adapters::{
    self, Aldex2Output, Contrast, DeseqRow, EdgerRow, FitZigRow, LefserOutput, LimmaRow, LindaRow,
    MaaslinOutput,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::{DaaError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

/// Matrix orientation a backend consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    FeaturesBySamples,
    SamplesByFeatures,
}

/// What `prepare` hands to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEncoding {
    /// Abundances rounded to integer counts.
    IntegerCounts,
    /// Abundances as given.
    Abundance,
    /// Abundances plus a positive pseudocount.
    Pseudocounted,
    /// Per-sample relative abundance scaled to one million.
    RelativePerMillion,
}

/// How covariate columns enter the backend's model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CovariateEncoding {
    /// Every covariate is treated as a factor.
    Factor,
    /// Numeric covariates stay numeric, the rest are factors.
    FactorAndNumeric,
    /// The default analysis path has no covariates.
    Unsupported,
}

/// One backend result row, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub feature_id: String,
    /// Method label, including any sub-method.
    pub method: String,
    pub group1: String,
    pub group2: String,
    pub estimate: Option<f64>,
    pub statistic: Option<f64>,
    pub p_value: f64,
    /// Adjusted p-value as reported by the backend; recomputed downstream.
    pub p_adjust: Option<f64>,
}

/// Native output of each backend, one variant per method.
#[derive(Debug, Clone)]
pub enum BackendOutput {
    Aldex2(Aldex2Output),
    Deseq2(Vec<Contrast<DeseqRow>>),
    Edger(Vec<Contrast<EdgerRow>>),
    LimmaVoom(Vec<Contrast<LimmaRow>>),
    MetagenomeSeq(Vec<Contrast<FitZigRow>>),
    Maaslin2(MaaslinOutput),
    Linda(Vec<Contrast<LindaRow>>),
    Lefser(LefserOutput),
}

impl BackendOutput {
    pub fn method(&self) -> DaaMethod {
        match self {
            BackendOutput::Aldex2(_) => DaaMethod::Aldex2,
            BackendOutput::Deseq2(_) => DaaMethod::Deseq2,
            BackendOutput::Edger(_) => DaaMethod::Edger,
            BackendOutput::LimmaVoom(_) => DaaMethod::LimmaVoom,
            BackendOutput::MetagenomeSeq(_) => DaaMethod::MetagenomeSeq,
            BackendOutput::Maaslin2(_) => DaaMethod::Maaslin2,
            BackendOutput::Linda(_) => DaaMethod::Linda,
            BackendOutput::Lefser(_) => DaaMethod::Lefser,
        }
    }

    /// Error for a `collect` handed the wrong variant.
    pub(crate) fn mismatch(&self, expected: DaaMethod) -> DaaError {
        DaaError::method(
            expected.name(),
            format!("received {} output", self.method().name()),
        )
    }
}

/// Backend input produced by an adapter's `prepare`.
#[derive(Debug, Clone)]
pub struct PreparedInput {
    pub orientation: Orientation,
    /// Data in `orientation`.
    pub data: DMatrix<f64>,
    pub feature_ids: Vec<String>,
    pub sample_ids: Vec<String>,
    pub metadata: Metadata,
    pub group_column: String,
    pub groups: Vec<String>,
    /// Reference first.
    pub levels: Vec<String>,
    pub reference: String,
    pub covariates: Vec<String>,
}

impl PreparedInput {
    /// Shape-transform validated input: orientation, encoding and covariate coding.
    pub fn from_validated(
        input: &ValidatedInput,
        orientation: Orientation,
        covariates: CovariateEncoding,
        encode: impl Fn(&DMatrix<f64>) -> DMatrix<f64>,
    ) -> Self {
        let encoded = encode(&input.abundance);
        let data = match orientation {
            Orientation::FeaturesBySamples => encoded,
            Orientation::SamplesByFeatures => encoded.transpose(),
        };

        let (metadata, covariate_columns) = match covariates {
            CovariateEncoding::Unsupported => {
                if !input.covariates.is_empty() {
                    log::warn!(
                        "covariates [{}] are ignored by this method",
                        input.covariates.join(", ")
                    );
                }
                (input.metadata.clone(), Vec::new())
            }
            CovariateEncoding::Factor => {
                let types: HashMap<String, VariableType> = input
                    .covariates
                    .iter()
                    .map(|c| (c.clone(), VariableType::Categorical))
                    .collect();
                (input.metadata.clone().with_column_types(types), input.covariates.clone())
            }
            CovariateEncoding::FactorAndNumeric => {
                (input.metadata.clone(), input.covariates.clone())
            }
        };

        Self {
            orientation,
            data,
            feature_ids: input.feature_ids.clone(),
            sample_ids: input.sample_ids.clone(),
            metadata,
            group_column: input.group_column.clone(),
            groups: input.groups.clone(),
            levels: input.levels.clone(),
            reference: input.reference.clone(),
            covariates: covariate_columns,
        }
    }

    /// Sample indices of each level, in `levels` order.
    pub fn level_indices(&self) -> Vec<Vec<usize>> {
        self.levels
            .iter()
            .map(|level| {
                self.groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| *g == level)
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect()
    }

    /// `~ group + covariates` against the reference level.
    pub fn design(&self) -> Result<DesignMatrix> {
        DesignMatrix::for_groups(
            &self.metadata,
            &self.group_column,
            &self.reference,
            &self.covariates,
        )
    }

    /// Design column index of each non-reference level.
    pub fn contrast_columns(&self, design: &DesignMatrix) -> Result<Vec<(String, usize)>> {
        self.levels
            .iter()
            .skip(1)
            .map(|level| {
                design
                    .group_coefficient(&self.group_column, level)
                    .map(|idx| (level.clone(), idx))
                    .ok_or_else(|| {
                        DaaError::invalid(format!("no design column for level '{}'", level))
                    })
            })
            .collect()
    }
}

pub type PrepareFn = fn(&ValidatedInput, &MethodOptions) -> Result<PreparedInput>;
pub type InvokeFn = fn(&PreparedInput, &MethodOptions) -> Result<BackendOutput>;
pub type CollectFn = fn(BackendOutput) -> Result<Vec<RawRecord>>;

/// Static description of one backend plus its three functions.
#[derive(Debug, Clone, Copy)]
pub struct MethodAdapter {
    pub method: DaaMethod,
    pub orientation: Orientation,
    pub encoding: InputEncoding,
    pub covariates: CovariateEncoding,
    /// A reference level must be given when the group has more than two levels.
    pub needs_baseline: bool,
    pub max_levels: Option<usize>,
    pub sub_methods: &'static [&'static str],
    pub prepare: PrepareFn,
    pub invoke: InvokeFn,
    pub collect: CollectFn,
}

/// Immutable map from method tag to adapter.
#[derive(Debug, Clone)]
pub struct MethodRegistry {
    adapters: BTreeMap<DaaMethod, MethodAdapter>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    /// Registry with every built-in adapter.
    pub fn new() -> Self {
        let adapters = [
            adapters::aldex2::ADAPTER,
            adapters::deseq2::ADAPTER,
            adapters::edger::ADAPTER,
            adapters::limma::ADAPTER,
            adapters::metagenomeseq::ADAPTER,
            adapters::maaslin2::ADAPTER,
            adapters::linda::ADAPTER,
            adapters::lefser::ADAPTER,
        ]
        .into_iter()
        .map(|a| (a.method, a))
        .collect();
        Self { adapters }
    }

    /// Process-wide registry, built on first use.
    pub fn global() -> &'static MethodRegistry {
        static REGISTRY: OnceLock<MethodRegistry> = OnceLock::new();
        REGISTRY.get_or_init(MethodRegistry::new)
    }

    pub fn get(&self, method: DaaMethod) -> Result<&MethodAdapter> {
        self.adapters
            .get(&method)
            .ok_or_else(|| DaaError::Config(format!("no adapter registered for {}", method)))
    }

    /// Check that every method tag has an adapter bound to that tag.
    pub fn validate(&self) -> Result<()> {
        for method in DaaMethod::ALL {
            let adapter = self.get(method)?;
            if adapter.method != method {
                return Err(DaaError::Config(format!(
                    "adapter for {} is registered under {}",
                    adapter.method, method
                )));
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &MethodAdapter> {
        self.adapters.values()
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
