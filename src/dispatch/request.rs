//! Request types for a differential abundance run.

use crate::correct::AdjustMethod;
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The eight supported differential abundance methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DaaMethod {
    #[serde(rename = "ALDEx2", alias = "aldex2")]
    Aldex2,
    #[serde(rename = "DESeq2", alias = "deseq2")]
    Deseq2,
    #[serde(rename = "edgeR", alias = "edger")]
    Edger,
    #[serde(rename = "limma voom", alias = "limma_voom", alias = "limma-voom")]
    LimmaVoom,
    #[serde(rename = "metagenomeSeq", alias = "metagenomeseq")]
    MetagenomeSeq,
    #[serde(rename = "Maaslin2", alias = "maaslin2")]
    Maaslin2,
    #[serde(rename = "LinDA", alias = "linda")]
    Linda,
    #[serde(rename = "Lefser", alias = "lefser")]
    Lefser,
}

impl DaaMethod {
    pub const ALL: [DaaMethod; 8] = [
        DaaMethod::Aldex2,
        DaaMethod::Deseq2,
        DaaMethod::Edger,
        DaaMethod::LimmaVoom,
        DaaMethod::MetagenomeSeq,
        DaaMethod::Maaslin2,
        DaaMethod::Linda,
        DaaMethod::Lefser,
    ];

    /// Display name, also the prefix of every method label.
    pub fn name(&self) -> &'static str {
        match self {
            DaaMethod::Aldex2 => "ALDEx2",
            DaaMethod::Deseq2 => "DESeq2",
            DaaMethod::Edger => "edgeR",
            DaaMethod::LimmaVoom => "limma voom",
            DaaMethod::MetagenomeSeq => "metagenomeSeq",
            DaaMethod::Maaslin2 => "Maaslin2",
            DaaMethod::Linda => "LinDA",
            DaaMethod::Lefser => "Lefser",
        }
    }
}

impl fmt::Display for DaaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DaaMethod {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .flat_map(char::to_lowercase)
            .collect();
        DaaMethod::ALL
            .into_iter()
            .find(|m| m.name().replace(' ', "").to_lowercase() == key)
            .ok_or_else(|| {
                let known: Vec<&str> = DaaMethod::ALL.iter().map(|m| m.name()).collect();
                DaaError::invalid(format!(
                    "unknown method '{}'; expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

/// Tuning knobs shared by the method adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodOptions {
    /// Pseudocount for LinDA before the log-ratio transform.
    pub pseudocount: f64,
    /// Dirichlet Monte-Carlo instances for ALDEx2.
    pub mc_samples: usize,
    /// Seed for the Monte-Carlo draws.
    pub seed: u64,
    /// Kruskal-Wallis p-value cut-off for Lefser.
    pub kruskal_threshold: f64,
    /// Minimum absolute LDA score for Lefser.
    pub lda_threshold: f64,
}

impl Default for MethodOptions {
    fn default() -> Self {
        Self {
            pseudocount: 0.5,
            mc_samples: 128,
            seed: 42,
            kruskal_threshold: 0.05,
            lda_threshold: 2.0,
        }
    }
}

impl MethodOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.pseudocount > 0.0 && self.pseudocount.is_finite()) {
            return Err(DaaError::invalid(format!(
                "pseudocount must be positive, got {}",
                self.pseudocount
            )));
        }
        if self.mc_samples == 0 {
            return Err(DaaError::invalid("mc_samples must be at least 1"));
        }
        if !(self.kruskal_threshold > 0.0 && self.kruskal_threshold <= 1.0) {
            return Err(DaaError::invalid("kruskal_threshold must be in (0, 1]"));
        }
        if !(self.lda_threshold >= 0.0) {
            return Err(DaaError::invalid("lda_threshold must be non-negative"));
        }
        Ok(())
    }
}

/// Everything needed to run one method on one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaaRequest {
    pub group: String,
    pub method: DaaMethod,
    #[serde(default)]
    pub reference: Option<String>,
    /// Restrict the analysis to these feature IDs; unknown IDs are ignored.
    #[serde(default)]
    pub select: Option<Vec<String>>,
    #[serde(default)]
    pub covariates: Vec<String>,
    #[serde(default)]
    pub adjust: AdjustMethod,
    #[serde(default)]
    pub options: MethodOptions,
}

impl DaaRequest {
    pub fn new(group: impl Into<String>, method: DaaMethod) -> Self {
        Self {
            group: group.into(),
            method,
            reference: None,
            select: None,
            covariates: Vec::new(),
            adjust: AdjustMethod::default(),
            options: MethodOptions::default(),
        }
    }

    pub fn reference(mut self, level: impl Into<String>) -> Self {
        self.reference = Some(level.into());
        self
    }

    pub fn select<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.select = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn covariate(mut self, column: impl Into<String>) -> Self {
        self.covariates.push(column.into());
        self
    }

    pub fn adjust(mut self, adjust: AdjustMethod) -> Self {
        self.adjust = adjust;
        self
    }

    pub fn options(mut self, options: MethodOptions) -> Self {
        self.options = options;
        self
    }
}
