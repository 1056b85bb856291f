//! YAML pipeline configuration.

use crate::annotate::PathwayType;
use crate::correct::AdjustMethod;
use crate::dispatch::{DaaMethod, DaaRequest, MethodOptions};
use crate::error::{DaaError, Result};
use crate::plot::{OrderPolicy, PlotStyle};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_p_value_bar() -> f64 {
    0.05
}

fn default_true() -> bool {
    true
}

/// Settings for one end-to-end run: DAA, annotation and plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Metadata column holding the groups to compare.
    pub group: String,
    pub method: DaaMethod,
    #[serde(default)]
    pub adjust: AdjustMethod,
    /// Identifier namespace of the abundance table.
    #[serde(default = "default_pathway_type")]
    pub pathway_type: PathwayType,
    /// The table was converted from KOs to KEGG pathways.
    #[serde(default)]
    pub ko_to_kegg: bool,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub covariates: Vec<String>,
    /// Feature allow-list for testing and plotting.
    #[serde(default)]
    pub select: Option<Vec<String>>,
    /// Adjusted p-value cut-off for the error-bar chart.
    #[serde(default = "default_p_value_bar")]
    pub p_value_bar: f64,
    #[serde(default)]
    pub order: OrderPolicy,
    #[serde(default)]
    pub options: MethodOptions,
    #[serde(default = "default_true")]
    pub annotate: bool,
    /// Query KEGG for IDs missing from the bundled reference.
    #[serde(default)]
    pub remote: bool,
    #[serde(default)]
    pub style: PlotStyle,
}

fn default_pathway_type() -> PathwayType {
    PathwayType::KeggPathway
}

impl PipelineConfig {
    pub fn new(group: impl Into<String>, method: DaaMethod) -> Self {
        Self {
            group: group.into(),
            method,
            adjust: AdjustMethod::default(),
            pathway_type: default_pathway_type(),
            ko_to_kegg: false,
            reference: None,
            covariates: Vec::new(),
            select: None,
            p_value_bar: default_p_value_bar(),
            order: OrderPolicy::default(),
            options: MethodOptions::default(),
            annotate: true,
            remote: false,
            style: PlotStyle::default(),
        }
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml).map_err(|e| DaaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        log::debug!("loading pipeline config from {}", path.display());
        Self::from_yaml(&text)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(DaaError::from)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// Reject settings no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.group.trim().is_empty() {
            return Err(DaaError::Config("group column must not be empty".into()));
        }
        if !(self.p_value_bar > 0.0 && self.p_value_bar <= 1.0) {
            return Err(DaaError::Config(format!(
                "p_value_bar must be in (0, 1], got {}",
                self.p_value_bar
            )));
        }
        if self.reference.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(DaaError::Config("reference level must not be empty".into()));
        }
        if self.covariates.iter().any(|c| c == &self.group) {
            return Err(DaaError::Config(format!(
                "group column '{}' cannot also be a covariate",
                self.group
            )));
        }
        self.options.validate().map_err(|e| DaaError::Config(e.to_string()))?;
        self.style.validate().map_err(|e| DaaError::Config(e.to_string()))?;
        Ok(())
    }

    /// The DAA request described by this config.
    pub fn request(&self) -> DaaRequest {
        DaaRequest {
            group: self.group.clone(),
            method: self.method,
            reference: self.reference.clone(),
            select: self.select.clone(),
            covariates: self.covariates.clone(),
            adjust: self.adjust,
            options: self.options.clone(),
        }
    }

    /// A commented starting point for `pathdaa run`.
    pub fn example() -> Self {
        let mut config = Self::new("Environment", DaaMethod::Linda);
        config.reference = Some("Pro-survival".to_string());
        config.ko_to_kegg = true;
        config.order = OrderPolicy::PathwayClass;
        config
    }

    pub fn reference(mut self, level: impl Into<String>) -> Self {
        self.reference = Some(level.into());
        self
    }

    pub fn covariate(mut self, column: impl Into<String>) -> Self {
        self.covariates.push(column.into());
        self
    }

    pub fn select<S: Into<String>>(mut self, ids: impl IntoIterator<Item = S>) -> Self {
        self.select = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn adjust(mut self, adjust: AdjustMethod) -> Self {
        self.adjust = adjust;
        self
    }

    pub fn pathway_type(mut self, pathway_type: PathwayType) -> Self {
        self.pathway_type = pathway_type;
        self
    }

    pub fn ko_to_kegg(mut self, ko_to_kegg: bool) -> Self {
        self.ko_to_kegg = ko_to_kegg;
        self
    }

    pub fn options(mut self, options: MethodOptions) -> Self {
        self.options = options;
        self
    }
}
