//! Explicit chart styling and feature ordering.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size, colours and fonts of one chart. Passed to every renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    /// Group colours as RGB, reused cyclically.
    pub palette: Vec<[u8; 3]>,
    pub font_family: String,
    pub font_size: u32,
    pub title: Option<String>,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 700,
            palette: vec![
                [0xd9, 0x3f, 0x3f],
                [0x3a, 0x7c, 0xc1],
                [0x4d, 0xa6, 0x5b],
                [0x96, 0x5a, 0xb3],
                [0xf0, 0x8a, 0x24],
                [0x8c, 0x6d, 0x31],
                [0xe3, 0x77, 0xc2],
                [0x7f, 0x7f, 0x7f],
            ],
            font_family: "sans-serif".to_string(),
            font_size: 14,
            title: None,
        }
    }
}

impl PlotStyle {
    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Colour for the `i`-th group.
    pub fn color(&self, i: usize) -> [u8; 3] {
        if self.palette.is_empty() {
            [0, 0, 0]
        } else {
            self.palette[i % self.palette.len()]
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width < 100 || self.height < 100 {
            return Err(DaaError::invalid(format!(
                "plot size {}x{} is too small",
                self.width, self.height
            )));
        }
        if self.font_size == 0 {
            return Err(DaaError::invalid("font size must be positive"));
        }
        Ok(())
    }
}

/// How features are ordered along the feature axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderPolicy {
    /// By the group with the highest mean, then adjusted p-value.
    #[default]
    Group,
    /// Ascending adjusted p-value.
    PValue,
    /// By pathway class, then adjusted p-value.
    PathwayClass,
    /// By display name.
    Name,
}

impl fmt::Display for OrderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Group => "group",
            Self::PValue => "p_value",
            Self::PathwayClass => "pathway_class",
            Self::Name => "name",
        };
        f.write_str(name)
    }
}

impl FromStr for OrderPolicy {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "group" => Ok(Self::Group),
            "p_value" | "pvalue" | "p_adjust" => Ok(Self::PValue),
            "pathway_class" | "class" => Ok(Self::PathwayClass),
            "name" => Ok(Self::Name),
            other => Err(DaaError::invalid(format!(
                "unknown order '{}' (expected group, p_value, pathway_class or name)",
                other
            ))),
        }
    }
}
