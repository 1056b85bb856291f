//! Result types for differential abundance analysis.

use crate::correct::AdjustMethod;
use crate::data::FeatureKind;
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

/// Confidence level based on statistical evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// Very high confidence (q < 0.001)
    VeryHigh,
    /// High confidence (q < 0.01)
    High,
    /// Moderate confidence (q < 0.05)
    Moderate,
    /// Low confidence (q < 0.10)
    Low,
    /// Suggestive (q < 0.20)
    Suggestive,
    /// Not significant
    NotSignificant,
}

impl Confidence {
    /// Classify based on adjusted p-value.
    pub fn from_qvalue(q: f64) -> Self {
        if q < 0.001 {
            Self::VeryHigh
        } else if q < 0.01 {
            Self::High
        } else if q < 0.05 {
            Self::Moderate
        } else if q < 0.10 {
            Self::Low
        } else if q < 0.20 {
            Self::Suggestive
        } else {
            Self::NotSignificant
        }
    }

    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::VeryHigh => "very_high",
            Self::High => "high",
            Self::Moderate => "moderate",
            Self::Low => "low",
            Self::Suggestive => "suggestive",
            Self::NotSignificant => "not_significant",
        }
    }

    /// Check if significant at alpha = 0.05.
    pub fn is_significant(&self) -> bool {
        matches!(self, Self::VeryHigh | Self::High | Self::Moderate)
    }
}

/// One tested feature for one comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaaResult {
    /// Feature identifier.
    pub feature_id: String,
    /// Method label, including the sub-method (e.g. `ALDEx2_Welch's t test`).
    pub method: String,
    /// Reference level.
    pub group1: String,
    /// Compared level.
    pub group2: String,
    /// Effect size: log2 fold change or the method's native effect.
    pub estimate: Option<f64>,
    /// Test statistic, when the method reports one.
    pub statistic: Option<f64>,
    /// Raw p-value in [0, 1].
    pub p_value: f64,
    /// Adjusted p-value in [0, 1].
    pub p_adjust: f64,
    pub confidence: Confidence,
}

impl DaaResult {
    /// Create a new result; the confidence is derived from `p_adjust`.
    pub fn new(
        feature_id: impl Into<String>,
        method: impl Into<String>,
        group1: impl Into<String>,
        group2: impl Into<String>,
        estimate: Option<f64>,
        statistic: Option<f64>,
        p_value: f64,
        p_adjust: f64,
    ) -> Self {
        Self {
            feature_id: feature_id.into(),
            method: method.into(),
            group1: group1.into(),
            group2: group2.into(),
            estimate,
            statistic,
            p_value,
            p_adjust,
            confidence: Confidence::from_qvalue(p_adjust),
        }
    }

    /// Check if significant at the default threshold (q < 0.05).
    pub fn is_significant(&self) -> bool {
        self.confidence.is_significant()
    }

    /// Check if significant at a custom threshold.
    pub fn is_significant_at(&self, alpha: f64) -> bool {
        self.p_adjust < alpha
    }
}

/// A result annotated with pathway information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedResult {
    #[serde(flatten)]
    pub result: DaaResult,
    pub name: Option<String>,
    pub description: Option<String>,
    pub pathway_class: Option<String>,
}

impl AnnotatedResult {
    pub fn from_result(result: DaaResult) -> Self {
        Self {
            result,
            name: None,
            description: None,
            pathway_class: None,
        }
    }

    /// True once any annotation field has been filled.
    pub fn is_annotated(&self) -> bool {
        self.name.is_some() || self.description.is_some() || self.pathway_class.is_some()
    }
}

/// Normalized output of one differential abundance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaaResultSet {
    /// Level of the hierarchy the tested features belong to.
    pub feature_kind: FeatureKind,
    /// Correction used for `p_adjust`.
    pub adjust: AdjustMethod,
    pub results: Vec<DaaResult>,
}

impl DaaResultSet {
    pub fn new(feature_kind: FeatureKind, adjust: AdjustMethod, results: Vec<DaaResult>) -> Self {
        Self {
            feature_kind,
            adjust,
            results,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DaaResult> {
        self.results.iter()
    }

    /// Distinct method labels in order of first appearance.
    pub fn method_labels(&self) -> Vec<&str> {
        method_labels(self.results.iter().map(|r| r.method.as_str()))
    }

    /// Rows produced under one method label.
    pub fn for_method<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a DaaResult> + 'a {
        self.results.iter().filter(move |r| r.method == label)
    }

    /// Count significant results at various thresholds.
    pub fn summary(&self) -> ResultSummary {
        ResultSummary::from_p_adjust(self.results.iter().map(|r| r.p_adjust))
    }

    /// Write results to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_tsv(BufWriter::new(file))
    }

    pub fn write_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(writer, "{}", RESULT_COLUMNS.join("\t"))?;
        for r in &self.results {
            write_result_fields(&mut writer, r)?;
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read results written by [`DaaResultSet::write_tsv`].
    ///
    /// The adjusted p-values are taken as-is; `adjust` records how they
    /// were produced.
    pub fn from_tsv<P: AsRef<Path>>(
        path: P,
        feature_kind: FeatureKind,
        adjust: AdjustMethod,
    ) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, feature_kind, adjust)
    }

    pub fn from_reader<R: Read>(
        reader: R,
        feature_kind: FeatureKind,
        adjust: AdjustMethod,
    ) -> Result<Self> {
        let rows = read_rows(reader)?;
        let results = rows.into_iter().map(|row| row.result).collect();
        Ok(Self::new(feature_kind, adjust, results))
    }
}

/// Annotated output of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedResultSet {
    pub feature_kind: FeatureKind,
    pub adjust: AdjustMethod,
    pub results: Vec<AnnotatedResult>,
}

impl AnnotatedResultSet {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AnnotatedResult> {
        self.results.iter()
    }

    pub fn method_labels(&self) -> Vec<&str> {
        method_labels(self.results.iter().map(|r| r.result.method.as_str()))
    }

    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_tsv(BufWriter::new(file))
    }

    pub fn write_tsv<W: Write>(&self, mut writer: W) -> Result<()> {
        writeln!(
            writer,
            "{}\t{}",
            RESULT_COLUMNS.join("\t"),
            ANNOTATION_COLUMNS.join("\t")
        )?;
        for r in &self.results {
            write_result_fields(&mut writer, &r.result)?;
            for field in [&r.name, &r.description, &r.pathway_class] {
                write!(writer, "\t{}", field.as_deref().map(sanitize).unwrap_or_default())?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a results TSV, with or without annotation columns.
    pub fn from_tsv<P: AsRef<Path>>(
        path: P,
        feature_kind: FeatureKind,
        adjust: AdjustMethod,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let rows = read_rows(file)?;
        let results = rows
            .into_iter()
            .map(|row| AnnotatedResult {
                result: row.result,
                name: row.name,
                description: row.description,
                pathway_class: row.pathway_class,
            })
            .collect();
        Ok(Self {
            feature_kind,
            adjust,
            results,
        })
    }
}

/// Summary statistics for a result set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub significant_001: usize,
    pub significant_01: usize,
    pub significant_05: usize,
    pub significant_10: usize,
}

impl ResultSummary {
    fn from_p_adjust(values: impl Iterator<Item = f64> + Clone) -> Self {
        let below = |alpha: f64| values.clone().filter(|&q| q < alpha).count();
        Self {
            total: values.clone().count(),
            significant_001: below(0.001),
            significant_01: below(0.01),
            significant_05: below(0.05),
            significant_10: below(0.10),
        }
    }
}

impl std::fmt::Display for ResultSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Total features tested: {}", self.total)?;
        writeln!(f, "Significant at q < 0.001: {}", self.significant_001)?;
        writeln!(f, "Significant at q < 0.01:  {}", self.significant_01)?;
        writeln!(f, "Significant at q < 0.05:  {}", self.significant_05)?;
        writeln!(f, "Significant at q < 0.10:  {}", self.significant_10)?;
        Ok(())
    }
}

const RESULT_COLUMNS: [&str; 9] = [
    "feature_id",
    "method",
    "group1",
    "group2",
    "estimate",
    "statistic",
    "p_value",
    "p_adjust",
    "confidence",
];

const ANNOTATION_COLUMNS: [&str; 3] = ["pathway_name", "pathway_description", "pathway_class"];

fn method_labels<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = Vec::new();
    for label in labels {
        if !seen.contains(&label) {
            seen.push(label);
        }
    }
    seen
}

fn write_result_fields<W: Write>(writer: &mut W, r: &DaaResult) -> Result<()> {
    write!(
        writer,
        "{}\t{}\t{}\t{}\t{}\t{}\t{:e}\t{:e}\t{}",
        r.feature_id,
        r.method,
        r.group1,
        r.group2,
        format_optional(r.estimate),
        format_optional(r.statistic),
        r.p_value,
        r.p_adjust,
        r.confidence.name()
    )?;
    Ok(())
}

fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.6}", v),
        _ => "NA".to_string(),
    }
}

fn sanitize(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

struct ParsedRow {
    result: DaaResult,
    name: Option<String>,
    description: Option<String>,
    pathway_class: Option<String>,
}

fn read_rows<R: Read>(reader: R) -> Result<Vec<ParsedRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let index: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
    let required = |name: &str| {
        index
            .get(name)
            .copied()
            .ok_or_else(|| {
                DaaError::invalid(format!("results file is missing the '{}' column", name))
            })
    };
    let feature_col = required("feature_id")?;
    let method_col = required("method")?;
    let group1_col = required("group1")?;
    let group2_col = required("group2")?;
    let p_col = required("p_value")?;
    let q_col = required("p_adjust")?;
    let estimate_col = index.get("estimate").copied();
    let statistic_col = index.get("statistic").copied();
    let name_col = index.get("pathway_name").copied();
    let description_col = index.get("pathway_description").copied();
    let class_col = index.get("pathway_class").copied();

    let mut rows = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record?;
        let text = |col: usize| record.get(col).unwrap_or("").trim();
        let optional_text = |col: Option<usize>| {
            col.map(text)
                .filter(|s| !s.is_empty() && *s != "NA")
                .map(String::from)
        };
        let optional_number =
            |col: Option<usize>| optional_text(col).and_then(|s| s.parse::<f64>().ok());
        let probability = |col: usize, what: &str| -> Result<f64> {
            text(col)
                .parse::<f64>()
                .ok()
                .filter(|p| (0.0..=1.0).contains(p))
                .ok_or_else(|| {
                    DaaError::invalid(format!(
                        "invalid {} '{}' on results row {}",
                        what,
                        text(col),
                        line + 1
                    ))
                })
        };

        let result = DaaResult::new(
            text(feature_col),
            text(method_col),
            text(group1_col),
            text(group2_col),
            optional_number(estimate_col),
            optional_number(statistic_col),
            probability(p_col, "p_value")?,
            probability(q_col, "p_adjust")?,
        );
        rows.push(ParsedRow {
            result,
            name: optional_text(name_col),
            description: optional_text(description_col),
            pathway_class: optional_text(class_col),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::NamedTempFile;

    fn sample_set() -> DaaResultSet {
        DaaResultSet::new(
            FeatureKind::Pathway,
            AdjustMethod::BH,
            vec![
                DaaResult::new(
                    "ko00010",
                    "DESeq2",
                    "control",
                    "treated",
                    Some(1.2),
                    Some(3.1),
                    0.0001,
                    0.0005,
                ),
                DaaResult::new(
                    "ko00020",
                    "DESeq2",
                    "control",
                    "treated",
                    Some(-0.4),
                    Some(-1.0),
                    0.01,
                    0.02,
                ),
                DaaResult::new("ko00030", "DESeq2", "control", "treated", None, None, 0.1, 0.15),
                DaaResult::new(
                    "ko00040",
                    "DESeq2",
                    "control",
                    "treated",
                    Some(0.1),
                    Some(0.2),
                    0.5,
                    0.6,
                ),
            ],
        )
    }

    #[test]
    fn test_confidence() {
        assert_eq!(Confidence::from_qvalue(0.0005), Confidence::VeryHigh);
        assert_eq!(Confidence::from_qvalue(0.005), Confidence::High);
        assert_eq!(Confidence::from_qvalue(0.03), Confidence::Moderate);
        assert_eq!(Confidence::from_qvalue(0.08), Confidence::Low);
        assert_eq!(Confidence::from_qvalue(0.15), Confidence::Suggestive);
        assert_eq!(Confidence::from_qvalue(0.30), Confidence::NotSignificant);
    }

    #[test]
    fn test_result_set_summary() {
        let summary = sample_set().summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.significant_001, 1);
        assert_eq!(summary.significant_05, 2);
        assert_eq!(summary.significant_10, 2);
    }

    #[test]
    fn test_tsv_roundtrip_keeps_missing_estimates() {
        let set = sample_set();
        let file = NamedTempFile::new().unwrap();
        set.to_tsv(file.path()).unwrap();

        let loaded =
            DaaResultSet::from_tsv(file.path(), FeatureKind::Pathway, AdjustMethod::BH).unwrap();
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.results[2].estimate, None);
        assert_eq!(loaded.results[0].feature_id, "ko00010");
        assert!((loaded.results[1].p_adjust - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_annotated_tsv_reads_annotation_columns() {
        let tsv = "feature_id\tmethod\tgroup1\tgroup2\tp_value\tp_adjust\t\
                   pathway_name\tpathway_description\tpathway_class\n\
                   ko00010\tLinDA\tA\tB\t0.01\t0.02\tGlycolysis\t\tMetabolism\n";
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), tsv).unwrap();
        let set = AnnotatedResultSet::from_tsv(
            file.path(),
            FeatureKind::Pathway,
            AdjustMethod::BH,
        )
        .unwrap();
        assert_eq!(set.results[0].name.as_deref(), Some("Glycolysis"));
        assert_eq!(set.results[0].description, None);
        assert_eq!(set.results[0].pathway_class.as_deref(), Some("Metabolism"));
    }

    #[test]
    fn test_rejects_out_of_range_p_values() {
        let tsv =
            "feature_id\tmethod\tgroup1\tgroup2\tp_value\tp_adjust\nK1\tLinDA\tA\tB\t1.5\t1\n";
        let result =
            DaaResultSet::from_reader(Cursor::new(tsv), FeatureKind::GeneFamily, AdjustMethod::BH);
        assert!(matches!(result, Err(DaaError::InvalidInput(_))));
    }

    #[test]
    fn test_method_labels_in_first_appearance_order() {
        let mut set = sample_set();
        set.results[1].method = "ALDEx2_Wilcoxon rank test".into();
        assert_eq!(set.method_labels(), vec!["DESeq2", "ALDEx2_Wilcoxon rank test"]);
    }
}
