//! Bundled pathway reference and identifier canonicalization.

use crate::error::{DaaError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use std::sync::OnceLock;

const BUNDLED_REFERENCE: &str = include_str!("../../assets/pathway_reference.tsv");

/// Identifier namespace of the features being annotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathwayType {
    /// KEGG orthologs (`K00844`).
    Ko,
    /// Enzyme commission numbers (`EC:2.7.1.1`).
    Ec,
    /// MetaCyc pathways (`PWY-7219`).
    #[serde(rename = "metacyc", alias = "meta_cyc")]
    MetaCyc,
    /// KEGG pathways (`ko00010`).
    KeggPathway,
}

impl PathwayType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ko => "ko",
            Self::Ec => "ec",
            Self::MetaCyc => "metacyc",
            Self::KeggPathway => "kegg_pathway",
        }
    }

    /// Namespace actually looked up; converted KO tables hold KEGG pathways.
    pub fn resolve(self, ko_to_kegg: bool) -> Self {
        if ko_to_kegg {
            Self::KeggPathway
        } else {
            self
        }
    }

    /// Canonical form of `id` in this namespace, or `None` when it does
    /// not look like an identifier of this type.
    pub fn canonical_id(&self, id: &str) -> Option<String> {
        let id = id.trim();
        let patterns = patterns()?;
        match self {
            Self::Ko => patterns
                .ko
                .captures(id)
                .map(|c| format!("K{}", &c[1])),
            Self::Ec => patterns
                .ec
                .captures(id)
                .map(|c| format!("EC:{}", &c[1])),
            Self::KeggPathway => patterns
                .kegg_pathway
                .captures(id)
                .map(|c| format!("ko{}", &c[1])),
            Self::MetaCyc => (!id.is_empty()).then(|| id.to_string()),
        }
    }
}

impl fmt::Display for PathwayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PathwayType {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "ko" => Ok(Self::Ko),
            "ec" => Ok(Self::Ec),
            "metacyc" | "meta_cyc" => Ok(Self::MetaCyc),
            "kegg_pathway" | "kegg" | "pathway" => Ok(Self::KeggPathway),
            other => Err(DaaError::invalid(format!(
                "unknown pathway type '{}' (expected KO, EC, MetaCyc or KEGG)",
                other
            ))),
        }
    }
}

struct IdPatterns {
    ko: Regex,
    ec: Regex,
    kegg_pathway: Regex,
}

fn patterns() -> Option<&'static IdPatterns> {
    static PATTERNS: OnceLock<Option<IdPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(IdPatterns {
                ko: Regex::new(r"^(?i:ko:)?K(\d{5})$").ok()?,
                ec: Regex::new(r"^(?i:ec[: ])?(\d+\.(?:\d+|-)\.(?:\d+|-)\.(?:n?\d+|-))$").ok()?,
                kegg_pathway: Regex::new(r"^(?:path:)?(?:map|ko)(\d{5})$").ok()?,
            })
        })
        .as_ref()
}

/// Name, description and class of one pathway or gene family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathwayInfo {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub class: Option<String>,
}

/// Static lookup table keyed by namespace and canonical ID.
#[derive(Debug, Clone, Default)]
pub struct ReferenceTable {
    entries: HashMap<(PathwayType, String), PathwayInfo>,
}

impl ReferenceTable {
    /// The reference shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_reader(BUNDLED_REFERENCE.as_bytes())
    }

    /// Read `type<TAB>id<TAB>name<TAB>description<TAB>class` rows.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .quoting(false)
            .from_reader(reader);

        let mut table = Self::default();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            if record.len() < 3 {
                return Err(DaaError::invalid(format!(
                    "reference line {} has {} fields, expected at least type, id and name",
                    line + 1,
                    record.len()
                )));
            }
            let kind: PathwayType = record[0].parse()?;
            let id = kind
                .canonical_id(&record[1])
                .unwrap_or_else(|| record[1].trim().to_string());
            let field = |i: usize| {
                record
                    .get(i)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
            };
            table.insert(
                kind,
                PathwayInfo {
                    id,
                    name: field(2),
                    description: field(3),
                    class: field(4),
                },
            );
        }
        Ok(table)
    }

    pub fn insert(&mut self, kind: PathwayType, info: PathwayInfo) {
        self.entries.insert((kind, info.id.clone()), info);
    }

    pub fn get(&self, kind: PathwayType, id: &str) -> Option<&PathwayInfo> {
        let key = kind.canonical_id(id)?;
        self.entries.get(&(kind, key))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
