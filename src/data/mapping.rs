//! Gene family to pathway membership.

use crate::data::{FeatureId, GeneFamilyId, PathwayId};
use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUNDLED_KO_TO_KEGG: &str = include_str!("../../assets/ko_to_kegg.tsv");

/// Layout of a mapping TSV. Mapping files have no header; `#` lines are comments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingFormat {
    /// `gene_family<TAB>pathway`, one membership per line.
    #[default]
    Pairs,
    /// `pathway<TAB>member<TAB>member...`, one pathway per line.
    Wide,
}

/// Many-to-many mapping from gene families to the pathways they belong to.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    pathways: BTreeMap<GeneFamilyId, Vec<PathwayId>>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapping from `(gene_family, pathway)` pairs.
    pub fn from_pairs<G, P>(pairs: impl IntoIterator<Item = (G, P)>) -> Self
    where
        G: Into<String>,
        P: Into<String>,
    {
        let mut table = Self::new();
        for (family, pathway) in pairs {
            table.insert(GeneFamilyId::new(family), PathwayId::new(pathway));
        }
        table
    }

    /// Record that `family` is a member of `pathway`. Duplicates are ignored.
    pub fn insert(&mut self, family: GeneFamilyId, pathway: PathwayId) {
        let members = self.pathways.entry(family).or_default();
        if let Err(pos) = members.binary_search(&pathway) {
            members.insert(pos, pathway);
        }
    }

    /// Load a mapping from a TSV file.
    pub fn from_tsv<P: AsRef<Path>>(path: P, format: MappingFormat) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, format)
    }

    pub fn from_reader<R: Read>(reader: R, format: MappingFormat) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .comment(Some(b'#'))
            .quoting(false)
            .from_reader(reader);

        let mut table = Self::new();
        for (line, record) in rdr.records().enumerate() {
            let record = record?;
            let fields: Vec<&str> =
                record.iter().map(str::trim).filter(|f| !f.is_empty()).collect();
            if fields.is_empty() {
                continue;
            }
            match format {
                MappingFormat::Pairs => {
                    if fields.len() != 2 {
                        return Err(DaaError::invalid(format!(
                            "mapping line {} has {} fields, expected gene_family and pathway",
                            line + 1,
                            fields.len()
                        )));
                    }
                    table.insert(GeneFamilyId::new(fields[0]), PathwayId::new(fields[1]));
                }
                MappingFormat::Wide => {
                    let pathway = PathwayId::new(fields[0]);
                    for member in &fields[1..] {
                        table.insert(GeneFamilyId::new(*member), pathway.clone());
                    }
                }
            }
        }

        if table.is_empty() {
            return Err(DaaError::invalid("mapping table contains no memberships"));
        }
        Ok(table)
    }

    /// The KO to KEGG pathway table shipped with the crate.
    pub fn bundled_ko_to_kegg() -> Result<Self> {
        Self::from_reader(BUNDLED_KO_TO_KEGG.as_bytes(), MappingFormat::Wide)
    }

    /// Pathways a gene family belongs to, sorted by ID.
    pub fn pathways_for(&self, family: &GeneFamilyId) -> &[PathwayId] {
        self.pathways.get(family).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Gene families that are members of `pathway`.
    pub fn members(&self, pathway: &PathwayId) -> Vec<&GeneFamilyId> {
        self.pathways
            .iter()
            .filter(|(_, pathways)| pathways.binary_search(pathway).is_ok())
            .map(|(family, _)| family)
            .collect()
    }

    pub fn n_gene_families(&self) -> usize {
        self.pathways.len()
    }

    /// Number of distinct pathways.
    pub fn n_pathways(&self) -> usize {
        let mut all: Vec<&PathwayId> = self.pathways.values().flatten().collect();
        all.sort();
        all.dedup();
        all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pathways.is_empty()
    }
}
