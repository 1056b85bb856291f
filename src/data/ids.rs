//! Typed feature identifiers.
//!
//! Gene-family tables (KO, EC) and pathway tables (KEGG, MetaCyc) share the
//! same on-disk layout, so the identifier type is what tells them apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Which level of the functional hierarchy a table is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Gene families such as KEGG orthologs or EC numbers.
    GeneFamily,
    /// Higher-level pathways.
    Pathway,
}

impl FeatureKind {
    /// Get the descriptive name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::GeneFamily => "gene_family",
            Self::Pathway => "pathway",
        }
    }
}

/// Identifier of a row in an [`AbundanceTable`](crate::data::AbundanceTable).
pub trait FeatureId:
    Clone + Eq + Ord + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Level of the hierarchy this identifier belongs to.
    const KIND: FeatureKind;

    /// Wrap a raw identifier.
    fn new(id: impl Into<String>) -> Self;

    /// The raw identifier.
    fn as_str(&self) -> &str;
}

macro_rules! feature_id {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl FeatureId for $name {
            const KIND: FeatureKind = $kind;

            fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

feature_id!(
    /// A gene-family identifier (e.g. `K00001`, `EC:1.1.1.1`).
    GeneFamilyId,
    FeatureKind::GeneFamily
);

feature_id!(
    /// A pathway identifier (e.g. `ko00010`, `PWY-7219`).
    PathwayId,
    FeatureKind::Pathway
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(GeneFamilyId::KIND, FeatureKind::GeneFamily);
        assert_eq!(PathwayId::KIND, FeatureKind::Pathway);
    }

    #[test]
    fn test_display_and_ordering() {
        let mut ids = vec![PathwayId::from("ko00020"), PathwayId::from("ko00010")];
        ids.sort();
        assert_eq!(ids[0].to_string(), "ko00010");
        assert_eq!(ids[1].as_str(), "ko00020");
    }

    #[test]
    fn test_serde_transparent() {
        let id = GeneFamilyId::from("K00001");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"K00001\"");
    }
}
