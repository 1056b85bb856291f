//! Differential abundance analysis for predicted functional profiles
//!
//! This library takes gene-family or pathway abundance tables (for example
//! PICRUSt2 output), tests them for differential abundance with one of
//! eight methods, joins the results with pathway annotation and lays out
//! charts of the findings.
//!
//! # Overview
//!
//! - **data**: Abundance tables, metadata, mappings and result sets
//! - **convert**: Gene family to pathway aggregation
//! - **dispatch**: Method registry, input validation and backend invocation
//! - **results**: Normalization of backend output into one schema
//! - **correct**: Multiple testing correction
//! - **annotate**: Bundled reference and KEGG REST lookups
//! - **plot**: Error-bar, heatmap and PCA charts
//! - **pipeline**: YAML-configured end-to-end runs
//!
//! The statistical building blocks (**zero**, **normalize**, **model**,
//! **test**, **stats**) back the method adapters.
//!
//! # Example
//!
//! ```no_run
//! use pathway_daa::prelude::*;
//!
//! let abundance = AbundanceTable::<PathwayId>::from_tsv("pathways.tsv").unwrap();
//! let metadata = Metadata::from_tsv("metadata.tsv").unwrap();
//!
//! let request = DaaRequest::new("Environment", DaaMethod::Linda).reference("Pro-survival");
//! let results = run_daa(&request, &abundance, &metadata).unwrap();
//!
//! let joiner = AnnotationJoiner::new().unwrap();
//! let (annotated, _warnings) = joiner.annotate_set(&results, PathwayType::KeggPathway, false);
//! annotated.to_tsv("results.tsv").unwrap();
//! ```

pub mod annotate;
pub mod convert;
pub mod correct;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod plot;
pub mod results;
pub mod stats;
pub mod test;
pub mod zero;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::annotate::{
        AnnotationJoiner, AnnotationSource, AnnotationWarning, KeggRest, PathwayType,
    };
    pub use crate::convert::{convert_to_pathway, Conversion, UnmappedFeatures};
    pub use crate::correct::{adjust_pvalues, AdjustMethod};
    pub use crate::data::{
        AbundanceTable, AnnotatedResult, AnnotatedResultSet, DaaResult, DaaResultSet, FeatureId,
        FeatureKind, GeneFamilyId, MappingFormat, MappingTable, Metadata, PathwayId,
    };
    pub use crate::dispatch::{
        run_daa, run_method, DaaMethod, DaaRequest, MethodOptions, MethodRegistry, RawRecord,
    };
    pub use crate::error::{DaaError, Result};
    pub use crate::pipeline::{Pipeline, PipelineConfig, PipelineOutput};
    pub use crate::plot::{
        pathway_errorbar, pathway_heatmap, pathway_pca, Chart, ErrorBarOptions, HeatmapOptions,
        OrderPolicy, PlotStyle,
    };
    pub use crate::results::{normalize_results, summarize, MethodSummary};
}
