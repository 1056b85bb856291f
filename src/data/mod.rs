//! Data structures for differential abundance analysis.

mod abundance;
mod design_matrix;
mod ids;
mod mapping;
mod metadata;
mod result;

pub(crate) use abundance::preview;
pub use abundance::AbundanceTable;
pub use design_matrix::DesignMatrix;
pub use ids::{FeatureId, FeatureKind, GeneFamilyId, PathwayId};
pub use mapping::{MappingFormat, MappingTable};
pub use metadata::{Metadata, Variable, VariableType};
pub use result::{
    AnnotatedResult, AnnotatedResultSet, Confidence, DaaResult, DaaResultSet, ResultSummary,
};
