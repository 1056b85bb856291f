//! Result normalization: one schema, one adjustment, one ordering for the
//! output of every backend.

mod normalizer;

pub use normalizer::{normalize_results, summarize, MethodSummary};
