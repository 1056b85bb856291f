//! Multiple testing correction methods.

mod adjust;

pub use adjust::{adjust_pvalues, n_significant, AdjustMethod};
