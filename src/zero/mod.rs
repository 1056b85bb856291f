//! Zero handling strategies.

pub mod pseudocount;

pub use pseudocount::{add_pseudocount, add_pseudocount_adaptive, adaptive_pseudocount};
