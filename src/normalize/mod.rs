//! Normalization methods for compositional count data.
//!
//! - **CLR**: Centered log-ratio transformation (compositional)
//! - **TSS**: Total sum scaling / relative abundance
//! - **TMM**: Trimmed mean of M-values (edgeR, limma-voom)
//! - **CSS**: Cumulative sum scaling (metagenomeSeq)
//! - **Size factors**: Median-of-ratios (DESeq2)

pub mod clr;
pub mod css;
pub mod size_factors;
pub mod tmm;
pub mod tss;

pub use clr::{clr_vector, norm_clr};
pub use css::{css_factors, css_percentile, norm_css};
pub use size_factors::size_factors;
pub use tmm::{effective_library_sizes, log_cpm, tmm_factors, tmm_factors_with_config, TmmConfig};
pub use tss::{group_mean_sd, norm_tss};
