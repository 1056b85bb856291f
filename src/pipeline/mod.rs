//! Configured end-to-end runs.

mod config;
mod runner;

pub use config::PipelineConfig;
pub use runner::{Pipeline, PipelineOutput};
