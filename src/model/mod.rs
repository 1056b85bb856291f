//! Statistical models for differential abundance analysis.

pub mod dispersion;
pub mod lm;
pub mod nb;

pub use dispersion::{
    common_dispersion, fit_dispersion_trend, gene_wise_dispersions, shrink_dispersions,
    tagwise_dispersions, DispersionTrend,
};
pub use lm::{model_lm, model_lm_weighted, LmFit, LmFitSingle};
pub use nb::{model_nb, nb_deviance, nb_log_likelihood, Dispersion, NbFit, NbFitSingle};
