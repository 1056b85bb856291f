//! Statistical hypothesis testing for differential abundance.

pub mod ebayes;

pub use ebayes::{moderated_t, squeeze_var, ModeratedTResult, ModeratedTSingle, SqueezedVariances};
pub use lrt::{chi_squared_pvalue, test_lrt_nb, test_lrt_nb_fitted, LrtResult, LrtResultSingle};
pub use rank::{kruskal_wallis, wilcoxon_rank_sum, RankTestResult};
pub use ttest::{one_way_anova, welch_t_test, AnovaResult, TTestResult};
pub use wald::{t_pvalue, test_wald, test_wald_nb, z_pvalue, WaldResult, WaldResultSingle};
