//! P-value adjustment for multiple comparisons.
//!
//! Implements the family-wise (Holm, Hochberg, Hommel, Bonferroni) and
//! false discovery rate (Benjamini-Hochberg, Benjamini-Yekutieli) corrections.
//! Non-finite p-values pass through unchanged and do not count towards the
//! number of tests.

use crate::error::{DaaError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Multiple-testing correction method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AdjustMethod {
    #[serde(rename = "holm")]
    Holm,
    #[serde(rename = "hochberg")]
    Hochberg,
    #[serde(rename = "hommel")]
    Hommel,
    #[serde(rename = "bonferroni")]
    Bonferroni,
    /// Benjamini-Hochberg false discovery rate.
    #[default]
    #[serde(rename = "BH", alias = "fdr", alias = "bh")]
    BH,
    /// Benjamini-Yekutieli, valid under arbitrary dependence.
    #[serde(rename = "BY", alias = "by")]
    BY,
    #[serde(rename = "none")]
    None,
}

impl AdjustMethod {
    pub const ALL: [AdjustMethod; 7] = [
        Self::Holm,
        Self::Hochberg,
        Self::Hommel,
        Self::Bonferroni,
        Self::BH,
        Self::BY,
        Self::None,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Holm => "holm",
            Self::Hochberg => "hochberg",
            Self::Hommel => "hommel",
            Self::Bonferroni => "bonferroni",
            Self::BH => "BH",
            Self::BY => "BY",
            Self::None => "none",
        }
    }
}

impl fmt::Display for AdjustMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AdjustMethod {
    type Err = DaaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holm" => Ok(Self::Holm),
            "hochberg" => Ok(Self::Hochberg),
            "hommel" => Ok(Self::Hommel),
            "bonferroni" => Ok(Self::Bonferroni),
            "bh" | "fdr" => Ok(Self::BH),
            "by" => Ok(Self::BY),
            "none" => Ok(Self::None),
            other => Err(DaaError::invalid(format!(
                "unknown p-value adjustment '{}' \
                 (expected one of holm, hochberg, hommel, bonferroni, BH, BY, fdr, none)",
                other
            ))),
        }
    }
}

/// Adjust p-values with the given method, preserving input order.
pub fn adjust_pvalues(p_values: &[f64], method: AdjustMethod) -> Vec<f64> {
    let finite: Vec<usize> = (0..p_values.len()).filter(|&i| p_values[i].is_finite()).collect();
    let p: Vec<f64> = finite.iter().map(|&i| p_values[i]).collect();

    let adjusted = match method {
        AdjustMethod::None => p.clone(),
        AdjustMethod::Bonferroni => {
            let n = p.len() as f64;
            p.iter().map(|&x| (n * x).min(1.0)).collect()
        }
        AdjustMethod::Holm => holm(&p),
        AdjustMethod::Hochberg => step_up(&p, |_, k, _| (k + 1) as f64),
        AdjustMethod::BH => step_up(&p, |n, _, rank| n as f64 / rank as f64),
        AdjustMethod::BY => {
            let q: f64 = (1..=p.len()).map(|k| 1.0 / k as f64).sum();
            step_up(&p, move |n, _, rank| q * n as f64 / rank as f64)
        }
        AdjustMethod::Hommel => hommel(&p),
    };

    let mut out = p_values.to_vec();
    for (&i, q) in finite.iter().zip(adjusted) {
        out[i] = q;
    }
    out
}

/// Number of adjusted p-values below `alpha`.
pub fn n_significant(p_adjust: &[f64], alpha: f64) -> usize {
    p_adjust.iter().filter(|&&q| q < alpha).count()
}

fn ascending(p: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..p.len()).collect();
    order.sort_by(|&a, &b| p[a].partial_cmp(&p[b]).unwrap_or(Ordering::Equal));
    order
}

fn holm(p: &[f64]) -> Vec<f64> {
    let n = p.len();
    let mut out = vec![0.0; n];
    let mut running = 0.0_f64;
    for (k, &i) in ascending(p).iter().enumerate() {
        running = running.max((n - k) as f64 * p[i]);
        out[i] = running.min(1.0);
    }
    out
}

/// Step-up procedure over p-values in decreasing order.
///
/// `multiplier(n, k, rank)` receives the number of tests, the position in
/// the decreasing order and the ascending rank (1-based).
fn step_up(p: &[f64], multiplier: impl Fn(usize, usize, usize) -> f64) -> Vec<f64> {
    let n = p.len();
    let mut order = ascending(p);
    order.reverse();
    let mut out = vec![0.0; n];
    let mut running = f64::INFINITY;
    for (k, &i) in order.iter().enumerate() {
        let rank = n - k;
        running = running.min(multiplier(n, k, rank) * p[i]);
        out[i] = running.min(1.0);
    }
    out
}

fn hommel(p: &[f64]) -> Vec<f64> {
    let n = p.len();
    if n <= 1 {
        return p.to_vec();
    }
    if n == 2 {
        return step_up(p, |_, k, _| (k + 1) as f64);
    }

    let order = ascending(p);
    let sorted: Vec<f64> = order.iter().map(|&i| p[i]).collect();

    let start = (0..n)
        .map(|i| n as f64 * sorted[i] / (i + 1) as f64)
        .fold(f64::INFINITY, f64::min);
    let mut q = vec![start; n];
    let mut pa = vec![start; n];

    for m in (2..n).rev() {
        let split = n - m + 1;
        let q1 = (split..n)
            .enumerate()
            .map(|(k, i)| m as f64 * sorted[i] / (k + 2) as f64)
            .fold(f64::INFINITY, f64::min);
        for i in 0..split {
            q[i] = (m as f64 * sorted[i]).min(q1);
        }
        let tail = q[split - 1];
        for qi in q.iter_mut().skip(split) {
            *qi = tail;
        }
        for (a, &b) in pa.iter_mut().zip(&q) {
            *a = a.max(b);
        }
    }

    let mut out = vec![0.0; n];
    for (k, &i) in order.iter().enumerate() {
        out[i] = pa[k].max(sorted[k]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const P: [f64; 6] = [0.01, 0.04, 0.03, 0.005, 0.2, 0.5];

    fn check(method: AdjustMethod, expected: [f64; 6]) {
        let adjusted = adjust_pvalues(&P, method);
        for (a, e) in adjusted.iter().zip(expected.iter()) {
            assert_relative_eq!(*a, *e, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_bonferroni() {
        check(AdjustMethod::Bonferroni, [0.06, 0.24, 0.18, 0.03, 1.0, 1.0]);
    }

    #[test]
    fn test_holm() {
        check(AdjustMethod::Holm, [0.05, 0.12, 0.12, 0.03, 0.4, 0.5]);
    }

    #[test]
    fn test_hochberg() {
        check(AdjustMethod::Hochberg, [0.05, 0.12, 0.12, 0.03, 0.4, 0.5]);
    }

    #[test]
    fn test_bh() {
        check(AdjustMethod::BH, [0.03, 0.06, 0.06, 0.03, 0.24, 0.5]);
    }

    #[test]
    fn test_by() {
        check(AdjustMethod::BY, [0.0735, 0.147, 0.147, 0.0735, 0.588, 1.0]);
    }

    #[test]
    fn test_hommel() {
        check(AdjustMethod::Hommel, [0.05, 0.12, 0.09, 0.03, 0.4, 0.5]);
        let two = adjust_pvalues(&[0.01, 0.04], AdjustMethod::Hommel);
        assert_relative_eq!(two[0], 0.02, epsilon = 1e-12);
        assert_relative_eq!(two[1], 0.04, epsilon = 1e-12);
    }

    #[test]
    fn test_none_and_empty() {
        check(AdjustMethod::None, P);
        assert!(adjust_pvalues(&[], AdjustMethod::BH).is_empty());
    }

    #[test]
    fn test_nan_passes_through() {
        let adjusted = adjust_pvalues(&[0.01, f64::NAN, 0.02], AdjustMethod::Bonferroni);
        assert_relative_eq!(adjusted[0], 0.02);
        assert!(adjusted[1].is_nan());
        assert_relative_eq!(adjusted[2], 0.04);
    }

    #[test]
    fn test_adjusted_never_below_raw() {
        for method in AdjustMethod::ALL {
            let adjusted = adjust_pvalues(&P, method);
            for (a, p) in adjusted.iter().zip(P.iter()) {
                assert!(*a >= *p - 1e-15, "{} lowered a p-value", method);
                assert!(*a <= 1.0);
            }
        }
    }

    #[test]
    fn test_parse() {
        assert_eq!("fdr".parse::<AdjustMethod>().unwrap(), AdjustMethod::BH);
        assert_eq!("BY".parse::<AdjustMethod>().unwrap(), AdjustMethod::BY);
        assert!("sidak".parse::<AdjustMethod>().is_err());
        let yaml: AdjustMethod = serde_yaml::from_str("fdr").unwrap();
        assert_eq!(yaml, AdjustMethod::BH);
    }
}
