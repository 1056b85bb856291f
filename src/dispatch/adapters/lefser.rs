//! lefser (LEfSe): Kruskal-Wallis screening followed by a linear
//! discriminant effect size on relative abundances.

use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::{DaaError, Result};
use crate::normalize::norm_tss;
use crate::stats::mean;
use crate::test::kruskal_wallis;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Relative abundances are scaled to this total per sample.
const RELATIVE_SCALE: f64 = 1e6;

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::Lefser,
    orientation: Orientation::FeaturesBySamples,
    encoding: InputEncoding::RelativePerMillion,
    covariates: CovariateEncoding::Unsupported,
    needs_baseline: false,
    max_levels: Some(2),
    sub_methods: &[],
    prepare,
    invoke,
    collect,
};

/// One row of `lefser(...)`: a feature passing both cut-offs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LefserRow {
    pub feature_id: String,
    /// Signed LDA score; positive when higher in `group2`.
    pub score: f64,
    pub kw_statistic: f64,
    pub kw_p_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LefserOutput {
    pub group1: String,
    pub group2: String,
    pub rows: Vec<LefserRow>,
}

fn prepare(input: &ValidatedInput, _options: &MethodOptions) -> Result<PreparedInput> {
    Ok(PreparedInput::from_validated(
        input,
        ADAPTER.orientation,
        ADAPTER.covariates,
        |m: &DMatrix<f64>| norm_tss(m, RELATIVE_SCALE),
    ))
}

fn invoke(prepared: &PreparedInput, options: &MethodOptions) -> Result<BackendOutput> {
    let data = &prepared.data;
    let groups = prepared.level_indices();
    if groups.len() != 2 {
        return Err(DaaError::invalid(format!(
            "Lefser needs exactly two group levels, found {}",
            groups.len()
        )));
    }

    // Kruskal-Wallis screen
    let mut screened = Vec::new();
    for i in 0..data.nrows() {
        let values: Vec<Vec<f64>> = groups
            .iter()
            .map(|cols| cols.iter().map(|&j| data[(i, j)]).collect())
            .collect();
        let kw = kruskal_wallis(&values);
        if kw.p_value.is_finite() && kw.p_value < options.kruskal_threshold {
            screened.push((i, kw));
        }
    }
    if screened.is_empty() {
        return Err(DaaError::method(
            ADAPTER.method.name(),
            format!("no feature passes the Kruskal-Wallis cut-off {}", options.kruskal_threshold),
        ));
    }
    log::debug!(
        "Lefser: {} of {} features pass the Kruskal-Wallis screen",
        screened.len(),
        data.nrows()
    );

    let rows_idx: Vec<usize> = screened.iter().map(|(i, _)| *i).collect();
    let scores = lda_scores(data, &rows_idx, &groups[0], &groups[1])?;

    let rows: Vec<LefserRow> = screened
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| score.abs() >= options.lda_threshold)
        .map(|((i, kw), score)| LefserRow {
            feature_id: prepared.feature_ids[i].clone(),
            score,
            kw_statistic: kw.statistic,
            kw_p_value: kw.p_value,
        })
        .collect();
    if rows.is_empty() {
        return Err(DaaError::method(
            ADAPTER.method.name(),
            format!("no feature reaches an LDA score of {}", options.lda_threshold),
        ));
    }

    Ok(BackendOutput::Lefser(LefserOutput {
        group1: prepared.levels[0].clone(),
        group2: prepared.levels[1].clone(),
        rows,
    }))
}

/// Signed `log10(1 + (|mean difference| + |discriminant coefficient|) / 2)`
/// for every feature in `rows`.
fn lda_scores(
    data: &DMatrix<f64>,
    rows: &[usize],
    first: &[usize],
    second: &[usize],
) -> Result<Vec<f64>> {
    let p = rows.len();
    let group_mean = |cols: &[usize]| {
        DVector::from_iterator(
            p,
            rows.iter()
                .map(|&i| mean(&cols.iter().map(|&j| data[(i, j)]).collect::<Vec<_>>())),
        )
    };
    let m1 = group_mean(first);
    let m2 = group_mean(second);
    let diff = &m2 - &m1;

    // pooled within-group scatter
    let mut within = DMatrix::<f64>::zeros(p, p);
    for (cols, m) in [(first, &m1), (second, &m2)] {
        for &j in cols {
            let x = DVector::from_iterator(p, rows.iter().map(|&i| data[(i, j)]));
            let d = x - m;
            within += &d * d.transpose();
        }
    }
    let dof = (first.len() + second.len()).saturating_sub(2).max(1) as f64;
    within /= dof;
    let ridge = (within.trace() / p as f64).max(1.0) * 1e-6;
    for k in 0..p {
        within[(k, k)] += ridge;
    }

    let inverse = within
        .try_inverse()
        .ok_or_else(|| {
            DaaError::method(ADAPTER.method.name(), "within-group scatter is singular")
        })?;
    let direction = inverse * &diff;
    let norm = direction.norm();
    if !(norm > 0.0 && norm.is_finite()) {
        return Err(DaaError::method(ADAPTER.method.name(), "discriminant direction is degenerate"));
    }
    let unit = direction / norm;
    let effect = unit.dot(&diff).abs();

    Ok((0..p)
        .map(|k| {
            let coeff = unit[k].abs() * effect;
            let magnitude = (diff[k].abs() + coeff) / 2.0;
            let sign = if diff[k] < 0.0 { -1.0 } else { 1.0 };
            sign * (1.0 + magnitude).log10()
        })
        .collect())
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    let output = match output {
        BackendOutput::Lefser(o) => o,
        other => return Err(other.mismatch(DaaMethod::Lefser)),
    };
    Ok(output
        .rows
        .into_iter()
        .map(|r| RawRecord {
            feature_id: r.feature_id,
            method: ADAPTER.method.name().to_string(),
            group1: output.group1.clone(),
            group2: output.group2.clone(),
            estimate: Some(r.score),
            statistic: Some(r.kw_statistic),
            p_value: r.kw_p_value,
            p_adjust: None,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::adapters::fixtures;
    use approx::assert_relative_eq;

    #[test]
    fn test_relative_per_million() {
        let prepared = fixtures::prepared(&ADAPTER);
        for j in 0..prepared.data.ncols() {
            assert_relative_eq!(prepared.data.column(j).sum(), 1e6, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_scores_signed_by_direction() {
        let prepared = fixtures::prepared(&ADAPTER);
        let output = match invoke(&prepared, &MethodOptions::default()).unwrap() {
            BackendOutput::Lefser(o) => o,
            other => panic!("unexpected output {:?}", other.method()),
        };
        assert_eq!(output.group2, "treated");
        let up = output.rows.iter().find(|r| r.feature_id == "ko00010").unwrap();
        assert!(up.score > 2.0, "{:?}", up);
        assert!(up.kw_p_value < 0.05);
        // relative share of an unchanged feature drops as two others grow
        let diluted = output.rows.iter().find(|r| r.feature_id == "ko00060").unwrap();
        assert!(diluted.score < -2.0, "{:?}", diluted);
    }

    #[test]
    fn test_strict_threshold_fails() {
        let prepared = fixtures::prepared(&ADAPTER);
        let options = MethodOptions {
            lda_threshold: 10.0,
            ..Default::default()
        };
        assert!(matches!(
            invoke(&prepared, &options),
            Err(DaaError::MethodFailure { .. })
        ));
    }

    #[test]
    fn test_collect_keeps_only_reported_rows() {
        let output = LefserOutput {
            group1: "a".into(),
            group2: "b".into(),
            rows: vec![LefserRow {
                feature_id: "ko00010".into(),
                score: 3.1,
                kw_statistic: 5.3,
                kw_p_value: 0.02,
            }],
        };
        let records = collect(BackendOutput::Lefser(output)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].estimate, Some(3.1));
        assert_eq!(records[0].p_adjust, None);
    }
}
