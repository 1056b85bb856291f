//! ALDEx2: Dirichlet Monte-Carlo instances of the CLR-transformed counts.
//!
//! Each instance draws per-sample proportions from `Dirichlet(counts + 0.5)`
//! and takes the log2 centered log-ratio. Tests run on every instance and
//! the reported p-values are the expected values over instances, together
//! with the expected Benjamini-Hochberg value.

use crate::dispatch::adapters::{bh, round_counts};
use crate::dispatch::registry::{
    BackendOutput, CovariateEncoding, InputEncoding, MethodAdapter, Orientation, PreparedInput,
    RawRecord,
};
use crate::dispatch::request::{DaaMethod, MethodOptions};
use crate::dispatch::validate::ValidatedInput;
use crate::error::{DaaError, Result};
use crate::stats::{mean, median, sd};
use crate::test::{kruskal_wallis, one_way_anova, welch_t_test, wilcoxon_rank_sum};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Dirichlet, Distribution};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Dirichlet prior added to every count.
const PRIOR: f64 = 0.5;

pub const WELCH: &str = "Welch's t test";
pub const WILCOXON: &str = "Wilcoxon rank test";
pub const KRUSKAL: &str = "Kruskal-Wallace test";
pub const GLM_ANOVA: &str = "glm ANOVA";

pub const ADAPTER: MethodAdapter = MethodAdapter {
    method: DaaMethod::Aldex2,
    orientation: Orientation::FeaturesBySamples,
    encoding: InputEncoding::IntegerCounts,
    covariates: CovariateEncoding::Unsupported,
    needs_baseline: false,
    max_levels: None,
    sub_methods: &[WELCH, WILCOXON, KRUSKAL, GLM_ANOVA],
    prepare,
    invoke,
    collect,
};

/// Two-group result row (`aldex.ttest` + `aldex.effect` columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aldex2Row {
    pub feature_id: String,
    /// Median CLR value over all samples and instances.
    pub rab_all: f64,
    /// Median between-group difference (group2 - group1).
    pub diff_btw: f64,
    /// Median of the difference scaled by the larger within-group sd.
    pub effect: f64,
    pub we_ep: f64,
    pub we_ebh: f64,
    pub wi_ep: f64,
    pub wi_ebh: f64,
}

/// Multi-group result row (`aldex.kw` columns).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aldex2KwRow {
    pub feature_id: String,
    pub kw_ep: f64,
    pub kw_ebh: f64,
    pub glm_ep: f64,
    pub glm_ebh: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Aldex2Output {
    TwoGroup {
        group1: String,
        group2: String,
        rows: Vec<Aldex2Row>,
    },
    MultiGroup {
        levels: Vec<String>,
        rows: Vec<Aldex2KwRow>,
    },
}

fn prepare(input: &ValidatedInput, _options: &MethodOptions) -> Result<PreparedInput> {
    Ok(PreparedInput::from_validated(
        input,
        ADAPTER.orientation,
        ADAPTER.covariates,
        round_counts,
    ))
}

/// Per-instance test p-values (two per feature) and effect parts.
struct Instance {
    p_first: Vec<f64>,
    p_second: Vec<f64>,
    diff: Vec<f64>,
    effect: Vec<f64>,
    median_clr: Vec<f64>,
}

fn invoke(prepared: &PreparedInput, options: &MethodOptions) -> Result<BackendOutput> {
    let counts = &prepared.data;
    let (n_features, n_samples) = counts.shape();
    if n_features < 2 {
        return Err(DaaError::method(
            ADAPTER.method.name(),
            "at least two features are needed for the log-ratio transform",
        ));
    }
    let groups = prepared.level_indices();
    let two_group = groups.len() == 2;

    log::debug!(
        "ALDEx2: {} Monte-Carlo instances over {} features x {} samples",
        options.mc_samples,
        n_features,
        n_samples
    );

    let instances: Vec<Instance> = (0..options.mc_samples)
        .into_par_iter()
        .map(|k| {
            let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(k as u64));
            let clr = sample_clr(counts, &mut rng)?;
            Ok(test_instance(&clr, &groups, two_group))
        })
        .collect::<Result<_>>()?;

    let expected = |select: fn(&Instance) -> &Vec<f64>| -> (Vec<f64>, Vec<f64>) {
        let n = instances.len() as f64;
        let mut ep = vec![0.0; n_features];
        let mut ebh = vec![0.0; n_features];
        for inst in &instances {
            let p = select(inst);
            for (i, q) in bh(p).into_iter().enumerate() {
                ep[i] += p[i] / n;
                ebh[i] += q / n;
            }
        }
        (ep, ebh)
    };
    let (first_ep, first_ebh) = expected(|i| &i.p_first);
    let (second_ep, second_ebh) = expected(|i| &i.p_second);

    let output = if two_group {
        let per_feature = |select: fn(&Instance) -> &Vec<f64>, i: usize| {
            let values: Vec<f64> = instances.iter().map(|inst| select(inst)[i]).collect();
            median(&values)
        };
        let rows = (0..n_features)
            .map(|i| Aldex2Row {
                feature_id: prepared.feature_ids[i].clone(),
                rab_all: per_feature(|inst| &inst.median_clr, i),
                diff_btw: per_feature(|inst| &inst.diff, i),
                effect: per_feature(|inst| &inst.effect, i),
                we_ep: first_ep[i],
                we_ebh: first_ebh[i],
                wi_ep: second_ep[i],
                wi_ebh: second_ebh[i],
            })
            .collect();
        Aldex2Output::TwoGroup {
            group1: prepared.levels[0].clone(),
            group2: prepared.levels[1].clone(),
            rows,
        }
    } else {
        let rows = (0..n_features)
            .map(|i| Aldex2KwRow {
                feature_id: prepared.feature_ids[i].clone(),
                kw_ep: first_ep[i],
                kw_ebh: first_ebh[i],
                glm_ep: second_ep[i],
                glm_ebh: second_ebh[i],
            })
            .collect();
        Aldex2Output::MultiGroup {
            levels: prepared.levels.clone(),
            rows,
        }
    };
    Ok(BackendOutput::Aldex2(output))
}

/// One Dirichlet draw per sample, log2 CLR transformed.
fn sample_clr(counts: &DMatrix<f64>, rng: &mut StdRng) -> Result<DMatrix<f64>> {
    let (n_features, n_samples) = counts.shape();
    let mut clr = DMatrix::zeros(n_features, n_samples);
    for j in 0..n_samples {
        let alpha: Vec<f64> = counts.column(j).iter().map(|c| c + PRIOR).collect();
        let dirichlet = Dirichlet::new(&alpha)
            .map_err(|e| {
                DaaError::method(ADAPTER.method.name(), format!("Dirichlet prior: {}", e))
            })?;
        let draw: Vec<f64> = dirichlet.sample(rng);
        let logs: Vec<f64> = draw.iter().map(|p| p.max(f64::MIN_POSITIVE).log2()).collect();
        let centre = mean(&logs);
        for (i, v) in logs.into_iter().enumerate() {
            clr[(i, j)] = v - centre;
        }
    }
    Ok(clr)
}

fn test_instance(clr: &DMatrix<f64>, groups: &[Vec<usize>], two_group: bool) -> Instance {
    let n_features = clr.nrows();
    let mut inst = Instance {
        p_first: Vec::with_capacity(n_features),
        p_second: Vec::with_capacity(n_features),
        diff: Vec::with_capacity(n_features),
        effect: Vec::with_capacity(n_features),
        median_clr: Vec::with_capacity(n_features),
    };
    for i in 0..n_features {
        let values: Vec<Vec<f64>> = groups
            .iter()
            .map(|cols| cols.iter().map(|&j| clr[(i, j)]).collect())
            .collect();
        if two_group {
            let (reference, other) = (&values[0], &values[1]);
            inst.p_first.push(welch_t_test(other, reference).p_value);
            inst.p_second.push(wilcoxon_rank_sum(other, reference).p_value);
            let diff = mean(other) - mean(reference);
            let within = sd(reference).max(sd(other));
            inst.diff.push(diff);
            inst.effect.push(if within > 0.0 { diff / within } else { f64::NAN });
            inst.median_clr.push(median(&clr.row(i).iter().copied().collect::<Vec<_>>()));
        } else {
            inst.p_first.push(kruskal_wallis(&values).p_value);
            inst.p_second.push(one_way_anova(&values).p_value);
        }
    }
    inst
}

fn collect(output: BackendOutput) -> Result<Vec<RawRecord>> {
    let output = match output {
        BackendOutput::Aldex2(o) => o,
        other => return Err(other.mismatch(DaaMethod::Aldex2)),
    };
    let label = |sub: &str| format!("{}_{}", ADAPTER.method.name(), sub);

    let mut records = Vec::new();
    match output {
        Aldex2Output::TwoGroup { group1, group2, rows } => {
            for (sub, pick) in [
                (WELCH, (|r: &Aldex2Row| (r.we_ep, r.we_ebh)) as fn(&Aldex2Row) -> (f64, f64)),
                (WILCOXON, |r: &Aldex2Row| (r.wi_ep, r.wi_ebh)),
            ] {
                for row in &rows {
                    let (p, q) = pick(row);
                    if !p.is_finite() {
                        continue;
                    }
                    records.push(RawRecord {
                        feature_id: row.feature_id.clone(),
                        method: label(sub),
                        group1: group1.clone(),
                        group2: group2.clone(),
                        estimate: Some(row.effect).filter(|e| e.is_finite()),
                        statistic: None,
                        p_value: p,
                        p_adjust: Some(q),
                    });
                }
            }
        }
        Aldex2Output::MultiGroup { levels, rows } => {
            let group1 = levels.first().cloned().unwrap_or_default();
            let group2 = levels.iter().skip(1).cloned().collect::<Vec<_>>().join(",");
            for (sub, pick) in [
                (
                    KRUSKAL,
                    (|r: &Aldex2KwRow| (r.kw_ep, r.kw_ebh)) as fn(&Aldex2KwRow) -> (f64, f64),
                ),
                (GLM_ANOVA, |r: &Aldex2KwRow| (r.glm_ep, r.glm_ebh)),
            ] {
                for row in &rows {
                    let (p, q) = pick(row);
                    if !p.is_finite() {
                        continue;
                    }
                    records.push(RawRecord {
                        feature_id: row.feature_id.clone(),
                        method: label(sub),
                        group1: group1.clone(),
                        group2: group2.clone(),
                        estimate: None,
                        statistic: None,
                        p_value: p,
                        p_adjust: Some(q),
                    });
                }
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Metadata;
    use crate::dispatch::adapters::fixtures;
    use crate::dispatch::request::DaaRequest;
    use crate::dispatch::validate::validate;
    use std::io::Cursor;

    fn quick() -> MethodOptions {
        MethodOptions {
            mc_samples: 16,
            ..Default::default()
        }
    }

    #[test]
    fn test_two_group_detects_increase() {
        let prepared = fixtures::prepared(&ADAPTER);
        let output = invoke(&prepared, &quick()).unwrap();
        let rows = match &output {
            BackendOutput::Aldex2(Aldex2Output::TwoGroup { group1, group2, rows }) => {
                assert_eq!(group1, "control");
                assert_eq!(group2, "treated");
                rows.clone()
            }
            other => panic!("unexpected output {:?}", other.method()),
        };
        for up in &rows[..2] {
            assert!(up.effect > 0.0 && up.diff_btw > 1.5, "{:?}", up);
            assert!(up.we_ep < 0.01, "{:?}", up);
            assert!(up.wi_ep < 0.05, "{:?}", up);
        }

        let records = collect(output).unwrap();
        assert_eq!(records.len(), 12);
        assert_eq!(records[0].method, "ALDEx2_Welch's t test");
        assert_eq!(records[6].method, "ALDEx2_Wilcoxon rank test");
    }

    #[test]
    fn test_same_seed_same_result() {
        let prepared = fixtures::prepared(&ADAPTER);
        let a = collect(invoke(&prepared, &quick()).unwrap()).unwrap();
        let b = collect(invoke(&prepared, &quick()).unwrap()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_multi_group_labels() {
        let (table, _) = fixtures::two_group_table();
        let tsv = "sample\tsite\nS1\tgut\nS2\tgut\nS3\tgut\nS4\toral\n\
                   S5\toral\nS6\toral\nS7\tskin\nS8\tskin\n";
        let metadata = Metadata::from_reader(Cursor::new(tsv), None).unwrap();
        let request = DaaRequest::new("site", DaaMethod::Aldex2);
        let input = validate(&request, &ADAPTER, &table, &metadata).unwrap();
        let prepared = prepare(&input, &quick()).unwrap();
        let records = collect(invoke(&prepared, &quick()).unwrap()).unwrap();

        assert_eq!(records.len(), 12);
        assert!(records.iter().all(|r| r.group1 == "gut" && r.group2 == "oral,skin"));
        assert_eq!(records[0].method, "ALDEx2_Kruskal-Wallace test");
        assert_eq!(records[11].method, "ALDEx2_glm ANOVA");
        assert!(records.iter().all(|r| r.estimate.is_none()));
    }

    #[test]
    fn test_single_feature_fails() {
        let mut prepared = fixtures::prepared(&ADAPTER);
        prepared.data = prepared.data.rows(0, 1).into_owned();
        prepared.feature_ids.truncate(1);
        assert!(matches!(
            invoke(&prepared, &quick()),
            Err(DaaError::MethodFailure { .. })
        ));
    }

    #[test]
    fn test_collect_rejects_other_output() {
        let wrong = BackendOutput::Deseq2(Vec::new());
        assert!(collect(wrong).is_err());
    }
}
