//! Method dispatch: validate a request, run one backend and collect its
//! native output as raw records.

pub mod adapters;
mod registry;
mod request;
mod validate;

pub use registry::{
    BackendOutput, CollectFn, CovariateEncoding, InputEncoding, InvokeFn, MethodAdapter,
    MethodRegistry, Orientation, PrepareFn, PreparedInput, RawRecord,
};
pub use request::{DaaMethod, DaaRequest, MethodOptions};
pub use validate::{validate, ValidatedInput};

use crate::data::{AbundanceTable, DaaResultSet, FeatureId, Metadata};
use crate::error::{DaaError, Result};
use crate::results::normalize_results;

/// Run the method named in `request` and return its raw records.
///
/// Every validation check runs before the backend is touched. Backend
/// errors surface as [`DaaError::MethodFailure`] tagged with the method.
pub fn run_method<I: FeatureId>(
    request: &DaaRequest,
    abundance: &AbundanceTable<I>,
    metadata: &Metadata,
) -> Result<Vec<RawRecord>> {
    let adapter = MethodRegistry::global().get(request.method)?;
    request.options.validate()?;
    let input = validate(request, adapter, abundance, metadata)?;

    let label = adapter.method.name();
    log::info!(
        "running {} on {} features x {} samples ({} vs {})",
        label,
        input.n_features(),
        input.n_samples(),
        input.levels[1..].join(","),
        input.reference
    );

    let prepared =
        (adapter.prepare)(&input, &request.options).map_err(|e| as_method_failure(label, e))?;
    log::debug!(
        "{}: prepared {:?} input of shape {:?}",
        label,
        prepared.orientation,
        prepared.data.shape()
    );
    let output =
        (adapter.invoke)(&prepared, &request.options).map_err(|e| as_method_failure(label, e))?;
    let records = (adapter.collect)(output).map_err(|e| as_method_failure(label, e))?;

    if records.is_empty() {
        return Err(DaaError::method(label, "no feature produced a result"));
    }
    log::debug!("{}: collected {} raw records", label, records.len());
    Ok(records)
}

/// [`run_method`] followed by result normalization.
pub fn run_daa<I: FeatureId>(
    request: &DaaRequest,
    abundance: &AbundanceTable<I>,
    metadata: &Metadata,
) -> Result<DaaResultSet> {
    let records = run_method(request, abundance, metadata)?;
    Ok(normalize_results(records, request.adjust, I::KIND))
}

fn as_method_failure(method: &str, err: DaaError) -> DaaError {
    match err {
        DaaError::MethodFailure { .. } => err,
        other => DaaError::method(method, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PathwayId;
    use std::io::Cursor;

    fn table(n_features: usize) -> AbundanceTable<PathwayId> {
        let samples: Vec<String> = (1..=6).map(|i| format!("S{}", i)).collect();
        let rows: Vec<Vec<f64>> = (0..n_features)
            .map(|i| (0..6).map(|j| 50.0 + (i * 7 + j * 3) as f64).collect())
            .collect();
        let ids =
            (0..n_features).map(|i| PathwayId::from(format!("ko{:05}", i + 10).as_str())).collect();
        AbundanceTable::from_rows(ids, samples, rows).unwrap()
    }

    fn three_level_metadata() -> Metadata {
        let tsv = "sample\tsite\nS1\tgut\nS2\tgut\nS3\toral\nS4\toral\nS5\tskin\nS6\tskin\n";
        Metadata::from_reader(Cursor::new(tsv), None).unwrap()
    }

    #[test]
    fn test_ambiguous_reference_before_backend() {
        let request = DaaRequest::new("site", DaaMethod::Deseq2);
        let err = run_method(&request, &table(3), &three_level_metadata()).unwrap_err();
        match err {
            DaaError::AmbiguousReference { column, levels } => {
                assert_eq!(column, "site");
                assert_eq!(levels, vec!["gut", "oral", "skin"]);
            }
            other => panic!("expected AmbiguousReference, got {}", other),
        }
    }

    #[test]
    fn test_lefser_rejects_three_levels() {
        let request = DaaRequest::new("site", DaaMethod::Lefser);
        assert!(matches!(
            run_method(&request, &table(3), &three_level_metadata()),
            Err(DaaError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_bad_options_rejected_up_front() {
        let options = MethodOptions {
            mc_samples: 0,
            ..Default::default()
        };
        let request = DaaRequest::new("site", DaaMethod::Aldex2).options(options);
        assert!(matches!(
            run_method(&request, &table(3), &three_level_metadata()),
            Err(DaaError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_backend_errors_become_method_failures() {
        let wrapped = as_method_failure("edgeR", DaaError::invalid("singular design"));
        assert!(matches!(
            wrapped,
            DaaError::MethodFailure { ref method, .. } if method == "edgeR"
        ));
        let kept = as_method_failure("edgeR", DaaError::method("DESeq2", "x"));
        assert!(matches!(kept, DaaError::MethodFailure { ref method, .. } if method == "DESeq2"));
    }
}
