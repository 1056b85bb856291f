//! Pathway annotation of result tables.
//!
//! Lookups go to the bundled reference first. IDs it does not know are
//! sent to the remote source, if one is configured, in batches. Remote
//! failures never abort annotation; they come back as warnings next to
//! the rows, which keep their annotation fields unset.

mod kegg;
mod reference;

pub use kegg::{parse_flat_file, AnnotationSource, KeggRest, KEGG_MAX_BATCH};
pub use reference::{PathwayInfo, PathwayType, ReferenceTable};

use crate::data::{AnnotatedResult, AnnotatedResultSet, DaaResult, DaaResultSet};
use crate::error::{DaaError, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A lookup that failed for some IDs.
#[derive(Debug)]
pub struct AnnotationWarning {
    pub feature_ids: Vec<String>,
    pub error: DaaError,
}

impl fmt::Display for AnnotationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} feature(s): {})",
            self.error,
            self.feature_ids.len(),
            self.feature_ids.join(", ")
        )
    }
}

/// Annotated rows plus the warnings collected on the way.
#[derive(Debug)]
pub struct Annotated {
    pub results: Vec<AnnotatedResult>,
    pub warnings: Vec<AnnotationWarning>,
}

impl Annotated {
    pub fn n_annotated(&self) -> usize {
        self.results.iter().filter(|r| r.is_annotated()).count()
    }
}

/// Joins results with pathway information.
pub struct AnnotationJoiner {
    reference: ReferenceTable,
    remote: Option<Box<dyn AnnotationSource>>,
}

impl fmt::Debug for AnnotationJoiner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnnotationJoiner")
            .field("reference_entries", &self.reference.len())
            .field("remote", &self.remote.as_ref().map(|r| r.name().to_string()))
            .finish()
    }
}

impl AnnotationJoiner {
    /// Joiner over the bundled reference, without a remote source.
    pub fn new() -> Result<Self> {
        Ok(Self::with_reference(ReferenceTable::bundled()?))
    }

    pub fn with_reference(reference: ReferenceTable) -> Self {
        Self { reference, remote: None }
    }

    pub fn remote(mut self, source: impl AnnotationSource + 'static) -> Self {
        self.remote = Some(Box::new(source));
        self
    }

    /// Annotate plain results.
    pub fn annotate_results(
        &self,
        results: &[DaaResult],
        pathway_type: PathwayType,
        ko_to_kegg: bool,
    ) -> Annotated {
        let rows: Vec<AnnotatedResult> =
            results.iter().cloned().map(AnnotatedResult::from_result).collect();
        self.annotate(&rows, pathway_type, ko_to_kegg)
    }

    /// Annotate rows; rows that already carry annotation are left untouched.
    pub fn annotate(
        &self,
        rows: &[AnnotatedResult],
        pathway_type: PathwayType,
        ko_to_kegg: bool,
    ) -> Annotated {
        let kind = pathway_type.resolve(ko_to_kegg);
        let mut results = rows.to_vec();
        let mut warnings = Vec::new();

        let pending: Vec<usize> =
            (0..results.len()).filter(|&i| !results[i].is_annotated()).collect();
        let mut unresolved: BTreeSet<String> = BTreeSet::new();
        for &i in &pending {
            let id = &results[i].result.feature_id;
            match self.reference.get(kind, id) {
                Some(info) => fill(&mut results[i], info),
                None => {
                    unresolved.insert(id.clone());
                }
            }
        }
        log::debug!(
            "annotation: {} of {} pending rows resolved from the bundled {} reference",
            pending.len() - pending.iter().filter(|&&i| !results[i].is_annotated()).count(),
            pending.len(),
            kind
        );

        if unresolved.is_empty() {
            return Annotated { results, warnings };
        }

        let remote = match &self.remote {
            Some(remote) if remote.supports(kind) => remote,
            Some(remote) => {
                log::warn!(
                    "{} has no {} entries; {} ID(s) stay unannotated",
                    remote.name(),
                    kind,
                    unresolved.len()
                );
                return Annotated { results, warnings };
            }
            None => {
                log::debug!("{} ID(s) not in the bundled reference", unresolved.len());
                return Annotated { results, warnings };
            }
        };

        // canonical ID -> original feature IDs
        let mut by_canonical: HashMap<String, Vec<String>> = HashMap::new();
        for id in &unresolved {
            match kind.canonical_id(id) {
                Some(canonical) => by_canonical.entry(canonical).or_default().push(id.clone()),
                None => warnings.push(AnnotationWarning {
                    feature_ids: vec![id.clone()],
                    error: DaaError::AnnotationLookup(format!(
                        "'{}' is not a valid {} identifier",
                        id,
                        kind
                    )),
                }),
            }
        }
        let mut queries: Vec<String> = by_canonical.keys().cloned().collect();
        queries.sort();

        let mut found: HashMap<String, PathwayInfo> = HashMap::new();
        for batch in queries.chunks(remote.batch_size().max(1)) {
            match remote.fetch(kind, batch) {
                Ok(entries) => {
                    for info in entries {
                        found.insert(info.id.clone(), info);
                    }
                    let missing: Vec<String> = batch
                        .iter()
                        .filter(|c| !found.contains_key(*c))
                        .flat_map(|c| by_canonical[c].clone())
                        .collect();
                    if !missing.is_empty() {
                        log::debug!("{} has no entry for {} ID(s)", remote.name(), missing.len());
                        warnings.push(AnnotationWarning {
                            feature_ids: missing,
                            error: DaaError::AnnotationLookup(format!(
                                "not found in {}",
                                remote.name()
                            )),
                        });
                    }
                }
                Err(error) => {
                    log::warn!(
                        "{} lookup failed for {} ID(s): {}",
                        remote.name(),
                        batch.len(),
                        error
                    );
                    warnings.push(AnnotationWarning {
                        feature_ids: batch.iter().flat_map(|c| by_canonical[c].clone()).collect(),
                        error,
                    });
                }
            }
        }

        for row in results.iter_mut().filter(|r| !r.is_annotated()) {
            if let Some(info) = kind
                .canonical_id(&row.result.feature_id)
                .and_then(|c| found.get(&c))
            {
                fill(row, info);
            }
        }
        Annotated { results, warnings }
    }

    /// Annotate a whole result set.
    pub fn annotate_set(
        &self,
        set: &DaaResultSet,
        pathway_type: PathwayType,
        ko_to_kegg: bool,
    ) -> (AnnotatedResultSet, Vec<AnnotationWarning>) {
        let Annotated { results, warnings } =
            self.annotate_results(&set.results, pathway_type, ko_to_kegg);
        (
            AnnotatedResultSet {
                feature_kind: set.feature_kind,
                adjust: set.adjust,
                results,
            },
            warnings,
        )
    }
}

fn fill(row: &mut AnnotatedResult, info: &PathwayInfo) {
    row.name = info.name.clone();
    row.description = info.description.clone();
    row.pathway_class = info.class.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Unreachable {
        calls: Arc<AtomicUsize>,
    }

    impl AnnotationSource for Unreachable {
        fn name(&self) -> &str {
            "unreachable"
        }
        fn supports(&self, _kind: PathwayType) -> bool {
            true
        }
        fn fetch(&self, _kind: PathwayType, _ids: &[String]) -> Result<Vec<PathwayInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DaaError::AnnotationLookup("connection refused".into()))
        }
    }

    struct Fixed;

    impl AnnotationSource for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        fn supports(&self, _kind: PathwayType) -> bool {
            true
        }
        fn fetch(&self, _kind: PathwayType, ids: &[String]) -> Result<Vec<PathwayInfo>> {
            Ok(ids
                .iter()
                .map(|id| PathwayInfo {
                    id: id.clone(),
                    name: Some(format!("remote {}", id)),
                    description: None,
                    class: Some("Remote".into()),
                })
                .collect())
        }
    }

    /// Returns only the IDs it was told about.
    struct Partial(Vec<&'static str>);

    impl AnnotationSource for Partial {
        fn name(&self) -> &str {
            "partial"
        }
        fn supports(&self, _kind: PathwayType) -> bool {
            true
        }
        fn fetch(&self, _kind: PathwayType, ids: &[String]) -> Result<Vec<PathwayInfo>> {
            Ok(ids
                .iter()
                .filter(|id| self.0.contains(&id.as_str()))
                .map(|id| PathwayInfo {
                    id: id.clone(),
                    name: Some(format!("remote {}", id)),
                    description: None,
                    class: None,
                })
                .collect())
        }
    }

    /// Stand-in for `curl` that exits with `code` on its first `failures`
    /// calls, then prints one KEGG entry. Returns the script and its call log.
    #[cfg(unix)]
    fn flaky_curl(
        dir: &std::path::Path,
        failures: usize,
        code: i32,
    ) -> (String, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let calls = dir.join("calls");
        let script = dir.join("curl");
        let body = format!(
            "#!/bin/sh\n\
             echo call >> '{calls}'\n\
             if [ $(wc -l < '{calls}') -le {failures} ]; then\n\
             echo 'curl: failure' >&2\n\
             exit {code}\n\
             fi\n\
             printf 'ENTRY       ko99990                     Pathway\\n'\n\
             printf 'NAME        Remote pathway\\n///\\n'\n",
            calls = calls.display(),
            failures = failures,
            code = code,
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        (script.display().to_string(), calls)
    }

    #[cfg(unix)]
    fn call_count(calls: &std::path::Path) -> usize {
        std::fs::read_to_string(calls).map(|s| s.lines().count()).unwrap_or(0)
    }

    fn results(ids: &[&str]) -> Vec<DaaResult> {
        ids.iter()
            .map(|id| DaaResult::new(*id, "LinDA", "a", "b", Some(1.0), None, 0.01, 0.02))
            .collect()
    }

    #[test]
    fn test_bundled_lookup() {
        let joiner = AnnotationJoiner::new().unwrap();
        let out = joiner.annotate_results(&results(&["ko00010", "ko99999"]), PathwayType::Ko, true);
        assert_eq!(out.results.len(), 2);
        assert_eq!(out.results[0].name.as_deref(), Some("Glycolysis / Gluconeogenesis"));
        assert!(!out.results[1].is_annotated());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_remote_failure_keeps_rows() {
        let calls = Arc::new(AtomicUsize::new(0));
        let joiner = AnnotationJoiner::new().unwrap().remote(Unreachable { calls: calls.clone() });
        let ids: Vec<String> = (0..12).map(|i| format!("ko{:05}", 90000 + i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let out = joiner.annotate_results(&results(&refs), PathwayType::KeggPathway, false);

        assert_eq!(out.results.len(), 12);
        assert!(out.results.iter().all(|r| r.name.is_none() && r.description.is_none()));
        // two batches of at most ten
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(out.warnings.len(), 2);
        assert_eq!(out.warnings.iter().map(|w| w.feature_ids.len()).sum::<usize>(), 12);
    }

    #[test]
    fn test_remote_fills_unresolved() {
        let joiner = AnnotationJoiner::new().unwrap().remote(Fixed);
        let out = joiner.annotate_results(
            &results(&["ko00010", "map01100"]),
            PathwayType::KeggPathway,
            false,
        );
        assert_eq!(
            out.results[0].pathway_class.as_deref(),
            Some("Metabolism; Carbohydrate metabolism")
        );
        assert_eq!(out.results[1].name.as_deref(), Some("remote ko01100"));
    }

    #[test]
    fn test_missing_remote_ids_are_reported() {
        let joiner = AnnotationJoiner::new().unwrap().remote(Partial(vec!["ko99990"]));
        let out = joiner.annotate_results(
            &results(&["ko99990", "map99991"]),
            PathwayType::KeggPathway,
            false,
        );
        assert!(out.results[0].is_annotated());
        assert!(!out.results[1].is_annotated());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].feature_ids, vec!["map99991"]);
        assert!(matches!(out.warnings[0].error, DaaError::AnnotationLookup(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_transient_failure_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let (curl, calls) = flaky_curl(dir.path(), 1, 7);
        let joiner = AnnotationJoiner::new().unwrap().remote(KeggRest::new().curl(curl));

        let out = joiner.annotate_results(&results(&["ko99990"]), PathwayType::KeggPathway, false);
        assert_eq!(call_count(&calls), 2);
        assert_eq!(out.results[0].name.as_deref(), Some("Remote pathway"));
        assert!(out.warnings.is_empty(), "{:?}", out.warnings);
    }

    #[cfg(unix)]
    #[test]
    fn test_repeated_failure_gives_one_warning() {
        let dir = tempfile::tempdir().unwrap();
        let (curl, calls) = flaky_curl(dir.path(), 2, 7);
        let joiner = AnnotationJoiner::new().unwrap().remote(KeggRest::new().curl(curl));

        let out = joiner.annotate_results(&results(&["ko99990"]), PathwayType::KeggPathway, false);
        assert_eq!(call_count(&calls), 2);
        assert!(!out.results[0].is_annotated());
        assert_eq!(out.warnings.len(), 1);
        assert_eq!(out.warnings[0].feature_ids, vec!["ko99990"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_http_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let (curl, calls) = flaky_curl(dir.path(), 1, 22);
        let joiner = AnnotationJoiner::new().unwrap().remote(KeggRest::new().curl(curl));

        let out = joiner.annotate_results(&results(&["ko99990"]), PathwayType::KeggPathway, false);
        assert_eq!(call_count(&calls), 1);
        assert!(!out.results[0].is_annotated());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_idempotent() {
        let joiner = AnnotationJoiner::new().unwrap().remote(Fixed);
        let once = joiner.annotate_results(
            &results(&["ko00010", "ko01100"]),
            PathwayType::KeggPathway,
            false,
        );
        let twice = joiner.annotate(&once.results, PathwayType::KeggPathway, false);
        assert_eq!(once.results, twice.results);

        let mut manual = once.results.clone();
        manual[0].name = Some("curated".into());
        let again = joiner.annotate(&manual, PathwayType::KeggPathway, false);
        assert_eq!(again.results[0].name.as_deref(), Some("curated"));
    }
}
