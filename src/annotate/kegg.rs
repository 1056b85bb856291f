//! Remote lookups against the KEGG REST API.

use crate::annotate::reference::{PathwayInfo, PathwayType};
use crate::error::{DaaError, Result};
use std::process::Command;
use std::time::Duration;

/// KEGG `get` accepts at most this many entries per request.
pub const KEGG_MAX_BATCH: usize = 10;

/// Somewhere to look up pathway information by ID.
pub trait AnnotationSource: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this source knows about the namespace at all.
    fn supports(&self, kind: PathwayType) -> bool;

    /// Largest number of IDs per request.
    fn batch_size(&self) -> usize {
        KEGG_MAX_BATCH
    }

    /// Look up one batch of canonical IDs. Missing IDs are simply absent
    /// from the returned list.
    fn fetch(&self, kind: PathwayType, ids: &[String]) -> Result<Vec<PathwayInfo>>;
}

/// `curl` client for `https://rest.kegg.jp/get/<id>+<id>...`.
#[derive(Debug, Clone)]
pub struct KeggRest {
    base_url: String,
    timeout: Duration,
    retries: usize,
    curl: String,
}

impl Default for KeggRest {
    fn default() -> Self {
        Self {
            base_url: "https://rest.kegg.jp".to_string(),
            timeout: Duration::from_secs(10),
            retries: 1,
            curl: "curl".to_string(),
        }
    }
}

impl KeggRest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Path to the `curl` executable.
    pub fn curl(mut self, program: impl Into<String>) -> Self {
        self.curl = program.into();
        self
    }

    fn query_id(kind: PathwayType, id: &str) -> String {
        match kind {
            PathwayType::Ko => format!("ko:{}", id),
            PathwayType::Ec => format!("ec:{}", id.trim_start_matches("EC:")),
            PathwayType::KeggPathway => format!("path:{}", id),
            PathwayType::MetaCyc => id.to_string(),
        }
    }

    fn get(&self, url: &str) -> std::result::Result<String, CurlFailure> {
        let max_time = self.timeout.as_secs().max(1).to_string();
        let output = Command::new(&self.curl)
            .args(["--silent", "--show-error", "--fail", "--max-time", &max_time, url])
            .output()
            .map_err(|e| CurlFailure::permanent(format!("could not run {}: {}", self.curl, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!("GET {} failed ({}): {}", url, output.status, stderr.trim());
            // 22: the server answered with an HTTP error status
            return Err(match output.status.code() {
                Some(CURL_HTTP_ERROR) => CurlFailure::permanent(message),
                _ => CurlFailure::transient(message),
            });
        }
        String::from_utf8(output.stdout)
            .map_err(|e| {
                CurlFailure::permanent(format!("response from {} is not UTF-8: {}", url, e))
            })
    }
}

const CURL_HTTP_ERROR: i32 = 22;

#[derive(Debug)]
struct CurlFailure {
    transient: bool,
    message: String,
}

impl CurlFailure {
    fn transient(message: String) -> Self {
        Self { transient: true, message }
    }

    fn permanent(message: String) -> Self {
        Self { transient: false, message }
    }
}

impl From<CurlFailure> for DaaError {
    fn from(failure: CurlFailure) -> Self {
        DaaError::AnnotationLookup(failure.message)
    }
}

impl AnnotationSource for KeggRest {
    fn name(&self) -> &str {
        "KEGG REST"
    }

    fn supports(&self, kind: PathwayType) -> bool {
        kind != PathwayType::MetaCyc
    }

    fn fetch(&self, kind: PathwayType, ids: &[String]) -> Result<Vec<PathwayInfo>> {
        let query: Vec<String> = ids.iter().map(|id| Self::query_id(kind, id)).collect();
        let url = format!("{}/get/{}", self.base_url, query.join("+"));

        let mut attempt = 0;
        let body = loop {
            match self.get(&url) {
                Ok(body) => break body,
                Err(e) if e.transient && attempt < self.retries => {
                    attempt += 1;
                    log::debug!("retrying KEGG lookup after error: {}", e.message);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let entries = parse_flat_file(&body, kind);
        if entries.is_empty() && !body.trim().is_empty() {
            return Err(DaaError::AnnotationLookup(format!(
                "no KEGG entries could be parsed from the response to {}",
                url
            )));
        }
        Ok(entries)
    }
}

/// Parse KEGG flat-file entries separated by `///`.
///
/// Only `ENTRY`, `NAME`, `DESCRIPTION` and `CLASS` are kept; continuation
/// lines extend the field above them.
pub fn parse_flat_file(text: &str, kind: PathwayType) -> Vec<PathwayInfo> {
    let mut entries = Vec::new();
    let mut current: Option<PathwayInfo> = None;
    let mut field = "";

    for line in text.lines() {
        if line.starts_with("///") {
            entries.extend(current.take());
            field = "";
            continue;
        }
        let (key, value) = if line.starts_with(char::is_whitespace) {
            (field, line.trim())
        } else {
            let key_len = line.find(char::is_whitespace).unwrap_or(line.len());
            let (key, rest) = line.split_at(key_len);
            field = key;
            (key, rest.trim())
        };

        match key {
            "ENTRY" => {
                let mut tokens = value.split_whitespace();
                let raw = match (tokens.next(), tokens.next()) {
                    (Some("EC"), Some(number)) => format!("EC:{}", number),
                    (Some(id), _) => id.to_string(),
                    (None, _) => continue,
                };
                let id = kind.canonical_id(&raw).unwrap_or(raw);
                entries.extend(current.replace(PathwayInfo {
                    id,
                    name: None,
                    description: None,
                    class: None,
                }));
            }
            "NAME" => {
                if let Some(entry) = current.as_mut() {
                    if entry.name.is_none() {
                        entry.name = Some(value.trim_end_matches(';').to_string());
                    }
                }
            }
            "DESCRIPTION" => {
                if let Some(entry) = current.as_mut() {
                    append(&mut entry.description, value);
                }
            }
            "CLASS" => {
                if let Some(entry) = current.as_mut() {
                    append(&mut entry.class, value);
                }
            }
            _ => {}
        }
    }
    entries.extend(current);
    entries
}

fn append(slot: &mut Option<String>, value: &str) {
    if value.is_empty() {
        return;
    }
    match slot {
        Some(existing) => {
            existing.push(' ');
            existing.push_str(value);
        }
        None => *slot = Some(value.to_string()),
    }
}
