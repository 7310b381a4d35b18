//! Claim verification pipeline.
//!
//! extract → (per claim: cache → evidence → rank → adjudicate → rewrite → cite)
//! → aggregate or stream. Every stage that talks to the network sits behind a
//! trait so the orchestrator can be assembled from test doubles.

pub mod types;
pub mod cache;
pub mod gateway;
pub mod ollama;
pub mod prompt_templates;
pub mod extractor;
pub mod evidence;
pub mod ranking;
pub mod adjudicator;
pub mod rewrite;
pub mod citation;
pub mod source_meta;
pub mod review;
pub mod sanitize;
pub mod orchestrator;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// One backend's last failure, kept for diagnostics when the gateway gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendFailure {
    pub backend: String,
    pub message: String,
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.message)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Malformed model response: {0}")]
    Parse(String),

    #[error("{operation} timed out after {after_ms}ms")]
    UpstreamTimeout { operation: String, after_ms: u64 },

    #[error("All upstream backends unavailable: {}", format_failures(.failures))]
    UpstreamUnavailable { failures: Vec<BackendFailure> },

    #[error("Cache failure: {0}")]
    Cache(String),
}

impl PipelineError {
    /// Short machine-readable label for logs and metrics fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Parse(_) => "parse",
            Self::UpstreamTimeout { .. } => "upstream_timeout",
            Self::UpstreamUnavailable { .. } => "upstream_unavailable",
            Self::Cache(_) => "cache",
        }
    }

    /// Single-provider failure (search, metadata fetch) with no fallback list.
    pub fn unavailable(backend: &str, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            failures: vec![BackendFailure {
                backend: backend.to_string(),
                message: message.into(),
            }],
        }
    }
}

fn format_failures(failures: &[BackendFailure]) -> String {
    if failures.is_empty() {
        return "no backends configured".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_lists_every_backend() {
        let err = PipelineError::UpstreamUnavailable {
            failures: vec![
                BackendFailure {
                    backend: "a".into(),
                    message: "timeout".into(),
                },
                BackendFailure {
                    backend: "b".into(),
                    message: "HTTP 500".into(),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("a: timeout"));
        assert!(text.contains("b: HTTP 500"));
        assert_eq!(err.kind(), "upstream_unavailable");
    }

    #[test]
    fn empty_failure_list_reads_as_unconfigured() {
        let err = PipelineError::UpstreamUnavailable { failures: vec![] };
        assert!(err.to_string().contains("no backends configured"));
    }

    #[test]
    fn json_errors_become_parse_errors() {
        let err: PipelineError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), "parse");
    }
}
