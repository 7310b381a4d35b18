//! Services owned outside this crate: who the caller is, and where finished
//! requests are recorded.
//!
//! Both sit behind async traits so the HTTP layer can be wired to a real user
//! store in production and to in-memory doubles in tests. Neither may fail a
//! request: identity errors degrade to an anonymous caller, history writes
//! run detached and only log on failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::pipeline::types::CitationStyle;

/// Longest request prefix kept in a history entry, in characters.
pub const HISTORY_SNIPPET_CHARS: usize = 200;

#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("Identity lookup failed: {0}")]
    Identity(String),
    #[error("History write failed: {0}")]
    History(String),
}

// ═══════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════

/// A known caller and the defaults they chose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub citation_style: Option<CitationStyle>,
    pub max_claims: Option<usize>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            citation_style: None,
            max_claims: None,
        }
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up the caller named by the `x-user-id` header.
    /// `Ok(None)` means the id is unknown; the caller is treated as anonymous.
    async fn resolve(&self, user_id: &str) -> Result<Option<Identity>, CollaboratorError>;
}

/// Accepts any non-empty user id as-is, without stored preferences.
pub struct HeaderIdentity;

#[async_trait]
impl IdentityProvider for HeaderIdentity {
    async fn resolve(&self, user_id: &str) -> Result<Option<Identity>, CollaboratorError> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Ok(None);
        }
        Ok(Some(Identity::new(user_id)))
    }
}

// ═══════════════════════════════════════════════════════════
// History
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Analyze,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub user_id: String,
    pub kind: HistoryKind,
    pub input_snippet: String,
    pub result_json: serde_json::Value,
    pub claim_count: usize,
}

impl HistoryEntry {
    pub fn new(
        user_id: &str,
        kind: HistoryKind,
        input: &str,
        result_json: serde_json::Value,
        claim_count: usize,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            kind,
            input_snippet: input.chars().take(HISTORY_SNIPPET_CHARS).collect(),
            result_json,
            claim_count,
        }
    }
}

#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn record(&self, entry: HistoryEntry) -> Result<(), CollaboratorError>;
}

/// Writes a log line per entry and keeps nothing.
pub struct LoggingHistoryRecorder;

#[async_trait]
impl HistoryRecorder for LoggingHistoryRecorder {
    async fn record(&self, entry: HistoryEntry) -> Result<(), CollaboratorError> {
        tracing::info!(
            user_id = %entry.user_id,
            kind = ?entry.kind,
            claim_count = entry.claim_count,
            snippet_chars = entry.input_snippet.chars().count(),
            "History entry recorded"
        );
        Ok(())
    }
}

/// Hand `entry` to `recorder` on its own task. The response never waits.
pub fn record_detached(
    recorder: Arc<dyn HistoryRecorder>,
    entry: HistoryEntry,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let user_id = entry.user_id.clone();
        if let Err(e) = recorder.record(entry).await {
            tracing::warn!(error = %e, user_id = %user_id, "Failed to record history");
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Fixed identity for one user id; errors for `"broken"`.
    pub(crate) struct StaticIdentity {
        pub identity: Identity,
    }

    #[async_trait]
    impl IdentityProvider for StaticIdentity {
        async fn resolve(&self, user_id: &str) -> Result<Option<Identity>, CollaboratorError> {
            if user_id == "broken" {
                return Err(CollaboratorError::Identity("store offline".into()));
            }
            Ok((user_id == self.identity.user_id).then(|| self.identity.clone()))
        }
    }

    /// Keeps every entry; optionally fails each write.
    #[derive(Default)]
    pub(crate) struct MemoryHistory {
        pub entries: Mutex<Vec<HistoryEntry>>,
        pub fail: bool,
    }

    impl MemoryHistory {
        pub fn len(&self) -> usize {
            self.entries.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl HistoryRecorder for MemoryHistory {
        async fn record(&self, entry: HistoryEntry) -> Result<(), CollaboratorError> {
            if self.fail {
                return Err(CollaboratorError::History("disk full".into()));
            }
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    #[tokio::test]
    async fn header_identity_accepts_non_empty_ids() {
        assert_eq!(
            HeaderIdentity.resolve(" u-1 ").await.unwrap(),
            Some(Identity::new("u-1"))
        );
        assert_eq!(HeaderIdentity.resolve("  ").await.unwrap(), None);
    }

    #[test]
    fn snippet_is_cut_by_characters() {
        let input = "é".repeat(HISTORY_SNIPPET_CHARS + 50);
        let entry = HistoryEntry::new("u", HistoryKind::Analyze, &input, serde_json::json!({}), 0);
        assert_eq!(entry.input_snippet.chars().count(), HISTORY_SNIPPET_CHARS);

        let short = HistoryEntry::new("u", HistoryKind::Review, "short", serde_json::json!({}), 2);
        assert_eq!(short.input_snippet, "short");
    }

    #[tokio::test]
    async fn detached_record_reaches_the_recorder() {
        let history = Arc::new(MemoryHistory::default());
        let entry = HistoryEntry::new("u", HistoryKind::Analyze, "text", serde_json::json!({"a": 1}), 1);
        record_detached(history.clone(), entry).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries.lock().unwrap()[0].kind, HistoryKind::Analyze);
    }

    #[tokio::test]
    async fn failed_record_is_swallowed() {
        let history = Arc::new(MemoryHistory {
            fail: true,
            ..Default::default()
        });
        let entry = HistoryEntry::new("u", HistoryKind::Review, "text", serde_json::json!(null), 0);
        assert!(record_detached(history.clone(), entry).await.is_ok());
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn history_kind_is_snake_case() {
        assert_eq!(serde_json::to_string(&HistoryKind::Review).unwrap(), "\"review\"");
    }
}
