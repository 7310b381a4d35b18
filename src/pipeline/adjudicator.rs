//! VerdictAdjudicator: classify a claim against its ranked sources only.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use super::gateway::{ReasoningGateway, DEFAULT_CALL_TIMEOUT};
use super::prompt_templates::{verdict_prompt, VERDICT_MAX_TOKENS};
use super::sanitize::sanitize_model_output;
use super::types::{RankedSource, RawClaim, Verdict};
use super::PipelineError;
use crate::config::MAX_VERDICT_SOURCES;

pub const NO_EVIDENCE_EXPLANATION: &str = "No reliable sources were found for this claim. \
Consider consulting textbooks, scholarly databases, or a librarian for verification.";

#[derive(Debug, Clone, PartialEq)]
pub struct Adjudication {
    pub verdict: Verdict,
    pub explanation: String,
    /// Sources the model said it relied on; unknown IDs are dropped.
    pub source_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct VerdictResponse {
    verdict: String,
    #[serde(default)]
    explanation: String,
    #[serde(default, alias = "sourceIds")]
    source_ids: Vec<serde_json::Value>,
}

pub struct VerdictAdjudicator {
    gateway: Arc<ReasoningGateway>,
    timeout: Duration,
}

impl VerdictAdjudicator {
    pub fn new(gateway: Arc<ReasoningGateway>) -> Self {
        Self {
            gateway,
            timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// No sources means `unclear` without a model call.
    pub async fn adjudicate(
        &self,
        claim: &RawClaim,
        sources: &[RankedSource],
    ) -> Result<Adjudication, PipelineError> {
        if sources.is_empty() {
            return Ok(Adjudication {
                verdict: Verdict::Unclear,
                explanation: NO_EVIDENCE_EXPLANATION.to_string(),
                source_ids: Vec::new(),
            });
        }

        let shown = &sources[..sources.len().min(MAX_VERDICT_SOURCES)];
        let prompt = verdict_prompt(claim, shown);
        let response: VerdictResponse = self
            .gateway
            .call_json(&prompt, VERDICT_MAX_TOKENS, self.timeout)
            .await?;

        let verdict = Verdict::from_model_label(&response.verdict).ok_or_else(|| {
            PipelineError::Parse(format!("unknown verdict label: {}", response.verdict))
        })?;

        let explanation = sanitize_model_output(response.explanation.trim());
        if explanation.is_empty() {
            return Err(PipelineError::Parse("empty explanation".into()));
        }

        let source_ids = response
            .source_ids
            .iter()
            .filter_map(|v| v.as_str())
            .filter_map(|s| Uuid::parse_str(s.trim()).ok())
            .filter(|id| shown.iter().any(|s| s.source_id == *id))
            .collect();

        Ok(Adjudication {
            verdict,
            explanation,
            source_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gateway::tests::ScriptedBackend;
    use crate::pipeline::types::{EvidenceDocument, SourceTier, Span};

    fn claim() -> RawClaim {
        RawClaim {
            subject: "Water".into(),
            predicate: "boils at 100°C at sea level".into(),
            numbers: vec!["100".into()],
            dates: vec![],
            original_text: "Water boils at 100°C at sea level.".into(),
            span: Span::new(0, 34),
        }
    }

    fn source() -> RankedSource {
        RankedSource {
            source_id: Uuid::new_v4(),
            document: EvidenceDocument {
                title: "Boiling point".into(),
                url: "https://nist.gov/boiling".into(),
                snippet: "Pure water boils at 100 °C at one atmosphere.".into(),
                domain: "nist.gov".into(),
                date_published: None,
            },
            tier: SourceTier::Authoritative,
            score: 0.9,
        }
    }

    fn adjudicator(response: &str) -> (VerdictAdjudicator, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::new("scripted", vec![Ok(response)]));
        let gateway = ReasoningGateway::new(vec![backend.clone()]).with_retry(0, Duration::from_millis(1));
        (VerdictAdjudicator::new(Arc::new(gateway)), backend)
    }

    #[tokio::test]
    async fn no_sources_short_circuits_without_model_call() {
        let (adj, backend) = adjudicator("{}");
        let result = adj.adjudicate(&claim(), &[]).await.unwrap();
        assert_eq!(result.verdict, Verdict::Unclear);
        assert_eq!(result.explanation, NO_EVIDENCE_EXPLANATION);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn legacy_label_maps_to_supported() {
        let src = source();
        let response = format!(
            r#"{{"verdict": "broadly_supported", "explanation": "Two sources agree.", "source_ids": ["{}", "not-a-uuid", "{}"]}}"#,
            src.source_id,
            Uuid::new_v4()
        );
        let (adj, backend) = adjudicator(&response);
        let result = adj.adjudicate(&claim(), &[src.clone()]).await.unwrap();
        assert_eq!(result.verdict, Verdict::Supported);
        assert_eq!(result.source_ids, vec![src.source_id]);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn unknown_label_is_a_parse_error() {
        let (adj, _) = adjudicator(r#"{"verdict": "true", "explanation": "x"}"#);
        let err = adj.adjudicate(&claim(), &[source()]).await.unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn missing_verdict_is_a_parse_error() {
        let (adj, _) = adjudicator(r#"{"explanation": "x"}"#);
        let err = adj.adjudicate(&claim(), &[source()]).await.unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn explanation_markup_is_redacted() {
        let (adj, _) = adjudicator(
            r#"{"verdict": "disputed", "explanation": "Sources disagree <script>alert(1)</script>", "source_ids": []}"#,
        );
        let result = adj.adjudicate(&claim(), &[source()]).await.unwrap();
        assert_eq!(result.verdict, Verdict::Disputed);
        assert!(!result.explanation.to_lowercase().contains("<script"));
    }
}
