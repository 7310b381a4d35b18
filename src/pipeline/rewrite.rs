//! RewriteGenerator: evidence-aligned rewordings for overstated or disputed claims.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::gateway::{ReasoningGateway, DEFAULT_CALL_TIMEOUT};
use super::prompt_templates::{rewrite_prompt, REWRITE_MAX_TOKENS};
use super::sanitize::sanitize_model_output;
use super::types::{RankedSource, Rewrite, Verdict};
use super::PipelineError;

const MAX_REWRITES: usize = 2;

#[derive(Deserialize)]
struct RewriteResponse {
    rewrites: Vec<RewriteCandidate>,
}

#[derive(Deserialize)]
struct RewriteCandidate {
    text: String,
    confidence: f32,
}

pub struct RewriteGenerator {
    gateway: Arc<ReasoningGateway>,
    timeout: Duration,
}

impl RewriteGenerator {
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

    /// Empty without a model call unless the verdict is overstated or
    /// disputed and there is at least one source to align with.
    pub async fn generate(
        &self,
        original_text: &str,
        verdict: Verdict,
        sources: &[RankedSource],
    ) -> Result<Vec<Rewrite>, PipelineError> {
        if !verdict.needs_rewrite() || sources.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = rewrite_prompt(original_text, sources);
        let response: RewriteResponse = self
            .gateway
            .call_json(&prompt, REWRITE_MAX_TOKENS, self.timeout)
            .await?;

        let mut rewrites = Vec::with_capacity(MAX_REWRITES);
        for candidate in response.rewrites {
            if rewrites.len() == MAX_REWRITES {
                break;
            }
            if !(0.0..=1.0).contains(&candidate.confidence) {
                tracing::debug!(
                    confidence = candidate.confidence,
                    "Dropping rewrite with out-of-range confidence"
                );
                continue;
            }
            let text = sanitize_model_output(candidate.text.trim());
            if text.is_empty() {
                continue;
            }
            rewrites.push(Rewrite {
                text,
                confidence: candidate.confidence,
            });
        }

        if rewrites.is_empty() {
            return Err(PipelineError::Parse("no usable rewrites".into()));
        }
        Ok(rewrites)
    }
}
