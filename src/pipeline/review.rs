//! Document review: extract many claims and rank them by rule-based risk.
//!
//! No evidence retrieval happens here. The score only says which claims
//! deserve a full check first.

use std::sync::{Arc, LazyLock};
use std::time::Instant;

use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::extractor::ClaimExtractor;
use super::types::Span;
use super::PipelineError;
use crate::config::REVIEW_EXTRACTION_CLAIMS;

static SUPERLATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(all|every|never|always|none|no one|everyone|best|worst|most|least|largest|smallest|greatest|only)\b")
        .expect("valid regex")
});
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d[\d,.]*%?").expect("valid regex"));
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(19|20)\d{2}\b|\b(january|february|march|april|may|june|july|august|september|october|november|december)\s+\d")
        .expect("valid regex")
});
static STATISTICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(percent|percentage|average|median|rate|ratio|statistic|study|survey|research shows|data|according to)\b")
        .expect("valid regex")
});
static INLINE_CITATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(.*?\d{4}\)|\[\d+\]").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSignal {
    Superlative,
    SpecificNumber,
    SpecificDate,
    StatisticalAssertion,
    NoCitation,
}

impl RiskSignal {
    fn weight(&self) -> f32 {
        match self {
            Self::Superlative => 0.3,
            Self::SpecificNumber => 0.2,
            Self::SpecificDate => 0.15,
            Self::StatisticalAssertion => 0.25,
            Self::NoCitation => 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryVerdict {
    LikelyOverstated,
    NeedsReview,
    LikelyOk,
}

impl SummaryVerdict {
    pub fn from_score(score: f32) -> Self {
        if score > 0.7 {
            Self::LikelyOverstated
        } else if score > 0.4 {
            Self::NeedsReview
        } else {
            Self::LikelyOk
        }
    }
}

/// Risk score in [0, 1] and the signals that produced it.
pub fn score_risk(text: &str) -> (f32, Vec<RiskSignal>) {
    let mut signals = Vec::new();
    if SUPERLATIVE_RE.is_match(text) {
        signals.push(RiskSignal::Superlative);
    }
    if NUMBER_RE.is_match(text) {
        signals.push(RiskSignal::SpecificNumber);
    }
    if DATE_RE.is_match(text) {
        signals.push(RiskSignal::SpecificDate);
    }
    if STATISTICAL_RE.is_match(text) {
        signals.push(RiskSignal::StatisticalAssertion);
    }
    if !INLINE_CITATION_RE.is_match(text) {
        signals.push(RiskSignal::NoCitation);
    }
    let score: f32 = signals.iter().map(RiskSignal::weight).sum();
    (score.min(1.0), signals)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighRiskClaim {
    pub claim_id: Uuid,
    pub original_text: String,
    pub span: Span,
    pub risk_score: f32,
    pub risk_signals: Vec<RiskSignal>,
    pub summary_verdict: SummaryVerdict,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetadata {
    pub processing_time_ms: u64,
    pub words_processed: usize,
    pub claims_scored: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResult {
    pub request_id: Uuid,
    pub total_claims_found: usize,
    pub high_risk_claims: Vec<HighRiskClaim>,
    pub metadata: ReviewMetadata,
}

pub struct DocumentReviewer {
    extractor: Arc<ClaimExtractor>,
}

impl DocumentReviewer {
    pub fn new(extractor: Arc<ClaimExtractor>) -> Self {
        Self { extractor }
    }

    /// Extraction failures abort the review; there is nothing to isolate.
    pub async fn review(&self, text: &str, max_risk_claims: usize) -> Result<ReviewResult, PipelineError> {
        let started = Instant::now();
        let request_id = Uuid::new_v4();
        let claims = self.extractor.extract(text, REVIEW_EXTRACTION_CLAIMS).await?;

        let mut scored: Vec<HighRiskClaim> = claims
            .iter()
            .map(|claim| {
                let (risk_score, risk_signals) = score_risk(&claim.original_text);
                HighRiskClaim {
                    claim_id: Uuid::new_v4(),
                    original_text: claim.original_text.clone(),
                    span: claim.span,
                    risk_score,
                    risk_signals,
                    summary_verdict: SummaryVerdict::from_score(risk_score),
                }
            })
            .collect();
        scored.sort_by(|a, b| b.risk_score.total_cmp(&a.risk_score));
        scored.truncate(max_risk_claims);

        tracing::info!(
            request_id = %request_id,
            found = claims.len(),
            reported = scored.len(),
            "Document reviewed"
        );

        Ok(ReviewResult {
            request_id,
            total_claims_found: claims.len(),
            high_risk_claims: scored,
            metadata: ReviewMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                words_processed: text.split_whitespace().count(),
                claims_scored: claims.len(),
            },
        })
    }
}
