//! PipelineOrchestrator: extraction, per-claim fan-out, aggregation.
//!
//! Per claim: cache → evidence → rank → adjudicate → (rewrite) → cite → cache.
//! Any failure inside one claim is caught at that claim's boundary and turns
//! it into an `unclear` result; siblings and the request carry on. Only
//! validation and extraction failures fail the request.
//!
//! Claims run concurrently, bounded by `concurrency`. Results land in a
//! slot per extraction index, so completion order does not matter.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::adjudicator::VerdictAdjudicator;
use super::cache::{analyze_key, ResultCache};
use super::citation::cite;
use super::evidence::EvidenceProvider;
use super::extractor::ClaimExtractor;
use super::gateway::ReasoningGateway;
use super::ranking::SourceRanker;
use super::rewrite::RewriteGenerator;
use super::types::{
    CitationStyle, PipelineEvent, PipelineMetadata, PipelineRequest, PipelineResult,
    ProcessedClaim, RawClaim, Verdict,
};
use super::PipelineError;
use crate::config::{ANALYZE_MAX_CHARS, ANALYZE_MAX_CLAIMS, ANALYZE_RESULT_TTL, DEFAULT_CLAIM_CONCURRENCY};

pub const CLAIM_FAILURE_EXPLANATION: &str =
    "We could not verify this claim at this time. Please try again later.";
pub const REQUEST_FAILURE_MESSAGE: &str =
    "We could not analyze this text right now. Please try again later.";

/// Last stage a claim completed; logged when a claim fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStage {
    Extracted,
    CacheChecked,
    EvidenceFetched,
    Ranked,
    Adjudicated,
    Rewritten,
    Cited,
    Done,
}

impl fmt::Display for ClaimStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Extracted => "extracted",
            Self::CacheChecked => "cache_checked",
            Self::EvidenceFetched => "evidence_fetched",
            Self::Ranked => "ranked",
            Self::Adjudicated => "adjudicated",
            Self::Rewritten => "rewritten",
            Self::Cited => "cited",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Outcome of a synchronous analyze run.
#[derive(Debug, Clone)]
pub struct AnalyzeOutcome {
    pub result: PipelineResult,
    /// Served whole from the request-level cache.
    pub cache_hit: bool,
}

struct Completed {
    result: PipelineResult,
    cache_hit: bool,
}

/// Message safe to show a client for a request-level failure.
pub fn public_message(err: &PipelineError) -> String {
    match err {
        PipelineError::Validation(msg) => msg.clone(),
        _ => REQUEST_FAILURE_MESSAGE.to_string(),
    }
}

/// Reject malformed or oversized requests before any upstream call.
pub fn validate_request(request: &PipelineRequest) -> Result<(), PipelineError> {
    if request.text.trim().is_empty() {
        return Err(PipelineError::Validation("text must not be empty".into()));
    }
    let chars = request.text.chars().count();
    if chars > ANALYZE_MAX_CHARS {
        return Err(PipelineError::Validation(format!(
            "text is {chars} characters; the limit is {ANALYZE_MAX_CHARS}"
        )));
    }
    if !(1..=ANALYZE_MAX_CLAIMS).contains(&request.max_claims) {
        return Err(PipelineError::Validation(format!(
            "max_claims must be between 1 and {ANALYZE_MAX_CLAIMS}"
        )));
    }
    Ok(())
}

fn unverified(claim: &RawClaim) -> ProcessedClaim {
    ProcessedClaim {
        claim_id: Uuid::new_v4(),
        original_text: claim.original_text.clone(),
        span: claim.span,
        verdict: Verdict::Unclear,
        explanation: CLAIM_FAILURE_EXPLANATION.to_string(),
        sources: Vec::new(),
        rewrites: Vec::new(),
    }
}

pub struct PipelineOrchestrator {
    extractor: Arc<ClaimExtractor>,
    evidence: Arc<dyn EvidenceProvider>,
    ranker: SourceRanker,
    adjudicator: VerdictAdjudicator,
    rewriter: RewriteGenerator,
    cache: ResultCache,
    concurrency: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        gateway: Arc<ReasoningGateway>,
        evidence: Arc<dyn EvidenceProvider>,
        cache: ResultCache,
    ) -> Self {
        Self {
            extractor: Arc::new(ClaimExtractor::new(gateway.clone())),
            evidence,
            ranker: SourceRanker::new(),
            adjudicator: VerdictAdjudicator::new(gateway.clone()),
            rewriter: RewriteGenerator::new(gateway),
            cache,
            concurrency: DEFAULT_CLAIM_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_ranker(mut self, ranker: SourceRanker) -> Self {
        self.ranker = ranker;
        self
    }

    /// Shared with document review.
    pub fn extractor(&self) -> Arc<ClaimExtractor> {
        self.extractor.clone()
    }

    // ═══════════════════════════════════════════════════════════
    // Entry points
    // ═══════════════════════════════════════════════════════════

    /// Run to completion and return the aggregate result.
    pub async fn run(&self, request: &PipelineRequest) -> Result<AnalyzeOutcome, PipelineError> {
        validate_request(request)?;
        let request_id = Uuid::new_v4();
        match self.drive(request, request_id, |_| true).await? {
            Some(done) => Ok(AnalyzeOutcome {
                result: done.result,
                cache_hit: done.cache_hit,
            }),
            // The callback never stops the run.
            None => Err(PipelineError::Validation("analysis was cancelled".into())),
        }
    }

    /// Run and report progress on `events`.
    ///
    /// Emits `Extraction`, then one `Claim` per claim in completion order,
    /// then exactly one `Done` or `Error`. Returns early, abandoning
    /// in-flight claims, once the receiver is dropped.
    pub async fn run_streaming(
        &self,
        request: &PipelineRequest,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) -> Option<PipelineResult> {
        let request_id = Uuid::new_v4();
        let outcome = match validate_request(request) {
            Ok(()) => {
                self.drive(request, request_id, |event| events.send(event).is_ok())
                    .await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(done)) => {
                let terminal = PipelineEvent::Done {
                    request_id,
                    metadata: done.result.metadata.clone(),
                };
                if events.send(terminal).is_err() {
                    tracing::debug!(request_id = %request_id, "Stream consumer left before done");
                }
                Some(done.result)
            }
            Ok(None) => {
                tracing::info!(request_id = %request_id, "Stream consumer disconnected, abandoning claims");
                None
            }
            Err(e) => {
                tracing::warn!(request_id = %request_id, kind = e.kind(), error = %e, "Streaming analysis failed");
                let _ = events.send(PipelineEvent::Error {
                    request_id,
                    message: public_message(&e),
                });
                None
            }
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Core
    // ═══════════════════════════════════════════════════════════

    /// `emit` returns false when nobody is listening any more; the run then
    /// stops and yields `None`.
    async fn drive<F>(
        &self,
        request: &PipelineRequest,
        request_id: Uuid,
        mut emit: F,
    ) -> Result<Option<Completed>, PipelineError>
    where
        F: FnMut(PipelineEvent) -> bool,
    {
        let started = Instant::now();
        let style = request.citation_style;
        let request_key = analyze_key(&request.text, style, request.max_claims);

        if let Some(mut cached) = self.cache.get::<PipelineResult>(&request_key).await {
            tracing::info!(request_id = %request_id, claims = cached.claims.len(), "Analyze cache hit");
            if !emit(PipelineEvent::Extraction {
                total: cached.claims.len(),
            }) {
                return Ok(None);
            }
            for (index, claim) in cached.claims.iter().enumerate() {
                if !emit(PipelineEvent::Claim {
                    index,
                    claim: claim.clone(),
                }) {
                    return Ok(None);
                }
            }
            cached.request_id = request_id;
            cached.metadata.processing_time_ms = started.elapsed().as_millis() as u64;
            return Ok(Some(Completed {
                result: cached,
                cache_hit: true,
            }));
        }

        let claims = self.extractor.extract(&request.text, request.max_claims).await?;
        let total = claims.len();
        tracing::info!(request_id = %request_id, total, "Extraction complete");
        if !emit(PipelineEvent::Extraction { total }) {
            return Ok(None);
        }

        let mut slots: Vec<Option<ProcessedClaim>> = vec![None; total];
        let mut all_verified = true;
        let mut pending = stream::iter(claims.into_iter().enumerate())
            .map(|(index, claim)| async move {
                let (processed, verified) = self.process_claim(request_id, index, &claim, style).await;
                (index, processed, verified)
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, processed, verified)) = pending.next().await {
            all_verified &= verified;
            if !emit(PipelineEvent::Claim {
                index,
                claim: processed.clone(),
            }) {
                return Ok(None);
            }
            slots[index] = Some(processed);
        }
        drop(pending);

        let claims: Vec<ProcessedClaim> = slots.into_iter().flatten().collect();
        let result = PipelineResult {
            request_id,
            metadata: PipelineMetadata {
                processing_time_ms: started.elapsed().as_millis() as u64,
                claims_extracted: claims.len(),
                citation_style: style,
            },
            claims,
        };

        // A result with downgraded claims would pin the failure for days.
        if all_verified {
            self.cache.set(&request_key, &result, ANALYZE_RESULT_TTL).await;
        }

        tracing::info!(
            request_id = %request_id,
            claims = result.claims.len(),
            all_verified,
            elapsed_ms = result.metadata.processing_time_ms,
            "Analysis complete"
        );
        Ok(Some(Completed {
            result,
            cache_hit: false,
        }))
    }

    /// Never fails: errors become an `unclear` claim. The flag is false for
    /// downgraded claims.
    async fn process_claim(
        &self,
        request_id: Uuid,
        index: usize,
        claim: &RawClaim,
        style: CitationStyle,
    ) -> (ProcessedClaim, bool) {
        let mut stage = ClaimStage::Extracted;
        match self.verify_claim(claim, style, &mut stage).await {
            Ok(processed) => (processed, true),
            Err(e) => {
                tracing::warn!(
                    request_id = %request_id,
                    claim_index = index,
                    stage = %stage,
                    kind = e.kind(),
                    error = %e,
                    "Claim processing failed, reporting as unclear"
                );
                (unverified(claim), false)
            }
        }
    }

    async fn verify_claim(
        &self,
        claim: &RawClaim,
        style: CitationStyle,
        stage: &mut ClaimStage,
    ) -> Result<ProcessedClaim, PipelineError> {
        let cached = self.cache.get_claim(claim, style).await;
        *stage = ClaimStage::CacheChecked;
        if let Some(hit) = cached {
            *stage = ClaimStage::Done;
            return Ok(hit);
        }

        let documents = self.evidence.search(&claim.claim_text()).await?;
        *stage = ClaimStage::EvidenceFetched;

        let ranked = self.ranker.rank(claim, &documents);
        *stage = ClaimStage::Ranked;

        let adjudication = self.adjudicator.adjudicate(claim, &ranked).await?;
        *stage = ClaimStage::Adjudicated;

        let rewrites = self
            .rewriter
            .generate(&claim.original_text, adjudication.verdict, &ranked)
            .await?;
        if !rewrites.is_empty() {
            *stage = ClaimStage::Rewritten;
        }

        let sources = ranked.iter().map(|s| cite(s, style)).collect();
        *stage = ClaimStage::Cited;

        let processed = ProcessedClaim {
            claim_id: Uuid::new_v4(),
            original_text: claim.original_text.clone(),
            span: claim.span,
            verdict: adjudication.verdict,
            explanation: adjudication.explanation,
            sources,
            rewrites,
        };
        self.cache.set_claim(claim, style, &processed).await;
        *stage = ClaimStage::Done;
        Ok(processed)
    }
}
