use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ═══════════════════════════════════════════════════════════
// Citation style / format
// ═══════════════════════════════════════════════════════════

/// Supported citation styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationStyle {
    #[default]
    Mla,
    Apa,
    Chicago,
}

impl CitationStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mla => "mla",
            Self::Apa => "apa",
            Self::Chicago => "chicago",
        }
    }
}

impl fmt::Display for CitationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CitationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mla" => Ok(Self::Mla),
            "apa" => Ok(Self::Apa),
            "chicago" => Ok(Self::Chicago),
            other => Err(format!("unknown citation style: {other}")),
        }
    }
}

/// Which rendering(s) of a citation to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationFormat {
    Inline,
    Bibliography,
    #[default]
    Both,
}

// ═══════════════════════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════════════════════

/// Adjudicated status of a claim. Exactly one of four values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Supported,
    Overstated,
    Disputed,
    Unclear,
}

impl Verdict {
    /// Map a model-produced label onto the canonical vocabulary.
    ///
    /// Older prompt revisions used `broadly_supported` and `contested`/`refuted`;
    /// those are folded in here so nothing else has to know about them.
    pub fn from_model_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "supported" | "broadly_supported" => Some(Self::Supported),
            "overstated" | "exaggerated" => Some(Self::Overstated),
            "disputed" | "contested" | "refuted" => Some(Self::Disputed),
            "unclear" => Some(Self::Unclear),
            _ => None,
        }
    }

    /// Only overstated and disputed claims get rewrite suggestions.
    pub fn needs_rewrite(&self) -> bool {
        matches!(self, Self::Overstated | Self::Disputed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Supported => "supported",
            Self::Overstated => "overstated",
            Self::Disputed => "disputed",
            Self::Unclear => "unclear",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Claims
// ═══════════════════════════════════════════════════════════

/// Character-offset range into the request text. `start == end` means the
/// claim could not be located and carries display text only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// True when the span is non-empty and fits inside `text_len` characters.
    pub fn is_valid_for(&self, text_len: usize) -> bool {
        self.start < self.end && self.end <= text_len
    }
}

/// A claim as extracted from one request. Never outlives the pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RawClaim {
    pub subject: String,
    pub predicate: String,
    /// Each value as the model quoted it; matched one at a time.
    pub numbers: Vec<String>,
    pub dates: Vec<String>,
    /// Always non-empty.
    pub original_text: String,
    pub span: Span,
}

impl RawClaim {
    /// Compact "subject predicate" form used for search and relevance.
    pub fn claim_text(&self) -> String {
        let joined = format!("{} {}", self.subject.trim(), self.predicate.trim());
        let joined = joined.trim();
        if joined.is_empty() {
            self.original_text.clone()
        } else {
            joined.to_string()
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Evidence and ranking
// ═══════════════════════════════════════════════════════════

/// A raw search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDocument {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_published: Option<String>,
}

/// Coarse reliability class of a source domain (1 = authoritative … 4 = user-editable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SourceTier {
    Authoritative = 1,
    Reference = 2,
    General = 3,
    UserEditable = 4,
}

impl SourceTier {
    pub fn base_score(&self) -> f32 {
        match self {
            Self::Authoritative => 1.0,
            Self::Reference => 0.75,
            Self::General => 0.4,
            Self::UserEditable => 0.3,
        }
    }

    /// Tier 1 and 2 sources are guaranteed a place in the selection.
    pub fn is_trusted(&self) -> bool {
        matches!(self, Self::Authoritative | Self::Reference)
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl From<SourceTier> for u8 {
    fn from(tier: SourceTier) -> u8 {
        tier.as_u8()
    }
}

impl TryFrom<u8> for SourceTier {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Authoritative),
            2 => Ok(Self::Reference),
            3 => Ok(Self::General),
            4 => Ok(Self::UserEditable),
            other => Err(format!("reliability tier out of range: {other}")),
        }
    }
}

/// An evidence document scored against one claim.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedSource {
    pub source_id: Uuid,
    pub document: EvidenceDocument,
    pub tier: SourceTier,
    /// Always within [0, 1].
    pub score: f32,
}

/// A ranked source with its citation strings attached; what clients see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitedSource {
    pub source_id: Uuid,
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub domain: String,
    pub reliability_tier: SourceTier,
    pub score: f32,
    pub citation_inline: String,
    pub citation_bibliography: String,
}

// ═══════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════

/// An evidence-aligned rewording of an overstated or disputed claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rewrite {
    pub text: String,
    pub confidence: f32,
}

/// The unit that is cached and streamed. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedClaim {
    pub claim_id: Uuid,
    pub original_text: String,
    pub span: Span,
    pub verdict: Verdict,
    pub explanation: String,
    pub sources: Vec<CitedSource>,
    pub rewrites: Vec<Rewrite>,
}

impl ProcessedClaim {
    /// Re-anchor a cached result onto the claim extracted for this request.
    pub fn anchored_to(&self, claim: &RawClaim) -> Self {
        Self {
            claim_id: Uuid::new_v4(),
            original_text: claim.original_text.clone(),
            span: claim.span,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRequest {
    pub text: String,
    pub citation_style: CitationStyle,
    pub max_claims: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    pub processing_time_ms: u64,
    pub claims_extracted: usize,
    pub citation_style: CitationStyle,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub request_id: Uuid,
    pub claims: Vec<ProcessedClaim>,
    pub metadata: PipelineMetadata,
}

// ═══════════════════════════════════════════════════════════
// Streaming events
// ═══════════════════════════════════════════════════════════

/// Incremental progress of one analyze request.
///
/// Order: one `Extraction`, then `Claim` events in completion order, then
/// exactly one terminal `Done` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Extraction { total: usize },
    Claim { index: usize, claim: ProcessedClaim },
    Done { request_id: Uuid, metadata: PipelineMetadata },
    Error { request_id: Uuid, message: String },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extraction { .. } => "extraction",
            Self::Claim { .. } => "claim",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// JSON payload sent as the event's data field.
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Extraction { total } => serde_json::json!({ "total": total }),
            Self::Claim { index, claim } => serde_json::json!({ "index": index, "claim": claim }),
            Self::Done {
                request_id,
                metadata,
            } => serde_json::json!({ "request_id": request_id, "metadata": metadata }),
            Self::Error {
                request_id,
                message,
            } => serde_json::json!({ "request_id": request_id, "message": message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_verdict_labels_map_to_canonical() {
        assert_eq!(Verdict::from_model_label("broadly_supported"), Some(Verdict::Supported));
        assert_eq!(Verdict::from_model_label("Contested"), Some(Verdict::Disputed));
        assert_eq!(Verdict::from_model_label("refuted"), Some(Verdict::Disputed));
        assert_eq!(Verdict::from_model_label(" Overstated "), Some(Verdict::Overstated));
        assert_eq!(Verdict::from_model_label("true"), None);
    }

    #[test]
    fn only_overstated_and_disputed_need_rewrites() {
        assert!(Verdict::Overstated.needs_rewrite());
        assert!(Verdict::Disputed.needs_rewrite());
        assert!(!Verdict::Supported.needs_rewrite());
        assert!(!Verdict::Unclear.needs_rewrite());
    }

    #[test]
    fn verdict_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Verdict::Supported).unwrap(), "\"supported\"");
    }

    #[test]
    fn tier_serializes_as_number() {
        assert_eq!(serde_json::to_string(&SourceTier::Reference).unwrap(), "2");
        let tier: SourceTier = serde_json::from_str("4").unwrap();
        assert_eq!(tier, SourceTier::UserEditable);
        assert!(serde_json::from_str::<SourceTier>("7").is_err());
    }

    #[test]
    fn citation_style_parses_case_insensitively() {
        assert_eq!("APA".parse::<CitationStyle>().unwrap(), CitationStyle::Apa);
        assert!("harvard".parse::<CitationStyle>().is_err());
    }

    #[test]
    fn span_validity() {
        assert!(Span::new(0, 5).is_valid_for(5));
        assert!(!Span::new(0, 6).is_valid_for(5));
        assert!(!Span::new(3, 3).is_valid_for(5));
        assert!(Span::default().is_empty());
    }

    #[test]
    fn claim_text_falls_back_to_original() {
        let claim = RawClaim {
            subject: " ".into(),
            predicate: "".into(),
            numbers: vec![],
            dates: vec![],
            original_text: "The sky is blue.".into(),
            span: Span::default(),
        };
        assert_eq!(claim.claim_text(), "The sky is blue.");
    }

    #[test]
    fn anchoring_replaces_identity_and_span() {
        let claim = RawClaim {
            subject: "Water".into(),
            predicate: "boils at 100C".into(),
            numbers: vec!["100".into()],
            dates: vec![],
            original_text: "Water boils at 100C.".into(),
            span: Span::new(10, 30),
        };
        let cached = ProcessedClaim {
            claim_id: Uuid::new_v4(),
            original_text: "old".into(),
            span: Span::new(0, 3),
            verdict: Verdict::Supported,
            explanation: "ok".into(),
            sources: vec![],
            rewrites: vec![],
        };
        let anchored = cached.anchored_to(&claim);
        assert_ne!(anchored.claim_id, cached.claim_id);
        assert_eq!(anchored.span, Span::new(10, 30));
        assert_eq!(anchored.original_text, "Water boils at 100C.");
        assert_eq!(anchored.verdict, Verdict::Supported);
    }

    #[test]
    fn event_payloads_carry_index() {
        let event = PipelineEvent::Extraction { total: 3 };
        assert_eq!(event.name(), "extraction");
        assert_eq!(event.payload()["total"], 3);
        assert!(!event.is_terminal());
    }
}
