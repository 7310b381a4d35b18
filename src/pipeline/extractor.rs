//! ClaimExtractor: segment text into discrete factual assertions.
//!
//! Model-reported offsets are not trusted. Every claim's span is re-derived
//! by matching its text against the cleaned text the model saw, then mapped
//! back to char offsets in the request text:
//! exact → ASCII case-insensitive → 60-char prefix extended to the next
//! sentence terminator → zero-length span with the model text kept for display.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::gateway::{ReasoningGateway, EXTRACTION_TIMEOUT};
use super::prompt_templates::{extraction_prompt, EXTRACTION_MAX_TOKENS};
use super::sanitize::clean_with_offsets;
use super::types::{RawClaim, Span};
use super::PipelineError;

const PREFIX_MATCH_CHARS: usize = 60;

// ═══════════════════════════════════════════════════════════
// Model response shape
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct ExtractedClaim {
    #[serde(default)]
    subject: String,
    #[serde(default)]
    predicate: String,
    #[serde(default)]
    numbers: Option<serde_json::Value>,
    #[serde(default)]
    dates: Option<serde_json::Value>,
    #[serde(default, alias = "originalText", alias = "sentence")]
    original_text: Option<String>,
    #[serde(default, alias = "spanStart")]
    span_start: Option<i64>,
    #[serde(default, alias = "spanEnd")]
    span_end: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExtractionResponse {
    Wrapped { claims: Vec<ExtractedClaim> },
    Bare(Vec<ExtractedClaim>),
}

impl ExtractionResponse {
    fn into_claims(self) -> Vec<ExtractedClaim> {
        match self {
            Self::Wrapped { claims } | Self::Bare(claims) => claims,
        }
    }
}

/// Numbers and dates arrive as strings, numbers, arrays or null. Array
/// elements stay separate values.
fn loose_list(value: Option<serde_json::Value>) -> Vec<String> {
    let text = match value {
        None | Some(serde_json::Value::Null) => return Vec::new(),
        Some(serde_json::Value::Array(items)) => {
            return items
                .into_iter()
                .flat_map(|v| loose_list(Some(v)))
                .collect();
        }
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    };
    let text = text.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("null") {
        Vec::new()
    } else {
        vec![text.to_string()]
    }
}

// ═══════════════════════════════════════════════════════════
// Span resolution
// ═══════════════════════════════════════════════════════════

fn char_offset(text: &str, byte: usize) -> usize {
    text[..byte].chars().count()
}

/// Slice by character offsets, or `None` if out of range.
pub fn slice_chars(text: &str, span: Span) -> Option<&str> {
    if span.is_empty() {
        return None;
    }
    let boundary = |n: usize| {
        text.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .nth(n)
    };
    text.get(boundary(span.start)?..boundary(span.end)?)
}

/// Map a span over the cleaned text onto the raw text. Stripped characters
/// inside the span stay inside it.
fn to_raw_span(span: Span, raw_offsets: &[usize]) -> Span {
    if span.is_empty() {
        return Span::default();
    }
    match (raw_offsets.get(span.start), raw_offsets.get(span.end - 1)) {
        (Some(&start), Some(&last)) => Span::new(start, last + 1),
        _ => Span::default(),
    }
}

fn to_span(text: &str, byte_start: usize, byte_end: usize) -> Span {
    Span::new(char_offset(text, byte_start), char_offset(text, byte_end))
}

/// Locate `needle` in `text`. Returns a char-offset span, empty when unmatched.
pub fn resolve_span(text: &str, needle: &str) -> Span {
    let needle = needle.trim();
    if needle.is_empty() || text.is_empty() {
        return Span::default();
    }

    // (a) exact
    if let Some(start) = text.find(needle) {
        return to_span(text, start, start + needle.len());
    }

    // (b) case-insensitive; ASCII folding keeps byte offsets aligned
    let folded_text = text.to_ascii_lowercase();
    let folded_needle = needle.to_ascii_lowercase();
    if let Some(start) = folded_text.find(&folded_needle) {
        return to_span(text, start, start + folded_needle.len());
    }

    // (c) prefix, extended to the next sentence terminator
    if needle.chars().count() > PREFIX_MATCH_CHARS {
        let prefix_end = needle
            .char_indices()
            .nth(PREFIX_MATCH_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(needle.len());
        let prefix = &folded_needle[..prefix_end];
        if let Some(start) = folded_text.find(prefix) {
            let search_from = start + prefix.len();
            let end = text[search_from..]
                .find(['.', '!', '?'])
                .map(|i| search_from + i + 1)
                .unwrap_or(text.len());
            return to_span(text, start, end);
        }
    }

    // (d) unmatched
    Span::default()
}

// ═══════════════════════════════════════════════════════════
// Extractor
// ═══════════════════════════════════════════════════════════

pub struct ClaimExtractor {
    gateway: Arc<ReasoningGateway>,
    timeout: Duration,
}

impl ClaimExtractor {
    pub fn new(gateway: Arc<ReasoningGateway>) -> Self {
        Self {
            gateway,
            timeout: EXTRACTION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Up to `max_claims` claims in model order, spans relative to `text`.
    /// Gateway exhaustion and malformed output are request-level failures.
    pub async fn extract(&self, text: &str, max_claims: usize) -> Result<Vec<RawClaim>, PipelineError> {
        let max_claims = max_claims.max(1);
        let (cleaned, raw_offsets) = clean_with_offsets(text);
        let prompt = extraction_prompt(&cleaned, max_claims);
        let response: ExtractionResponse = self
            .gateway
            .call_json(&prompt, EXTRACTION_MAX_TOKENS, self.timeout)
            .await?;

        let extracted = response.into_claims();
        let reported = extracted.len();
        let claims: Vec<RawClaim> = extracted
            .into_iter()
            .filter_map(|c| build_claim(&cleaned, &raw_offsets, c))
            .take(max_claims)
            .collect();

        let unanchored = claims.iter().filter(|c| c.span.is_empty()).count();
        tracing::debug!(
            reported,
            kept = claims.len(),
            unanchored,
            "Claims extracted"
        );
        Ok(claims)
    }
}

/// `text` is the cleaned text the model saw; the span is mapped back to the
/// request text through `raw_offsets`.
fn build_claim(text: &str, raw_offsets: &[usize], raw: ExtractedClaim) -> Option<RawClaim> {
    let subject = raw.subject.trim().to_string();
    let predicate = raw.predicate.trim().to_string();

    let reported_slice = match (raw.span_start, raw.span_end) {
        (Some(s), Some(e)) if s >= 0 && e > s => {
            slice_chars(text, Span::new(s as usize, e as usize)).map(str::to_string)
        }
        _ => None,
    };

    let original_text = raw
        .original_text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .or(reported_slice)
        .or_else(|| {
            let joined = format!("{subject} {predicate}");
            let joined = joined.trim();
            (!joined.is_empty()).then(|| joined.to_string())
        })?;

    let span = to_raw_span(resolve_span(text, &original_text), raw_offsets);
    Some(RawClaim {
        subject,
        predicate,
        numbers: loose_list(raw.numbers),
        dates: loose_list(raw.dates),
        original_text,
        span,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gateway::tests::ScriptedBackend;

    const TEXT: &str = "Water boils at 100°C at sea level. The Great Wall is visible from space! Einstein was born in 1879.";

    fn extractor(response: &str) -> ClaimExtractor {
        let backend = Arc::new(ScriptedBackend::new("scripted", vec![Ok(response)]));
        let gateway = ReasoningGateway::new(vec![backend]).with_retry(0, Duration::from_millis(1));
        ClaimExtractor::new(Arc::new(gateway))
    }

    #[test]
    fn exact_match_uses_char_offsets() {
        let span = resolve_span(TEXT, "The Great Wall is visible from space!");
        assert_eq!(
            slice_chars(TEXT, span),
            Some("The Great Wall is visible from space!")
        );
        assert!(span.is_valid_for(TEXT.chars().count()));
        // "°" is one char but two bytes
        assert_eq!(span.start, TEXT.find("The Great").unwrap() - 1);
    }

    #[test]
    fn case_insensitive_match() {
        let span = resolve_span(TEXT, "einstein WAS born in 1879.");
        assert_eq!(slice_chars(TEXT, span), Some("Einstein was born in 1879."));
    }

    #[test]
    fn long_paraphrase_matches_on_prefix() {
        let text = "Intro. The committee concluded after a lengthy review that the bridge was structurally sound, mostly. Next.";
        let needle = "The committee concluded after a lengthy review that the bridge was structurally sound and safe";
        let span = resolve_span(text, needle);
        assert_eq!(
            slice_chars(text, span),
            Some("The committee concluded after a lengthy review that the bridge was structurally sound, mostly.")
        );
    }

    #[test]
    fn unmatched_text_gets_empty_span() {
        assert_eq!(resolve_span(TEXT, "Mars has two moons."), Span::default());
        assert_eq!(resolve_span(TEXT, "   "), Span::default());
    }

    #[test]
    fn loose_values_become_separate_strings() {
        assert_eq!(loose_list(Some(serde_json::json!(100))), vec!["100"]);
        assert_eq!(
            loose_list(Some(serde_json::json!(["1879", 1955, null, " "]))),
            vec!["1879", "1955"]
        );
        assert!(loose_list(Some(serde_json::Value::Null)).is_empty());
        assert!(loose_list(Some(serde_json::json!("null"))).is_empty());
        assert!(loose_list(None).is_empty());
    }

    #[tokio::test]
    async fn extracts_and_resolves_spans() {
        let response = r#"```json
{"claims": [
  {"subject": "Water", "predicate": "boils at 100°C at sea level", "numbers": 100, "dates": null,
   "original_text": "Water boils at 100°C at sea level.", "span_start": 999, "span_end": 1200},
  {"subject": "Einstein", "predicate": "was born in 1879", "numbers": null, "dates": "1879",
   "span_start": 73, "span_end": 99}
]}
```"#;
        let claims = extractor(response).extract(TEXT, 10).await.unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].span.start, 0);
        assert_eq!(claims[0].numbers, vec!["100"]);
        assert_eq!(claims[1].dates, vec!["1879"]);
        assert_eq!(claims[1].original_text, "Einstein was born in 1879.");
        assert_eq!(claims[1].span, Span::new(73, 99));
        for claim in &claims {
            assert!(!claim.original_text.is_empty());
            if !claim.span.is_empty() {
                assert!(claim.span.is_valid_for(TEXT.chars().count()));
            }
        }
    }

    #[tokio::test]
    async fn spans_survive_stripped_invisible_characters() {
        let text = "Water boils at 100°C.\u{200B} The Great Wall is visi\u{200B}ble from space!";
        let response = r#"{"claims": [{"subject": "Great Wall", "predicate": "is visible from space",
            "dates": ["1987", "2003"], "original_text": "The Great Wall is visible from space!"}]}"#;
        let claims = extractor(response).extract(text, 5).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].dates, vec!["1987", "2003"]);
        assert!(claims[0].span.is_valid_for(text.chars().count()));
        assert_eq!(
            slice_chars(text, claims[0].span),
            Some("The Great Wall is visi\u{200B}ble from space!")
        );
    }

    #[tokio::test]
    async fn unmatched_claims_are_kept_with_display_text() {
        let response = r#"[{"subject": "Mars", "predicate": "has two moons"}]"#;
        let claims = extractor(response).extract(TEXT, 10).await.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].original_text, "Mars has two moons");
        assert!(claims[0].span.is_empty());
    }

    #[tokio::test]
    async fn truncates_to_max_claims_and_drops_empty() {
        let response = r#"{"claims": [
            {"subject": "", "predicate": ""},
            {"subject": "A", "predicate": "one"},
            {"subject": "B", "predicate": "two"},
            {"subject": "C", "predicate": "three"}
        ]}"#;
        let claims = extractor(response).extract(TEXT, 2).await.unwrap();
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].subject, "A");
    }

    #[tokio::test]
    async fn malformed_json_aborts_extraction() {
        let err = extractor("Sure! Here are the claims: ...")
            .extract(TEXT, 5)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }
}
