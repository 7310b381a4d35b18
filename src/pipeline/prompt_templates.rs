//! Prompt templates for the three model-backed stages.
//!
//! Each builder returns a complete `Prompt`. Everything the model is allowed
//! to know is in the prompt: the adjudication and rewrite prompts carry only
//! the ranked source snippets, never anything else.

use std::fmt::Write;

use super::gateway::Prompt;
use super::types::{RankedSource, RawClaim};

pub const EXTRACTION_MAX_TOKENS: u32 = 1_000;
pub const VERDICT_MAX_TOKENS: u32 = 500;
pub const REWRITE_MAX_TOKENS: u32 = 300;

// ═══════════════════════════════════════════════════════════
// Extraction
// ═══════════════════════════════════════════════════════════

const EXTRACTION_SYSTEM: &str = "\
You extract discrete factual assertions from text.
- Keep only checkable statements of fact. Skip opinions, questions, hedges and value judgements.
- Do not judge whether a claim is true.
- Prefer one to three claims per paragraph.
- Copy the sentence containing each claim verbatim into original_text.
- Respond with JSON only, no markdown.";

pub fn extraction_prompt(text: &str, max_claims: usize) -> Prompt {
    let user = format!(
        "Find at most {max_claims} factual claims in the text below. \
Answer with {{\"claims\": [...]}} where each element has:
- \"subject\": what the claim is about
- \"predicate\": what is asserted about it
- \"numbers\": specific numbers mentioned, or null
- \"dates\": specific dates mentioned, or null
- \"original_text\": the exact sentence from the text
- \"span_start\" / \"span_end\": character offsets of that sentence

TEXT:
{text}"
    );
    Prompt::new(EXTRACTION_SYSTEM, user)
}

// ═══════════════════════════════════════════════════════════
// Verdict
// ═══════════════════════════════════════════════════════════

const VERDICT_SYSTEM: &str = "\
You are a fact checker who may consult nothing but the source snippets given to you.
- Never use background knowledge. If the snippets do not address the claim, the verdict is \"unclear\".
- \"supported\": the snippets back the claim as stated.
- \"overstated\": the claim exaggerates, or uses absolutes the snippets do not justify.
- \"disputed\": the snippets contradict the claim or each other; mention both sides.
- The explanation is one to three plain sentences a high-school student can follow.
- Respond with JSON only, no markdown.";

pub fn verdict_prompt(claim: &RawClaim, sources: &[RankedSource]) -> Prompt {
    let mut statement = claim.claim_text();
    if !claim.numbers.is_empty() {
        let _ = write!(statement, " (numbers: {})", claim.numbers.join(", "));
    }
    if !claim.dates.is_empty() {
        let _ = write!(statement, " (dates: {})", claim.dates.join(", "));
    }

    let source_list = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[Source {} | ID: {} | Tier {}] \"{}\"\nSnippet: {}",
                i + 1,
                s.source_id,
                s.tier.as_u8(),
                s.document.title,
                s.document.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "Judge this claim against the sources only.

CLAIM: {statement}

SOURCES:
{source_list}

Answer with a JSON object:
- \"verdict\": \"supported\", \"overstated\", \"disputed\" or \"unclear\"
- \"explanation\": short plain-language reasoning
- \"source_ids\": IDs of the sources you relied on"
    );
    Prompt::new(VERDICT_SYSTEM, user)
}

// ═══════════════════════════════════════════════════════════
// Rewrite
// ═══════════════════════════════════════════════════════════

const REWRITE_SYSTEM: &str = "\
You reword sentences so that the given sources support them.
- Soften absolutes such as \"all\", \"never\" or \"always\" when the evidence is partial.
- Add nothing that the sources do not state.
- Hedge conflicting numbers and dates (\"about\", \"roughly\", \"in the early\").
- Keep the tone and reading level of the original.
- Respond with JSON only, no markdown.";

pub fn rewrite_prompt(original_text: &str, sources: &[RankedSource]) -> Prompt {
    let source_list = sources
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[Source {}] \"{}\"\nSnippet: {}",
                i + 1,
                s.document.title,
                s.document.snippet
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let user = format!(
        "Reword this sentence so the sources support it.

ORIGINAL: {original_text}

SOURCES:
{source_list}

Answer with {{\"rewrites\": [...]}} holding one or two objects with:
- \"text\": the reworded sentence
- \"confidence\": number from 0.0 to 1.0 that the sources support it"
    );
    Prompt::new(REWRITE_SYSTEM, user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::{EvidenceDocument, SourceTier, Span};
    use uuid::Uuid;

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

    fn source(title: &str, snippet: &str) -> RankedSource {
        RankedSource {
            source_id: Uuid::new_v4(),
            document: EvidenceDocument {
                title: title.into(),
                url: "https://example.edu/a".into(),
                snippet: snippet.into(),
                domain: "example.edu".into(),
                date_published: None,
            },
            tier: SourceTier::Authoritative,
            score: 0.9,
        }
    }

    #[test]
    fn extraction_prompt_carries_limit_and_text() {
        let prompt = extraction_prompt("The Moon orbits Earth.", 7);
        assert!(prompt.user.contains("at most 7"));
        assert!(prompt.user.ends_with("The Moon orbits Earth."));
        assert!(prompt.system.contains("JSON only"));
    }

    #[test]
    fn verdict_prompt_lists_ids_and_tiers() {
        let s = source("Boiling point", "At sea level water boils at 100 °C.");
        let prompt = verdict_prompt(&claim(), std::slice::from_ref(&s));
        assert!(prompt.user.contains(&s.source_id.to_string()));
        assert!(prompt.user.contains("Tier 1"));
        assert!(prompt.user.contains("(numbers: 100)"));
        assert!(!prompt.user.contains("(dates:"));
    }

    #[test]
    fn rewrite_prompt_numbers_sources() {
        let prompt = rewrite_prompt("Always true.", &[source("A", "a"), source("B", "b")]);
        assert!(prompt.user.contains("[Source 1] \"A\""));
        assert!(prompt.user.contains("[Source 2] \"B\""));
        assert!(prompt.user.contains("ORIGINAL: Always true."));
    }
}
