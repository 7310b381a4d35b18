//! SourceRanker: tier, relevance and score for each evidence document, then
//! selection of the sources shown for a claim.

use std::collections::HashSet;

use chrono::{Months, NaiveDate, Utc};
use uuid::Uuid;

use super::citation::parse_date;
use super::types::{EvidenceDocument, RankedSource, RawClaim, SourceTier};
use crate::config::{
    ENCYCLOPEDIA_DOMAINS, MAX_SOURCES_PER_CLAIM, MIN_SOURCES_PER_CLAIM, SPAM_DOMAINS,
    TIER1_DOMAINS, TIER2_DOMAINS,
};

const TIER_WEIGHT: f32 = 0.4;
const RELEVANCE_WEIGHT: f32 = 0.5;
const NUMBER_BONUS: f32 = 0.15;
const DATE_BONUS: f32 = 0.10;
const RECENCY_BONUS: f32 = 0.05;
const SPAM_PENALTY: f32 = 0.5;
const INCOMPLETE_PENALTY: f32 = 0.2;
const RECENT_MONTHS: u32 = 24;

fn matches_domain(domain: &str, listed: &str) -> bool {
    domain == listed || domain.ends_with(&format!(".{listed}"))
}

fn in_list(domain: &str, list: &[&str]) -> bool {
    list.iter().any(|listed| matches_domain(domain, listed))
}

pub fn assign_tier(domain: &str) -> SourceTier {
    let domain = domain.to_ascii_lowercase();
    if domain.ends_with(".edu") || domain.ends_with(".gov") || in_list(&domain, TIER1_DOMAINS) {
        SourceTier::Authoritative
    } else if in_list(&domain, TIER2_DOMAINS) {
        SourceTier::Reference
    } else if in_list(&domain, ENCYCLOPEDIA_DOMAINS) {
        SourceTier::UserEditable
    } else {
        SourceTier::General
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Share of the claim's content words (longer than 3 chars) found in the snippet.
pub fn relevance(claim_text: &str, snippet: &str) -> f32 {
    let claim_words: HashSet<String> = words(claim_text).filter(|w| w.chars().count() > 3).collect();
    if claim_words.is_empty() {
        return 0.0;
    }
    let snippet_words: HashSet<String> = words(snippet).collect();
    let hits = claim_words.iter().filter(|w| snippet_words.contains(*w)).count();
    (hits as f32 / claim_words.len() as f32).min(1.0)
}

/// True when any one of `values` appears verbatim in `snippet`.
fn mentions_any(snippet: &str, values: &[String]) -> bool {
    values
        .iter()
        .any(|v| !v.is_empty() && snippet.contains(v.as_str()))
}

pub fn is_recent(date_published: Option<&str>, today: NaiveDate) -> bool {
    let Some(published) = date_published.and_then(parse_date) else {
        return false;
    };
    let cutoff = today
        .checked_sub_months(Months::new(RECENT_MONTHS))
        .unwrap_or(NaiveDate::MIN);
    published > cutoff
}

pub struct SourceRanker {
    max_sources: usize,
    min_sources: usize,
    today: Option<NaiveDate>,
}

impl Default for SourceRanker {
    fn default() -> Self {
        Self {
            max_sources: MAX_SOURCES_PER_CLAIM,
            min_sources: MIN_SOURCES_PER_CLAIM,
            today: None,
        }
    }
}

impl SourceRanker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the reference date used for the recency bonus.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn score(&self, claim: &RawClaim, doc: &EvidenceDocument) -> RankedSource {
        let today = self.today.unwrap_or_else(|| Utc::now().date_naive());
        let tier = assign_tier(&doc.domain);
        let relevance = relevance(&claim.claim_text(), &doc.snippet);

        let mut bonus = 0.0;
        if mentions_any(&doc.snippet, &claim.numbers) {
            bonus += NUMBER_BONUS;
        }
        if mentions_any(&doc.snippet, &claim.dates) {
            bonus += DATE_BONUS;
        }
        if is_recent(doc.date_published.as_deref(), today) {
            bonus += RECENCY_BONUS;
        }

        let mut penalty = 0.0;
        if in_list(&doc.domain.to_ascii_lowercase(), SPAM_DOMAINS) {
            penalty += SPAM_PENALTY;
        }
        if doc.title.trim().is_empty() || doc.snippet.trim().is_empty() {
            penalty += INCOMPLETE_PENALTY;
        }

        let raw = tier.base_score() * TIER_WEIGHT + relevance * RELEVANCE_WEIGHT + bonus - penalty;
        RankedSource {
            source_id: Uuid::new_v4(),
            document: doc.clone(),
            tier,
            score: raw.clamp(0.0, 1.0),
        }
    }

    /// Score every document and keep at most `max_sources`, best first.
    ///
    /// The best tier 1/2 candidate is always kept when one exists, even if
    /// it fell outside the top of the ordering.
    pub fn rank(&self, claim: &RawClaim, documents: &[EvidenceDocument]) -> Vec<RankedSource> {
        let mut scored: Vec<RankedSource> = documents.iter().map(|d| self.score(claim, d)).collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut selected: Vec<RankedSource> = Vec::with_capacity(self.max_sources);
        if let Some(pos) = scored.iter().position(|s| s.tier.is_trusted()) {
            if pos >= self.min_sources {
                selected.push(scored.remove(pos));
            }
        }
        let room = self.max_sources.saturating_sub(selected.len());
        selected.extend(scored.into_iter().take(room));
        selected.sort_by(|a, b| b.score.total_cmp(&a.score));
        selected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Span;

    fn claim() -> RawClaim {
        RawClaim {
            subject: "Water".into(),
            predicate: "boils at 100 degrees Celsius at sea level".into(),
            numbers: vec!["100".into()],
            dates: vec![],
            original_text: "Water boils at 100 degrees Celsius at sea level.".into(),
            span: Span::new(0, 48),
        }
    }

    fn doc(domain: &str, snippet: &str) -> EvidenceDocument {
        EvidenceDocument {
            title: format!("Article on {domain}"),
            url: format!("https://{domain}/a"),
            snippet: snippet.into(),
            domain: domain.into(),
            date_published: None,
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()
    }

    #[test]
    fn tiers_follow_domain_lists() {
        assert_eq!(assign_tier("physics.mit.edu"), SourceTier::Authoritative);
        assert_eq!(assign_tier("nasa.gov"), SourceTier::Authoritative);
        assert_eq!(assign_tier("nature.com"), SourceTier::Authoritative);
        assert_eq!(assign_tier("reuters.com"), SourceTier::Reference);
        assert_eq!(assign_tier("en.wikipedia.org"), SourceTier::UserEditable);
        assert_eq!(assign_tier("randomblog.net"), SourceTier::General);
        assert_eq!(assign_tier("signature.com"), SourceTier::General);
    }

    #[test]
    fn relevance_is_share_of_content_words() {
        assert_eq!(relevance("the cat sat", "anything"), 0.0);
        let r = relevance("Water boils quickly", "water boils slowly");
        assert!((r - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(relevance("Water boils", "WATER, boils! water boils"), 1.0);
    }

    #[test]
    fn recency_uses_two_year_window() {
        assert!(is_recent(Some("2025-03-01"), today()));
        assert!(is_recent(Some("2025-01-02T10:00:00Z"), today()));
        assert!(!is_recent(Some("2020-01-01"), today()));
        assert!(!is_recent(Some("yesterday"), today()));
        assert!(!is_recent(None, today()));
    }

    #[test]
    fn scores_are_clamped() {
        let ranker = SourceRanker::new().with_today(today());
        let spam = ranker.score(&claim(), &doc("content-farm-example.com", ""));
        assert_eq!(spam.score, 0.0);

        let mut best = doc(
            "nasa.gov",
            "Water boils at 100 degrees Celsius at sea level, per 2025 data.",
        );
        best.date_published = Some("2026-01-01".into());
        let top = ranker.score(&claim(), &best);
        assert!(top.score <= 1.0 && top.score > 0.9);
    }

    #[test]
    fn number_bonus_applies_verbatim() {
        let ranker = SourceRanker::new().with_today(today());
        let with = ranker.score(&claim(), &doc("blog.net", "It reaches 100 there."));
        let without = ranker.score(&claim(), &doc("blog.net", "It reaches it there."));
        assert!((with.score - without.score - NUMBER_BONUS).abs() < 1e-6);
    }

    #[test]
    fn any_one_of_several_numbers_earns_the_bonus() {
        let ranker = SourceRanker::new().with_today(today());
        let mut several = claim();
        several.numbers = vec!["212".into(), "100".into()];
        several.dates = vec!["1742".into(), "1954".into()];
        let plain = ranker.score(&several, &doc("blog.net", "It reaches it there."));
        let numbered = ranker.score(&several, &doc("blog.net", "It reaches 100 there."));
        let dated = ranker.score(&several, &doc("blog.net", "It was proposed in 1742."));
        assert!((numbered.score - plain.score - NUMBER_BONUS).abs() < 1e-6);
        assert!((dated.score - plain.score - DATE_BONUS).abs() < 1e-6);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(SourceRanker::new().rank(&claim(), &[]).is_empty());
    }

    #[test]
    fn selection_is_capped_and_sorted() {
        let docs: Vec<_> = (0..8)
            .map(|i| doc(&format!("site{i}.net"), "water boils at sea level"))
            .collect();
        let ranked = SourceRanker::new().with_today(today()).rank(&claim(), &docs);
        assert_eq!(ranked.len(), MAX_SOURCES_PER_CLAIM);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(ranked.iter().all(|s| (0.0..=1.0).contains(&s.score)));
    }

    #[test]
    fn trusted_source_is_guaranteed_a_slot() {
        let mut docs: Vec<_> = (0..6)
            .map(|i| {
                doc(
                    &format!("site{i}.net"),
                    "water boils at 100 degrees celsius at sea level",
                )
            })
            .collect();
        docs.push(doc("reuters.com", "unrelated text"));
        let ranked = SourceRanker::new().with_today(today()).rank(&claim(), &docs);
        assert_eq!(ranked.len(), MAX_SOURCES_PER_CLAIM);
        assert!(ranked.iter().any(|s| s.tier.is_trusted()));
    }
}
