//! CitationFormatter: deterministic MLA / APA / Chicago strings.
//!
//! Pure functions of `(metadata, style)`; no clock, network or cache access.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::types::{CitationFormat, CitationStyle, CitedSource, EvidenceDocument, RankedSource};

const SHORT_TITLE_CHARS: usize = 30;

/// What a citation is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub publisher: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
}

impl SourceMetadata {
    pub fn from_document(doc: &EvidenceDocument) -> Self {
        Self {
            title: doc.title.clone(),
            url: doc.url.clone(),
            author: None,
            publisher: None,
            date: doc.date_published.clone(),
            domain: Some(doc.domain.clone()),
        }
    }

    fn author(&self) -> Option<&str> {
        self.author.as_deref().map(str::trim).filter(|a| !a.is_empty())
    }

    fn publisher(&self) -> Option<&str> {
        self.publisher
            .as_deref()
            .or(self.domain.as_deref())
            .map(str::trim)
            .filter(|p| !p.is_empty())
    }

    fn parsed_date(&self) -> Option<NaiveDate> {
        self.date.as_deref().and_then(parse_date)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationPair {
    pub inline: String,
    pub bibliography: String,
}

/// Best-effort date parsing for the formats seen in page metadata and search APIs.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

fn long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn surname(author: &str) -> &str {
    author.split_whitespace().last().unwrap_or(author)
}

fn short_title(title: &str) -> String {
    if title.chars().count() > SHORT_TITLE_CHARS {
        let cut: String = title.chars().take(SHORT_TITLE_CHARS).collect();
        format!("{}...", cut.trim_end())
    } else {
        title.to_string()
    }
}

fn join_parts(parts: &[Option<String>]) -> String {
    parts
        .iter()
        .flatten()
        .flat_map(|p| p.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn mla(meta: &SourceMetadata) -> CitationPair {
    let inline = match meta.author() {
        Some(author) => format!("({})", surname(author)),
        None => format!("(\"{}\")", meta.title),
    };
    let bibliography = join_parts(&[
        meta.author().map(|a| format!("{a}.")),
        Some(format!("\"{}.\"", meta.title)),
        meta.publisher().map(|p| format!("*{p}*,")),
        meta.parsed_date().map(|d| format!("{},", long_date(d))),
        Some(format!("{}.", meta.url)),
    ]);
    CitationPair {
        inline,
        bibliography,
    }
}

fn apa(meta: &SourceMetadata) -> CitationPair {
    let year = meta
        .parsed_date()
        .map(|d| d.year().to_string())
        .unwrap_or_else(|| "n.d.".to_string());
    let inline = match meta.author() {
        Some(author) => format!("({}, {year})", surname(author)),
        None => format!("(\"{}\", {year})", short_title(&meta.title)),
    };
    let bibliography = join_parts(&[
        meta.author().map(|a| format!("{a}.")),
        Some(format!("({year}).")),
        Some(format!("{}.", meta.title)),
        meta.publisher().map(|p| format!("*{p}*.")),
        Some(meta.url.clone()),
    ]);
    CitationPair {
        inline,
        bibliography,
    }
}

fn chicago(meta: &SourceMetadata) -> CitationPair {
    let date = meta.parsed_date();
    let inline = match meta.author() {
        Some(author) => match date {
            Some(d) => format!("({}, {})", surname(author), d.year()),
            None => format!("({})", surname(author)),
        },
        None => format!("(\"{}\")", short_title(&meta.title)),
    };
    let bibliography = join_parts(&[
        meta.author().map(|a| format!("{a}.")),
        Some(format!("\"{}.\"", meta.title)),
        meta.publisher().map(|p| format!("{p}.")),
        date.map(|d| format!("{}.", long_date(d))),
        Some(format!("{}.", meta.url)),
    ]);
    CitationPair {
        inline,
        bibliography,
    }
}

/// Both renderings for one style.
pub fn format_pair(meta: &SourceMetadata, style: CitationStyle) -> CitationPair {
    match style {
        CitationStyle::Mla => mla(meta),
        CitationStyle::Apa => apa(meta),
        CitationStyle::Chicago => chicago(meta),
    }
}

/// Single rendering; `Both` joins inline and bibliography with a newline.
pub fn format_citation(meta: &SourceMetadata, style: CitationStyle, format: CitationFormat) -> String {
    let pair = format_pair(meta, style);
    match format {
        CitationFormat::Inline => pair.inline,
        CitationFormat::Bibliography => pair.bibliography,
        CitationFormat::Both => format!("{}\n{}", pair.inline, pair.bibliography),
    }
}

/// Attach citation strings to a ranked source.
pub fn cite(source: &RankedSource, style: CitationStyle) -> CitedSource {
    let pair = format_pair(&SourceMetadata::from_document(&source.document), style);
    CitedSource {
        source_id: source.source_id,
        title: source.document.title.clone(),
        url: source.document.url.clone(),
        snippet: source.document.snippet.clone(),
        domain: source.document.domain.clone(),
        reliability_tier: source.tier,
        score: source.score,
        citation_inline: pair.inline,
        citation_bibliography: pair.bibliography,
    }
}
