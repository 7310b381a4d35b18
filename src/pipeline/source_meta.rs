//! Page metadata for citing an arbitrary URL.
//!
//! Fetches the page once, reads `<title>` and a few well-known `<meta>` tags,
//! and caches the result for a day. A failed fetch is not an error: the
//! citation falls back to the domain as title and publisher.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::cache::{source_meta_key, ResultCache};
use super::citation::{format_pair, SourceMetadata};
use super::evidence::domain_of;
use super::types::{CitationFormat, CitationStyle};
use super::PipelineError;
use crate::config::SOURCE_METADATA_TTL;

pub const METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
const USER_AGENT: &str = "Verities Citation Bot/1.0";
/// Pages larger than this are truncated before parsing.
const MAX_HTML_BYTES: usize = 512 * 1024;

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static META_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<meta\s[^>]*>").expect("valid regex"));
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)([a-z:_-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid regex")
});

const AUTHOR_KEYS: &[&str] = &["author", "article:author"];
const DATE_KEYS: &[&str] = &["date", "article:published_time", "datepublished"];
const PUBLISHER_KEYS: &[&str] = &["og:site_name", "publisher"];

/// Response shape of a URL citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormattedCitation {
    pub citation_inline: String,
    pub citation_bibliography: String,
    pub metadata_used: MetadataUsed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataUsed {
    pub author: Option<String>,
    pub title: String,
    pub publisher: Option<String>,
    pub date: Option<String>,
    pub url: String,
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// `(name-or-property, content)` pairs of every meta tag, keys lowercased.
fn meta_pairs(html: &str) -> Vec<(String, String)> {
    META_TAG_RE
        .find_iter(html)
        .filter_map(|tag| {
            let mut key = None;
            let mut content = None;
            for cap in ATTR_RE.captures_iter(tag.as_str()) {
                let attr = cap.get(1).map(|m| m.as_str().to_ascii_lowercase());
                let value = cap.get(2).or_else(|| cap.get(3)).map(|m| m.as_str());
                match (attr.as_deref(), value) {
                    (Some("name" | "property" | "itemprop"), Some(v)) => {
                        key = Some(v.to_ascii_lowercase())
                    }
                    (Some("content"), Some(v)) => content = Some(collapse(v)),
                    _ => {}
                }
            }
            Some((key?, content.filter(|c| !c.is_empty())?))
        })
        .collect()
}

fn first_meta(pairs: &[(String, String)], keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| pairs.iter().find(|(name, _)| name == k).map(|(_, v)| v.clone()))
}

/// Parse metadata from page HTML; missing pieces fall back to the domain.
pub fn extract_metadata(html: &str, url: &str, domain: &str) -> SourceMetadata {
    let title = TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| collapse(m.as_str()))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| domain.to_string());
    let pairs = meta_pairs(html);
    SourceMetadata {
        title,
        url: url.to_string(),
        author: first_meta(&pairs, AUTHOR_KEYS),
        publisher: first_meta(&pairs, PUBLISHER_KEYS).or_else(|| Some(domain.to_string())),
        date: first_meta(&pairs, DATE_KEYS),
        domain: Some(domain.to_string()),
    }
}

fn fallback_metadata(url: &str, domain: &str) -> SourceMetadata {
    SourceMetadata {
        title: domain.to_string(),
        url: url.to_string(),
        author: None,
        publisher: Some(domain.to_string()),
        date: None,
        domain: Some(domain.to_string()),
    }
}

/// Accept only absolute http(s) URLs.
pub fn validate_source_url(raw: &str) -> Result<(String, String), PipelineError> {
    let trimmed = raw.trim();
    let parsed = reqwest::Url::parse(trimmed)
        .map_err(|_| PipelineError::Validation("source_url must be a valid URL".into()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PipelineError::Validation(
            "source_url must use http or https".into(),
        ));
    }
    let domain = domain_of(trimmed)
        .ok_or_else(|| PipelineError::Validation("source_url has no host".into()))?;
    Ok((trimmed.to_string(), domain))
}

pub struct SourceMetadataService {
    client: reqwest::Client,
    cache: ResultCache,
    timeout: Duration,
}

impl SourceMetadataService {
    pub fn new(client: reqwest::Client, cache: ResultCache) -> Self {
        Self {
            client,
            cache,
            timeout: METADATA_FETCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn fetch_html(&self, url: &str) -> Result<String, String> {
        let request = async {
            let response = self
                .client
                .get(url)
                .header("User-Agent", USER_AGENT)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            if !response.status().is_success() {
                return Err(format!("HTTP {}", response.status().as_u16()));
            }
            response.text().await.map_err(|e| e.to_string())
        };
        let mut html = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| format!("timed out after {}ms", self.timeout.as_millis()))??;
        if html.len() > MAX_HTML_BYTES {
            let mut cut = MAX_HTML_BYTES;
            while !html.is_char_boundary(cut) {
                cut -= 1;
            }
            html.truncate(cut);
        }
        Ok(html)
    }

    /// Cached metadata for `url`, fetching on a miss.
    pub async fn metadata(&self, url: &str) -> Result<SourceMetadata, PipelineError> {
        let (url, domain) = validate_source_url(url)?;
        let key = source_meta_key(&url);
        if let Some(hit) = self.cache.get::<SourceMetadata>(&key).await {
            return Ok(hit);
        }

        let meta = match self.fetch_html(&url).await {
            Ok(html) => extract_metadata(&html, &url, &domain),
            Err(e) => {
                tracing::warn!(error = %e, domain = %domain, "Metadata fetch failed, using domain");
                fallback_metadata(&url, &domain)
            }
        };

        self.cache.set(&key, &meta, SOURCE_METADATA_TTL).await;
        Ok(meta)
    }

    /// Citation strings for `url`; the part not requested is empty.
    pub async fn format_from_url(
        &self,
        url: &str,
        style: CitationStyle,
        format: CitationFormat,
    ) -> Result<FormattedCitation, PipelineError> {
        let meta = self.metadata(url).await?;
        let pair = format_pair(&meta, style);
        Ok(FormattedCitation {
            citation_inline: if format == CitationFormat::Bibliography {
                String::new()
            } else {
                pair.inline
            },
            citation_bibliography: if format == CitationFormat::Inline {
                String::new()
            } else {
                pair.bibliography
            },
            metadata_used: MetadataUsed {
                author: meta.author,
                title: meta.title,
                publisher: meta.publisher,
                date: meta.date,
                url: meta.url,
            },
        })
    }
}
