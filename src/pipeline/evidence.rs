//! EvidenceProvider: web search for claim evidence.
//!
//! `BraveSearchProvider` (JSON API) and `DuckDuckGoProvider` (HTML results
//! page) do the fetching. `ChainedEvidenceProvider` tries them in order,
//! each under its own hard timeout, and `CachedEvidenceProvider` adds the
//! 1 h result cache.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use super::cache::{search_key, ResultCache};
use super::types::EvidenceDocument;
use super::{BackendFailure, PipelineError};
use crate::config::SEARCH_RESULT_TTL;

/// Per provider, not per chain.
pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESULTS: usize = 10;
const BRAVE_ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";
const DUCKDUCKGO_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<Vec<EvidenceDocument>, PipelineError>;
}

/// Host without a leading `www.`; `None` for unparsable URLs.
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_ascii_lowercase())
}

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid regex"));

/// Strip tags and decode the handful of entities search engines emit.
pub fn strip_html(fragment: &str) -> String {
    let text = TAG_RE.replace_all(fragment, "");
    let decoded = text
        .replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ═══════════════════════════════════════════════════════════
// Brave
// ═══════════════════════════════════════════════════════════

#[derive(Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<BraveWeb>,
}

#[derive(Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveResult>,
}

#[derive(Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    page_age: Option<String>,
}

pub struct BraveSearchProvider {
    api_key: String,
    client: reqwest::Client,
    endpoint: String,
}

impl BraveSearchProvider {
    pub fn new(client: reqwest::Client, api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client,
            endpoint: BRAVE_ENDPOINT.to_string(),
        }
    }
}

#[async_trait]
impl EvidenceProvider for BraveSearchProvider {
    fn name(&self) -> &str {
        "brave"
    }

    async fn search(&self, query: &str) -> Result<Vec<EvidenceDocument>, PipelineError> {
        let count = MAX_RESULTS.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(self.name(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::unavailable(
                self.name(),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::unavailable(self.name(), e.to_string()))?;

        Ok(parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| {
                let domain = domain_of(&r.url)?;
                Some(EvidenceDocument {
                    title: strip_html(&r.title),
                    url: r.url,
                    snippet: strip_html(&r.description),
                    domain,
                    date_published: r.page_age,
                })
            })
            .take(MAX_RESULTS)
            .collect())
    }
}

// ═══════════════════════════════════════════════════════════
// DuckDuckGo HTML
// ═══════════════════════════════════════════════════════════

static RESULT_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="result\s"#).expect("valid regex"));
static RESULT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#).expect("valid regex")
});
static RESULT_SNIPPET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</(?:a|td|div|span)"#).expect("valid regex")
});

/// Resolve DuckDuckGo's `/l/?uddg=` redirect to the target URL.
fn unwrap_redirect(href: &str) -> String {
    let href = href.replace("&amp;", "&");
    if !href.contains("uddg=") {
        return href;
    }
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.clone()
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|u| {
            u.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(href)
}

/// Parse a DuckDuckGo HTML results page.
pub fn parse_duckduckgo_html(html: &str) -> Vec<EvidenceDocument> {
    RESULT_BLOCK_RE
        .split(html)
        .skip(1)
        .filter_map(|block| {
            let link = RESULT_LINK_RE.captures(block)?;
            let url = unwrap_redirect(link.get(1)?.as_str());
            let title = strip_html(link.get(2)?.as_str());
            if url.is_empty() || title.is_empty() {
                return None;
            }
            let snippet = RESULT_SNIPPET_RE
                .captures(block)
                .and_then(|c| c.get(1))
                .map(|m| strip_html(m.as_str()))
                .unwrap_or_default();
            let domain = domain_of(&url)?;
            Some(EvidenceDocument {
                title,
                url,
                snippet,
                domain,
                date_published: None,
            })
        })
        .take(MAX_RESULTS)
        .collect()
}

/// Keyless fallback search.
pub struct DuckDuckGoProvider {
    client: reqwest::Client,
}

impl DuckDuckGoProvider {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EvidenceProvider for DuckDuckGoProvider {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<Vec<EvidenceDocument>, PipelineError> {
        let response = self
            .client
            .get(DUCKDUCKGO_ENDPOINT)
            .query(&[("q", query)])
            .header("User-Agent", BROWSER_USER_AGENT)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(self.name(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::unavailable(
                self.name(),
                format!("HTTP {}", status.as_u16()),
            ));
        }

        let html = response
            .text()
            .await
            .map_err(|e| PipelineError::unavailable(self.name(), e.to_string()))?;
        Ok(parse_duckduckgo_html(&html))
    }
}

// ═══════════════════════════════════════════════════════════
// Composition
// ═══════════════════════════════════════════════════════════

/// Tries providers in order, each bounded by its own timeout. The first
/// non-empty answer wins; an empty answer from every reachable provider is a
/// valid empty result. A stalled provider counts as failed and the next one
/// still gets its full budget.
pub struct ChainedEvidenceProvider {
    providers: Vec<Arc<dyn EvidenceProvider>>,
    timeout: Duration,
}

impl ChainedEvidenceProvider {
    pub fn new(providers: Vec<Arc<dyn EvidenceProvider>>) -> Self {
        Self {
            providers,
            timeout: SEARCH_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn search_one(
        &self,
        provider: &dyn EvidenceProvider,
        query: &str,
    ) -> Result<Vec<EvidenceDocument>, PipelineError> {
        tokio::time::timeout(self.timeout, provider.search(query))
            .await
            .map_err(|_| PipelineError::UpstreamTimeout {
                operation: format!("search:{}", provider.name()),
                after_ms: self.timeout.as_millis() as u64,
            })?
    }
}

#[async_trait]
impl EvidenceProvider for ChainedEvidenceProvider {
    fn name(&self) -> &str {
        match self.providers.as_slice() {
            [only] => only.name(),
            _ => "chained",
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<EvidenceDocument>, PipelineError> {
        let mut failures = Vec::new();
        let mut answered = false;

        for provider in &self.providers {
            match self.search_one(provider.as_ref(), query).await {
                Ok(docs) if !docs.is_empty() => return Ok(docs),
                Ok(_) => answered = true,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Search provider failed");
                    failures.push(BackendFailure {
                        backend: provider.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if answered {
            Ok(Vec::new())
        } else {
            Err(PipelineError::UpstreamUnavailable { failures })
        }
    }
}

/// Result cache in front of another provider.
pub struct CachedEvidenceProvider {
    inner: Arc<dyn EvidenceProvider>,
    cache: ResultCache,
}

impl CachedEvidenceProvider {
    pub fn new(inner: Arc<dyn EvidenceProvider>, cache: ResultCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl EvidenceProvider for CachedEvidenceProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn search(&self, query: &str) -> Result<Vec<EvidenceDocument>, PipelineError> {
        let key = search_key(query);
        if let Some(hit) = self.cache.get::<Vec<EvidenceDocument>>(&key).await {
            tracing::debug!(results = hit.len(), "Search cache hit");
            return Ok(hit);
        }

        let docs = self.inner.search(query).await?;
        if !docs.is_empty() {
            self.cache.set(&key, &docs, SEARCH_RESULT_TTL).await;
        }
        Ok(docs)
    }
}
