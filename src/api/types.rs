//! Shared types for the HTTP layer: context, request bodies, rate limiter.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::collaborators::{
    HeaderIdentity, HistoryRecorder, Identity, IdentityProvider, LoggingHistoryRecorder,
};
use crate::config::{
    ANALYZE_DEFAULT_CLAIMS, RATE_LIMIT_ANONYMOUS, RATE_LIMIT_IDENTIFIED, REVIEW_DEFAULT_RISK_CLAIMS,
    REVIEW_MAX_CHARS, REVIEW_MAX_RISK_CLAIMS,
};
use crate::pipeline::orchestrator::{validate_request, PipelineOrchestrator};
use crate::pipeline::review::DocumentReviewer;
use crate::pipeline::sanitize::check_input;
use crate::pipeline::source_meta::SourceMetadataService;
use crate::pipeline::types::{CitationFormat, CitationStyle, PipelineRequest};

pub const USER_ID_HEADER: &str = "x-user-id";
const RATE_WINDOW: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
#[derive(Clone)]
pub struct ApiContext {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub reviewer: Arc<DocumentReviewer>,
    pub citations: Arc<SourceMetadataService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub history: Arc<dyn HistoryRecorder>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    /// Reasoning backend names, in fallback order.
    pub backends: Arc<Vec<String>>,
    pub content_filter: bool,
    /// Peers whose `x-forwarded-for` is believed.
    pub trusted_proxies: Arc<Vec<IpAddr>>,
}

impl ApiContext {
    pub fn new(
        orchestrator: Arc<PipelineOrchestrator>,
        reviewer: Arc<DocumentReviewer>,
        citations: Arc<SourceMetadataService>,
        backends: Vec<String>,
    ) -> Self {
        Self {
            orchestrator,
            reviewer,
            citations,
            identity: Arc::new(HeaderIdentity),
            history: Arc::new(LoggingHistoryRecorder),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new())),
            backends: Arc::new(backends),
            content_filter: true,
            trusted_proxies: Arc::new(Vec::new()),
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }

    pub fn with_content_filter(mut self, enabled: bool) -> Self {
        self.content_filter = enabled;
        self
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::new(proxies);
        self
    }

    /// The identified caller, if any. Lookup failures degrade to anonymous.
    pub async fn caller(&self, headers: &HeaderMap) -> Option<Identity> {
        let user_id = user_id_header(headers)?;
        match self.identity.resolve(user_id).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Identity lookup failed, treating caller as anonymous");
                None
            }
        }
    }

    pub fn screen(&self, text: &str) -> Result<(), ApiError> {
        if self.content_filter {
            check_input(text)?;
        }
        Ok(())
    }
}

pub fn user_id_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

// ═══════════════════════════════════════════════════════════
// Request bodies
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    pub text: String,
    #[serde(default, alias = "citationStyle")]
    pub citation_style: Option<CitationStyle>,
    #[serde(default)]
    pub options: AnalyzeOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnalyzeOptions {
    #[serde(default, alias = "maxClaims")]
    pub max_claims: Option<usize>,
}

impl AnalyzeBody {
    /// Explicit fields win; identity preferences fill the gaps.
    pub fn into_request(self, caller: Option<&Identity>) -> Result<PipelineRequest, ApiError> {
        let citation_style = self
            .citation_style
            .or_else(|| caller.and_then(|c| c.citation_style))
            .unwrap_or_default();
        let max_claims = self
            .options
            .max_claims
            .or_else(|| caller.and_then(|c| c.max_claims))
            .unwrap_or(ANALYZE_DEFAULT_CLAIMS);
        let request = PipelineRequest {
            text: self.text,
            citation_style,
            max_claims,
        };
        validate_request(&request)?;
        Ok(request)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewBody {
    pub text: String,
    #[serde(default)]
    pub options: ReviewOptions,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewOptions {
    #[serde(default, alias = "maxRiskClaims")]
    pub max_risk_claims: Option<usize>,
}

impl ReviewBody {
    /// Checked text and the number of risky claims to report.
    pub fn validated(self) -> Result<(String, usize), ApiError> {
        if self.text.trim().is_empty() {
            return Err(ApiError::BadRequest("text must not be empty".into()));
        }
        let chars = self.text.chars().count();
        if chars > REVIEW_MAX_CHARS {
            return Err(ApiError::BadRequest(format!(
                "text is {chars} characters; the limit is {REVIEW_MAX_CHARS}"
            )));
        }
        let max = self
            .options
            .max_risk_claims
            .unwrap_or(REVIEW_DEFAULT_RISK_CLAIMS);
        if !(1..=REVIEW_MAX_RISK_CLAIMS).contains(&max) {
            return Err(ApiError::BadRequest(format!(
                "max_risk_claims must be between 1 and {REVIEW_MAX_RISK_CLAIMS}"
            )));
        }
        Ok((self.text, max))
    }
}

#[derive(Debug, Deserialize)]
pub struct CitationBody {
    #[serde(alias = "sourceUrl")]
    pub source_url: String,
    #[serde(default, alias = "citation_style", alias = "citationStyle")]
    pub style: CitationStyle,
    #[serde(default)]
    pub format: CitationFormat,
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: per-caller sliding window
// ═══════════════════════════════════════════════════════════

/// Per-caller rate limiter over a one-minute sliding window.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    window: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_window(RATE_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            window,
        }
    }

    /// Record a request for `key` if it is under `limit`. Returns
    /// `Err(retry_after_secs)` otherwise.
    pub fn check(&mut self, key: &str, limit: u32) -> Result<(), u64> {
        self.check_all(&[(key.to_string(), limit)])
    }

    /// Record a request against every bucket, or against none of them if
    /// any bucket is full. The error is the longest wait among full buckets.
    pub fn check_all(&mut self, buckets: &[(String, u32)]) -> Result<(), u64> {
        let now = Instant::now();
        if self.windows.len() > 10_000 {
            self.cleanup(now);
        }

        let window = self.window;
        let mut retry_after = None;
        for (key, limit) in buckets {
            let entries = self.windows.entry(key.clone()).or_default();
            entries.retain(|ts| now.duration_since(*ts) < window);
            if entries.len() as u32 >= *limit {
                let oldest = entries.first().copied().unwrap_or(now);
                let wait = window.saturating_sub(now.duration_since(oldest)).as_secs().max(1);
                retry_after = Some(retry_after.map_or(wait, |w: u64| w.max(wait)));
            }
        }
        if let Some(wait) = retry_after {
            return Err(wait);
        }

        for (key, _) in buckets {
            self.windows.entry(key.clone()).or_default().push(now);
        }
        Ok(())
    }

    fn cleanup(&mut self, now: Instant) {
        let window = self.window;
        self.windows
            .retain(|_, entries| entries.last().is_some_and(|ts| now.duration_since(*ts) < window));
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Address a request is attributed to: the first `x-forwarded-for` hop
/// when the peer is a trusted proxy, otherwise the peer itself.
pub fn client_addr(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<IpAddr> {
    let peer = peer?;
    if !trusted_proxies.contains(&peer) {
        return Some(peer);
    }
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());
    Some(forwarded.unwrap_or(peer))
}

/// Buckets and per-minute limits a request counts against.
///
/// Every request counts against its client address. A resolved identity
/// adds a personal bucket at the identified limit, and the address bucket
/// is capped at that same limit, so rotating ids from one address gains
/// nothing beyond it.
pub fn rate_buckets(caller: Option<&Identity>, client: Option<IpAddr>) -> Vec<(String, u32)> {
    let address = match client {
        Some(ip) => format!("ip:{ip}"),
        None => "ip:unknown".to_string(),
    };
    match caller {
        Some(identity) => vec![
            (format!("user:{}", identity.user_id), RATE_LIMIT_IDENTIFIED),
            (address, RATE_LIMIT_IDENTIFIED),
        ],
        None => vec![(address, RATE_LIMIT_ANONYMOUS)],
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::pipeline::cache::ResultCache;
    use crate::pipeline::evidence::EvidenceProvider;
    use crate::pipeline::gateway::{ReasoningGateway, TextBackend};
    use axum::http::HeaderValue;

    /// Context over the given backend and evidence, with fast retries.
    pub(crate) fn test_context(
        backend: Arc<dyn TextBackend>,
        evidence: Arc<dyn EvidenceProvider>,
    ) -> ApiContext {
        let gateway = Arc::new(
            ReasoningGateway::new(vec![backend]).with_retry(0, Duration::from_millis(1)),
        );
        let cache = ResultCache::in_memory(100);
        let orchestrator = Arc::new(PipelineOrchestrator::new(
            gateway.clone(),
            evidence,
            cache.clone(),
        ));
        let reviewer = Arc::new(DocumentReviewer::new(orchestrator.extractor()));
        let citations = Arc::new(
            SourceMetadataService::new(reqwest::Client::new(), cache)
                .with_timeout(Duration::from_millis(300)),
        );
        ApiContext::new(orchestrator, reviewer, citations, gateway.backend_names())
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn limiter_blocks_over_limit_then_recovers() {
        let mut limiter = RateLimiter::with_window(Duration::from_millis(50));
        assert!(limiter.check("a", 2).is_ok());
        assert!(limiter.check("a", 2).is_ok());
        let retry = limiter.check("a", 2).unwrap_err();
        assert!(retry >= 1);
        assert!(limiter.check("b", 2).is_ok());

        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("a", 2).is_ok());
    }

    #[test]
    fn retry_after_is_within_window() {
        let mut limiter = RateLimiter::new();
        limiter.check("k", 1).unwrap();
        let retry = limiter.check("k", 1).unwrap_err();
        assert!((1..=60).contains(&retry));
    }

    #[test]
    fn forwarded_header_is_honored_only_from_trusted_proxies() {
        let peer: IpAddr = "203.0.113.5".parse().unwrap();
        let proxy: IpAddr = "10.0.0.1".parse().unwrap();
        let spoofed = headers(&[("x-forwarded-for", "1.2.3.4, 10.0.0.1")]);

        assert_eq!(client_addr(&spoofed, Some(peer), &[proxy]), Some(peer));
        assert_eq!(
            client_addr(&spoofed, Some(proxy), &[proxy]),
            Some("1.2.3.4".parse().unwrap())
        );
        assert_eq!(client_addr(&headers(&[]), Some(proxy), &[proxy]), Some(proxy));
        assert_eq!(client_addr(&spoofed, None, &[proxy]), None);
    }

    #[test]
    fn identified_callers_also_count_against_their_address() {
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        let caller = Identity::new("u1");
        assert_eq!(
            rate_buckets(Some(&caller), Some(ip)),
            vec![
                ("user:u1".to_string(), RATE_LIMIT_IDENTIFIED),
                ("ip:203.0.113.5".to_string(), RATE_LIMIT_IDENTIFIED),
            ]
        );
        assert_eq!(
            rate_buckets(None, None),
            vec![("ip:unknown".to_string(), RATE_LIMIT_ANONYMOUS)]
        );
    }

    #[test]
    fn full_bucket_records_nothing_in_the_others() {
        let mut limiter = RateLimiter::new();
        limiter.check("ip:a", 1).unwrap();
        let buckets = vec![("user:u".to_string(), 5), ("ip:a".to_string(), 1)];
        assert!(limiter.check_all(&buckets).is_err());
        // user bucket untouched by the rejected request
        for _ in 0..5 {
            assert!(limiter.check("user:u", 5).is_ok());
        }
        assert!(limiter.check("user:u", 5).is_err());
    }

    #[test]
    fn analyze_body_accepts_camel_case() {
        let body: AnalyzeBody = serde_json::from_str(
            r#"{"text": "x", "citationStyle": "chicago", "options": {"maxClaims": 4}}"#,
        )
        .unwrap();
        assert_eq!(body.citation_style, Some(CitationStyle::Chicago));
        assert_eq!(body.options.max_claims, Some(4));
    }

    #[test]
    fn explicit_fields_beat_identity_preferences() {
        let caller = Identity {
            user_id: "u".into(),
            citation_style: Some(CitationStyle::Chicago),
            max_claims: Some(3),
        };
        let omitted: AnalyzeBody = serde_json::from_str(r#"{"text": "Water boils."}"#).unwrap();
        let request = omitted.into_request(Some(&caller)).unwrap();
        assert_eq!(request.citation_style, CitationStyle::Chicago);
        assert_eq!(request.max_claims, 3);

        let explicit: AnalyzeBody = serde_json::from_str(
            r#"{"text": "Water boils.", "citation_style": "apa", "options": {"max_claims": 7}}"#,
        )
        .unwrap();
        let request = explicit.into_request(Some(&caller)).unwrap();
        assert_eq!(request.citation_style, CitationStyle::Apa);
        assert_eq!(request.max_claims, 7);

        let anonymous: AnalyzeBody = serde_json::from_str(r#"{"text": "Water boils."}"#).unwrap();
        let request = anonymous.into_request(None).unwrap();
        assert_eq!(request.citation_style, CitationStyle::Mla);
        assert_eq!(request.max_claims, ANALYZE_DEFAULT_CLAIMS);
    }

    #[test]
    fn review_body_limits() {
        let ok: ReviewBody = serde_json::from_str(r#"{"text": "a b c"}"#).unwrap();
        assert_eq!(ok.validated().unwrap().1, REVIEW_DEFAULT_RISK_CLAIMS);

        let zero: ReviewBody =
            serde_json::from_str(r#"{"text": "a", "options": {"maxRiskClaims": 0}}"#).unwrap();
        assert!(zero.validated().is_err());

        let empty: ReviewBody = serde_json::from_str(r#"{"text": " "}"#).unwrap();
        assert!(empty.validated().is_err());
    }

    #[test]
    fn citation_body_defaults() {
        let body: CitationBody =
            serde_json::from_str(r#"{"sourceUrl": "https://x.org"}"#).unwrap();
        assert_eq!(body.style, CitationStyle::Mla);
        assert_eq!(body.format, CitationFormat::Both);
    }
}
