use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;

/// Application-level constants
pub const APP_NAME: &str = "Verities";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ═══════════════════════════════════════════════════════════
// Request limits
// ═══════════════════════════════════════════════════════════

pub const ANALYZE_MAX_CHARS: usize = 5_000;
pub const ANALYZE_MAX_CLAIMS: usize = 20;
pub const ANALYZE_DEFAULT_CLAIMS: usize = 10;
pub const REVIEW_MAX_CHARS: usize = 12_000;
pub const REVIEW_MAX_RISK_CLAIMS: usize = 30;
pub const REVIEW_DEFAULT_RISK_CLAIMS: usize = 20;
/// Review extracts many more claims than it reports; only the riskiest survive.
pub const REVIEW_EXTRACTION_CLAIMS: usize = 100;

pub const MAX_SOURCES_PER_CLAIM: usize = 5;
pub const MIN_SOURCES_PER_CLAIM: usize = 2;
/// Upper bound on sources shown to the adjudicating model.
pub const MAX_VERDICT_SOURCES: usize = 6;

pub const RATE_LIMIT_ANONYMOUS: u32 = 10;
pub const RATE_LIMIT_IDENTIFIED: u32 = 30;

// ═══════════════════════════════════════════════════════════
// Cache TTLs
// ═══════════════════════════════════════════════════════════

pub const CLAIM_RESULT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);
pub const SEARCH_RESULT_TTL: Duration = Duration::from_secs(3600);
pub const SOURCE_METADATA_TTL: Duration = Duration::from_secs(24 * 3600);
pub const ANALYZE_RESULT_TTL: Duration = Duration::from_secs(4 * 24 * 3600);

// ═══════════════════════════════════════════════════════════
// Source reliability
// ═══════════════════════════════════════════════════════════

pub const TIER1_DOMAINS: &[&str] = &[
    "nature.com",
    "science.org",
    "thelancet.com",
    "nejm.org",
    "pubmed.ncbi.nlm.nih.gov",
    "scholar.google.com",
    "jstor.org",
    "britannica.com",
];

pub const TIER2_DOMAINS: &[&str] = &[
    "apnews.com",
    "reuters.com",
    "nytimes.com",
    "bbc.com",
    "bbc.co.uk",
    "washingtonpost.com",
    "theguardian.com",
    "npr.org",
    "pbs.org",
    "economist.com",
    "scientificamerican.com",
    "nationalgeographic.com",
];

/// User-editable encyclopedias land in tier 4.
pub const ENCYCLOPEDIA_DOMAINS: &[&str] = &["wikipedia.org", "wikimedia.org", "fandom.com"];

pub const SPAM_DOMAINS: &[&str] = &["content-farm-example.com"];

// ═══════════════════════════════════════════════════════════
// Upstream defaults
// ═══════════════════════════════════════════════════════════

pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Preferred chat models, tried in order.
pub const DEFAULT_LLM_MODELS: &[&str] = &[
    "llama-3.3-70b-versatile",
    "llama-3.1-70b-versatile",
    "mixtral-8x7b-32768",
    "llama3-8b-8192",
];

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_CLAIM_CONCURRENCY: usize = 3;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;
pub const CACHE_EVICTION_INTERVAL: Duration = Duration::from_secs(60);

/// Log filter used when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,verities_lib=debug,tower_http=info"
}

// ═══════════════════════════════════════════════════════════
// Runtime configuration
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Runtime configuration read from the process environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_models: Vec<String>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub brave_api_key: Option<String>,
    pub claim_concurrency: usize,
    pub cache_max_entries: usize,
    pub content_filter_enabled: bool,
    /// Reverse proxies whose `x-forwarded-for` header is believed.
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            llm_api_key: None,
            llm_base_url: DEFAULT_LLM_BASE_URL.to_string(),
            llm_models: DEFAULT_LLM_MODELS.iter().map(|m| m.to_string()).collect(),
            ollama_url: None,
            ollama_model: None,
            brave_api_key: None,
            claim_concurrency: DEFAULT_CLAIM_CONCURRENCY,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            content_filter_enabled: true,
            trusted_proxies: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let host: IpAddr = match get("HOST") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                name: "HOST",
                value: raw,
            })?,
            None => defaults.bind_addr.ip(),
        };
        let port = parse_or("PORT", get("PORT"), DEFAULT_PORT)?;

        let llm_models = match get("LLM_MODELS") {
            Some(raw) => {
                let models: Vec<String> = raw
                    .split(',')
                    .map(|m| m.trim().to_string())
                    .filter(|m| !m.is_empty())
                    .collect();
                if models.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        name: "LLM_MODELS",
                        value: raw,
                    });
                }
                models
            }
            None => defaults.llm_models,
        };

        let claim_concurrency =
            parse_or("CLAIM_CONCURRENCY", get("CLAIM_CONCURRENCY"), DEFAULT_CLAIM_CONCURRENCY)?;
        if claim_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                name: "CLAIM_CONCURRENCY",
                value: "0".into(),
            });
        }

        let trusted_proxies = match get("TRUSTED_PROXIES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| {
                    p.parse::<IpAddr>().map_err(|_| ConfigError::InvalidValue {
                        name: "TRUSTED_PROXIES",
                        value: p.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.trusted_proxies,
        };

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            llm_api_key: get("LLM_API_KEY").or_else(|| get("GROQ_API_KEY")),
            llm_base_url: get("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_models,
            ollama_url: get("OLLAMA_URL"),
            ollama_model: get("OLLAMA_MODEL"),
            brave_api_key: get("BRAVE_API_KEY"),
            claim_concurrency,
            cache_max_entries: parse_or(
                "CACHE_MAX_ENTRIES",
                get("CACHE_MAX_ENTRIES"),
                DEFAULT_CACHE_MAX_ENTRIES,
            )?,
            content_filter_enabled: parse_bool(
                "CONTENT_FILTER_ENABLED",
                get("CONTENT_FILTER_ENABLED"),
                true,
            )?,
            trusted_proxies,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

fn parse_bool(name: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::InvalidValue {
            name,
            value: raw.clone().unwrap_or_default(),
        }),
    }
}
