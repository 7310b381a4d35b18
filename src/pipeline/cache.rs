//! Result caching.
//!
//! A `CacheStore` is a string key/value store with per-entry TTL. The
//! in-process `MemoryCacheStore` is the default; anything that can hold
//! strings with an expiry can stand in behind the trait.
//!
//! `ResultCache` wraps a store with typed JSON values and the key scheme
//! used across the pipeline. Cache failures never fail a request: reads
//! degrade to a miss, writes are dropped with a warning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::types::{CitationStyle, ProcessedClaim, RawClaim};
use super::PipelineError;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache lock poisoned")]
    LockPoisoned,

    #[error("Cache backend error: {0}")]
    Backend(String),
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        PipelineError::Cache(err.to_string())
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn del(&self, key: &str) -> Result<(), CacheError>;
}

// ═══════════════════════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════════════════════

struct Entry {
    value: String,
    expires_at: Instant,
    last_touched: u64,
}

struct MemoryInner {
    entries: HashMap<String, Entry>,
    clock: u64,
}

/// Bounded in-process store. Evicts the least recently touched entry when
/// full; expired entries are dropped lazily on read and by the sweeper.
pub struct MemoryCacheStore {
    inner: Mutex<MemoryInner>,
    max_entries: usize,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryInner {
                entries: HashMap::new(),
                clock: 0,
            }),
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|g| g.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let Ok(mut guard) = self.inner.lock() else {
            return 0;
        };
        let now = Instant::now();
        let before = guard.entries.len();
        guard.entries.retain(|_, e| e.expires_at >= now);
        before - guard.entries.len()
    }

    /// Periodic sweep on the runtime. Stops once the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(store) = weak.upgrade() else {
                    break;
                };
                let removed = store.evict_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = store.len(), "Cache sweep");
                }
            }
        })
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut guard = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        let now = Instant::now();
        guard.clock += 1;
        let tick = guard.clock;

        let expired = match guard.entries.get_mut(key) {
            None => return Ok(None),
            Some(entry) if now > entry.expires_at => true,
            Some(entry) => {
                entry.last_touched = tick;
                return Ok(Some(entry.value.clone()));
            }
        };
        if expired {
            guard.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut guard = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        guard.clock += 1;
        let tick = guard.clock;

        if !guard.entries.contains_key(key) && guard.entries.len() >= self.max_entries {
            let oldest = guard
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_touched)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                guard.entries.remove(&oldest);
            }
        }

        guard.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
                last_touched: tick,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        let mut guard = self.inner.lock().map_err(|_| CacheError::LockPoisoned)?;
        guard.entries.remove(key);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════

const CLAIM_PREFIX: &str = "claim:v1:";
const SEARCH_PREFIX: &str = "search:v1:";
const SOURCE_META_PREFIX: &str = "srcmeta:v1:";
const ANALYZE_PREFIX: &str = "analyze:v1:";

/// Lowercase and collapse whitespace so trivially different inputs share a key.
pub fn normalize_for_key(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First 32 hex chars of SHA-256.
pub fn hash_key(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest.iter() {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(32);
    hex
}

pub fn claim_key(claim: &RawClaim, style: CitationStyle) -> String {
    let material = format!("{}|{}", normalize_for_key(&claim.claim_text()), style.as_str());
    format!("{CLAIM_PREFIX}{}", hash_key(&material))
}

pub fn search_key(query: &str) -> String {
    format!("{SEARCH_PREFIX}{}", hash_key(&normalize_for_key(query)))
}

pub fn source_meta_key(url: &str) -> String {
    format!("{SOURCE_META_PREFIX}{}", hash_key(url.trim()))
}

/// Exact text: cached spans are only valid for the text they were cut from.
pub fn analyze_key(text: &str, style: CitationStyle, max_claims: usize) -> String {
    let material = format!("{}|{}|{}", text, style.as_str(), max_claims);
    format!("{ANALYZE_PREFIX}{}", hash_key(&material))
}

// ═══════════════════════════════════════════════════════════
// Typed facade
// ═══════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn in_memory(max_entries: usize) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new(max_entries)))
    }

    /// Typed read. Store errors and undecodable values read as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(error = %e, key, "Cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, key, "Discarding undecodable cache entry");
                if let Err(e) = self.store.del(key).await {
                    tracing::warn!(error = %e, key, "Cache delete failed");
                }
                None
            }
        }
    }

    /// Typed write. Failures are logged and swallowed.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(error = %e, key, "Cache value not serializable");
                return;
            }
        };
        if let Err(e) = self.store.set(key, raw, ttl).await {
            tracing::warn!(error = %e, key, "Cache write failed");
        }
    }

    /// Cached result for a claim, re-anchored to this request's extraction.
    pub async fn get_claim(&self, claim: &RawClaim, style: CitationStyle) -> Option<ProcessedClaim> {
        let cached: ProcessedClaim = self.get(&claim_key(claim, style)).await?;
        Some(cached.anchored_to(claim))
    }

    pub async fn set_claim(&self, claim: &RawClaim, style: CitationStyle, result: &ProcessedClaim) {
        self.set(&claim_key(claim, style), result, crate::config::CLAIM_RESULT_TTL)
            .await;
    }
}
