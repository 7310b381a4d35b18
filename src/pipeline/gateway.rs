//! ReasoningGateway: ordered text-generation backends with fallback and retry.
//!
//! One pass tries every backend in order, each raced against a hard timeout.
//! The first success wins. If the whole pass fails the gateway sleeps
//! `base_delay * 2^round` (capped at `MAX_BACKOFF`) and runs another pass,
//! up to `retry_rounds` extra passes. Rate-limit responses are ordinary
//! failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BackendFailure, PipelineError};

pub const DEFAULT_RETRY_ROUNDS: u32 = 2;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
pub const EXTRACTION_TIMEOUT: Duration = Duration::from_secs(20);

/// A system/user message pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Cannot connect to {0}")]
    Connection(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Response decoding failed: {0}")]
    Decode(String),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Timed out after {0}ms")]
    Timeout(u64),
}

impl BackendError {
    pub(crate) fn from_reqwest(err: reqwest::Error, target: &str) -> Self {
        if err.is_connect() {
            Self::Connection(target.to_string())
        } else if err.is_timeout() {
            Self::Timeout(0)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connection(format!("{target}: {err}"))
        }
    }
}

/// One interchangeable text-generation backend.
#[async_trait]
pub trait TextBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt, max_tokens: u32) -> Result<String, BackendError>;
}

// ═══════════════════════════════════════════════════════════
// OpenAI-compatible chat completions
// ═══════════════════════════════════════════════════════════

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// `POST {base}/chat/completions` against any OpenAI-compatible provider.
pub struct ChatCompletionsBackend {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl ChatCompletionsBackend {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            name: format!("chat:{model}"),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        }
    }
}

#[async_trait]
impl TextBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &Prompt, max_tokens: u32) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            max_tokens,
            temperature: 0.1,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(e, &self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(BackendError::EmptyResponse)
    }
}

// ═══════════════════════════════════════════════════════════
// Gateway
// ═══════════════════════════════════════════════════════════

pub struct ReasoningGateway {
    backends: Vec<Arc<dyn TextBackend>>,
    retry_rounds: u32,
    base_delay: Duration,
}

impl ReasoningGateway {
    pub fn new(backends: Vec<Arc<dyn TextBackend>>) -> Self {
        Self {
            backends,
            retry_rounds: DEFAULT_RETRY_ROUNDS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }

    pub fn with_retry(mut self, retry_rounds: u32, base_delay: Duration) -> Self {
        self.retry_rounds = retry_rounds;
        self.base_delay = base_delay;
        self
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.backends.iter().map(|b| b.name().to_string()).collect()
    }

    /// Raw text from the first backend that answers in time.
    pub async fn call(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, PipelineError> {
        if self.backends.is_empty() {
            return Err(PipelineError::UpstreamUnavailable { failures: vec![] });
        }

        let mut last_failures: Vec<BackendFailure> = Vec::new();

        for round in 0..=self.retry_rounds {
            last_failures.clear();

            for backend in &self.backends {
                let outcome = tokio::time::timeout(timeout, backend.complete(prompt, max_tokens))
                    .await
                    .unwrap_or_else(|_| Err(BackendError::Timeout(timeout.as_millis() as u64)));

                match outcome {
                    Ok(text) => {
                        if round > 0 || !last_failures.is_empty() {
                            tracing::debug!(backend = backend.name(), round, "Gateway recovered");
                        }
                        return Ok(text);
                    }
                    Err(e) => {
                        tracing::warn!(
                            backend = backend.name(),
                            round,
                            error = %e,
                            "Backend call failed, advancing"
                        );
                        last_failures.push(BackendFailure {
                            backend: backend.name().to_string(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            if round < self.retry_rounds {
                let delay = backoff_delay(self.base_delay, round);
                tracing::warn!(
                    round = round + 1,
                    of = self.retry_rounds + 1,
                    delay_ms = delay.as_millis() as u64,
                    "All backends failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(PipelineError::UpstreamUnavailable {
            failures: last_failures,
        })
    }

    /// Call, strip code fences, and deserialize into `T`.
    pub async fn call_json<T: DeserializeOwned>(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<T, PipelineError> {
        let raw = self.call(prompt, max_tokens, timeout).await?;
        parse_json_response(&raw)
    }
}

/// `base * 2^round`, saturating at `MAX_BACKOFF`.
pub fn backoff_delay(base: Duration, round: u32) -> Duration {
    2u32.checked_pow(round)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_BACKOFF, |delay| delay.min(MAX_BACKOFF))
}

/// Remove a surrounding ```json … ``` wrapper, if any.
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

pub fn parse_json_response<T: DeserializeOwned>(raw: &str) -> Result<T, PipelineError> {
    let cleaned = strip_code_fences(raw);
    serde_json::from_str(cleaned).map_err(|e| {
        tracing::debug!(error = %e, len = raw.len(), "Model output failed to parse");
        PipelineError::Parse(e.to_string())
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Backend returning queued responses in order; repeats the last one.
    pub(crate) struct ScriptedBackend {
        pub name: String,
        pub responses: Mutex<Vec<Result<String, String>>>,
        pub delay: Duration,
        pub calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(name: &str, responses: Vec<Result<&str, &str>>) -> Self {
            Self {
                name: name.into(),
                responses: Mutex::new(
                    responses
                        .into_iter()
                        .map(|r| r.map(String::from).map_err(String::from))
                        .collect(),
                ),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextBackend for ScriptedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, _prompt: &Prompt, _max: u32) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = {
                let mut queue = self.responses.lock().unwrap();
                if queue.len() > 1 {
                    queue.remove(0)
                } else {
                    queue.first().cloned().unwrap_or(Err("exhausted".into()))
                }
            };
            next.map_err(|body| BackendError::Http { status: 500, body })
        }
    }

    fn gateway(backends: Vec<Arc<dyn TextBackend>>) -> ReasoningGateway {
        ReasoningGateway::new(backends).with_retry(2, Duration::from_millis(1))
    }

    fn prompt() -> Prompt {
        Prompt::new("system", "user")
    }

    #[tokio::test]
    async fn first_backend_success_short_circuits() {
        let a = Arc::new(ScriptedBackend::new("a", vec![Ok("A")]));
        let b = Arc::new(ScriptedBackend::new("b", vec![Ok("B")]));
        let gw = gateway(vec![a.clone(), b.clone()]);
        assert_eq!(gw.call(&prompt(), 10, Duration::from_secs(1)).await.unwrap(), "A");
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_next_backend() {
        let a = Arc::new(ScriptedBackend::new("a", vec![Ok("late")]).slow(Duration::from_millis(200)));
        let b = Arc::new(ScriptedBackend::new("b", vec![Ok("B")]));
        let gw = gateway(vec![a.clone(), b]);
        let text = gw.call(&prompt(), 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(text, "B");
        assert_eq!(a.calls(), 1);
    }

    #[tokio::test]
    async fn failed_pass_is_retried() {
        let a = Arc::new(ScriptedBackend::new("a", vec![Err("boom"), Ok("second pass")]));
        let gw = gateway(vec![a.clone()]);
        let text = gw.call(&prompt(), 10, Duration::from_secs(1)).await.unwrap();
        assert_eq!(text, "second pass");
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn exhaustion_reports_each_backend() {
        let a = Arc::new(ScriptedBackend::new("a", vec![Err("rate limited")]));
        let b = Arc::new(ScriptedBackend::new("b", vec![Err("down")]));
        let gw = gateway(vec![a.clone(), b.clone()]);
        let err = gw.call(&prompt(), 10, Duration::from_secs(1)).await.unwrap_err();
        match err {
            PipelineError::UpstreamUnavailable { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].backend, "a");
                assert!(failures[1].message.contains("down"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 3);
    }

    #[tokio::test]
    async fn no_backends_is_unavailable() {
        let gw = gateway(vec![]);
        let err = gw.call(&prompt(), 10, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_unavailable");
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_millis(1_000);
        assert_eq!(backoff_delay(base, 0), base);
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(4_000));
        assert_eq!(backoff_delay(base, 10), MAX_BACKOFF);
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX / 2), 3), MAX_BACKOFF);
    }

    #[test]
    fn code_fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn garbage_is_a_parse_error_not_transport() {
        let a = Arc::new(ScriptedBackend::new("a", vec![Ok("I think it's true")]));
        let gw = gateway(vec![a]);
        let err = gw
            .call_json::<serde_json::Value>(&prompt(), 10, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[tokio::test]
    async fn call_json_reads_fenced_objects() {
        #[derive(Deserialize)]
        struct Out {
            ok: bool,
        }
        let a = Arc::new(ScriptedBackend::new("a", vec![Ok("```json\n{\"ok\": true}\n```")]));
        let gw = gateway(vec![a]);
        let out: Out = gw.call_json(&prompt(), 10, Duration::from_secs(1)).await.unwrap();
        assert!(out.ok);
    }
}
