// src/summary/mod.rs
//! SummaryClient: sends prompt payloads to an LLM backend with bounded
//! retries and continuation of truncated completions.
//!
//! Backends only do one remote call each; retry, continuation and empty-output
//! policy live here so every backend (and the test doubles) share them.

pub mod gemini;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;

use crate::config::digest::{Provider, SummarySection};
use crate::error::SummaryError;
use crate::prompt::PromptPayload;
use crate::retry::{with_retry, RetryPolicy};

pub use gemini::GeminiBackend;
pub use openai::OpenAiBackend;

const CONTINUE_PROMPT: &str =
    "Your previous answer was cut off. Continue exactly where you stopped; do not repeat earlier text.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// One backend call.
#[derive(Debug, Clone)]
pub struct LlmRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
}

/// Raw backend output. `truncated` is set when the backend stopped on its
/// output-token limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub truncated: bool,
}

/// Low-level provider: does a *real* remote call. Separated so the same
/// retry/continuation wrapper serves production and tests.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(
        &self,
        request: &LlmRequest<'_>,
        api_key: &str,
    ) -> Result<Completion, SummaryError>;
    fn name(&self) -> &'static str;
}

pub type DynBackend = Arc<dyn LlmBackend>;

/// Deterministic backend for offline runs (`DIGEST_TEST_MODE=mock`).
#[derive(Clone)]
pub struct MockBackend {
    pub fixed: String,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            fixed: "## Mock\n\n- Digest produced by the offline mock backend.".to_string(),
        }
    }
}

#[async_trait]
impl LlmBackend for MockBackend {
    async fn complete(
        &self,
        _request: &LlmRequest<'_>,
        _api_key: &str,
    ) -> Result<Completion, SummaryError> {
        Ok(Completion {
            text: self.fixed.clone(),
            truncated: false,
        })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Factory: build the backend named in config (after `DIGEST_TEST_MODE`).
pub fn build_backend(cfg: &SummarySection) -> anyhow::Result<DynBackend> {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    Ok(match cfg.effective_provider() {
        Provider::Gemini => Arc::new(GeminiBackend::new(
            &cfg.model(),
            timeout,
            cfg.max_output_tokens,
        )?),
        Provider::OpenAi => Arc::new(OpenAiBackend::new(
            &cfg.model(),
            timeout,
            cfg.max_output_tokens,
        )?),
        Provider::Mock => Arc::new(MockBackend::default()),
    })
}

pub struct SummaryClient {
    backend: DynBackend,
    retry: RetryPolicy,
    max_continuations: u8,
}

impl SummaryClient {
    pub fn new(backend: DynBackend, retry: RetryPolicy) -> Self {
        Self {
            backend,
            retry,
            max_continuations: 2,
        }
    }

    pub fn with_continuations(mut self, n: u8) -> Self {
        self.max_continuations = n;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    async fn complete_once(
        &self,
        system: &str,
        messages: &[Message],
        api_key: &str,
    ) -> Result<Completion, SummaryError> {
        let request = LlmRequest { system, messages };
        with_retry(&self.retry, "summary call", SummaryError::is_retryable, |attempt| {
            let request = &request;
            async move {
                counter!("digest_summary_attempts_total").increment(1);
                tracing::debug!(target: "summary", backend = self.backend.name(), attempt, "calling backend");
                let c = self.backend.complete(request, api_key).await?;
                if c.text.trim().is_empty() && !c.truncated {
                    return Err(SummaryError::EmptyCompletion);
                }
                Ok(c)
            }
        })
        .await
    }

    /// Send `payload` and return the model text. Fails instead of returning
    /// an empty or invented summary.
    pub async fn summarize(
        &self,
        payload: &PromptPayload,
        api_key: &str,
    ) -> Result<String, SummaryError> {
        if api_key.trim().is_empty() {
            return Err(SummaryError::AuthInvalid);
        }

        let mut messages = vec![Message::user(payload.text.clone())];
        let mut out = String::new();
        let mut round = 0u8;
        loop {
            let c = self.complete_once(&payload.system, &messages, api_key).await?;
            out.push_str(&c.text);
            if !c.truncated {
                break;
            }
            if round >= self.max_continuations {
                tracing::warn!(
                    target: "summary",
                    continuations = round,
                    "completion still truncated, keeping partial text"
                );
                break;
            }
            round += 1;
            messages.push(Message::assistant(c.text));
            messages.push(Message::user(CONTINUE_PROMPT));
        }

        let out = out.trim().to_string();
        if out.is_empty() {
            return Err(SummaryError::EmptyCompletion);
        }
        tracing::info!(
            target: "summary",
            backend = self.backend.name(),
            prompt_chars = payload.text.chars().count(),
            reply_chars = out.chars().count(),
            continuations = round,
            "summary received"
        );
        Ok(out)
    }
}
