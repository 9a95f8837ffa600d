// src/summary/openai.rs
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Completion, LlmBackend, LlmRequest, Role};
use crate::error::{excerpt, SummaryError};

/// OpenAI provider (Chat Completions API). Key comes from `OPENAI_API_KEY`
/// via config.
pub struct OpenAiBackend {
    http: reqwest::Client,
    url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiBackend {
    pub fn new(model: &str, timeout: Duration, max_tokens: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("timeline-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .context("building openai http client")?;
        Ok(Self {
            http,
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: model.to_string(),
            max_tokens,
        })
    }
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn complete(
        &self,
        request: &LlmRequest<'_>,
        api_key: &str,
    ) -> Result<Completion, SummaryError> {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(Msg {
            role: "system",
            content: request.system,
        });
        for m in request.messages {
            messages.push(Msg {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &m.content,
            });
        }
        let req = Req {
            model: &self.model,
            messages,
            temperature: 0.2,
            max_tokens: self.max_tokens,
        };

        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| SummaryError::BackendUnavailable(e.without_url().to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SummaryError::from_status(status.as_u16(), &body));
        }
        let raw = resp
            .text()
            .await
            .map_err(|e| SummaryError::BackendUnavailable(e.without_url().to_string()))?;
        let body: Resp = serde_json::from_str(&raw).map_err(|e| {
            SummaryError::BackendUnavailable(format!("unparseable response ({e}): {}", excerpt(&raw, 120)))
        })?;

        let Some(first) = body.choices.into_iter().next() else {
            return Err(SummaryError::EmptyCompletion);
        };
        Ok(Completion {
            text: first.message.content.unwrap_or_default(),
            truncated: first.finish_reason.as_deref() == Some("length"),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
