// src/summary/gemini.rs
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Completion, LlmBackend, LlmRequest, Role};
use crate::error::{excerpt, SummaryError};

const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Gemini `generateContent`. The key travels in a header, never in
/// the URL, so transport errors cannot leak it.
pub struct GeminiBackend {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    max_output_tokens: u32,
}

impl GeminiBackend {
    pub fn new(model: &str, timeout: Duration, max_output_tokens: u32) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("timeline-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .context("building gemini http client")?;
        Ok(Self {
            http,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: model.to_string(),
            max_output_tokens,
        })
    }

    /// Point at a proxy or compatible gateway.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Req<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Resp {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<RespContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct RespContent {
    #[serde(default)]
    parts: Vec<RespPart>,
}

#[derive(Deserialize)]
struct RespPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

fn into_completion(body: Resp) -> Result<Completion, SummaryError> {
    if let Some(reason) = body.prompt_feedback.and_then(|f| f.block_reason) {
        return Err(SummaryError::Rejected {
            status: 200,
            message: format!("prompt blocked: {reason}"),
        });
    }
    let Some(first) = body.candidates.into_iter().next() else {
        return Err(SummaryError::EmptyCompletion);
    };
    let text: String = first
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    Ok(Completion {
        text,
        truncated: first.finish_reason.as_deref() == Some("MAX_TOKENS"),
    })
}

#[async_trait]
impl LlmBackend for GeminiBackend {
    async fn complete(
        &self,
        request: &LlmRequest<'_>,
        api_key: &str,
    ) -> Result<Completion, SummaryError> {
        let req = Req {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: request.system,
                }],
            },
            contents: request
                .messages
                .iter()
                .map(|m| Content {
                    role: Some(match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    }),
                    parts: vec![Part { text: &m.content }],
                })
                .collect(),
            generation_config: GenerationConfig {
                temperature: 0.2,
                max_output_tokens: self.max_output_tokens,
            },
        };

        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", api_key)
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
        into_completion(body)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
