// src/error.rs
//! Error taxonomy for every pipeline stage.
//!
//! Transient failures (`NetworkTimeout`, `RateLimited`, `BackendUnavailable`)
//! are retried inside their stage; everything else aborts the run and is
//! surfaced through [`PipelineError`] together with the stage it came from.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Missing, unreadable or empty credential bundle.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential bundle not found at {0}")]
    Missing(PathBuf),
    #[error("credential bundle {path} is unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("credential bundle {path} is malformed: {reason}")]
    Malformed { path: PathBuf, reason: String },
    #[error("credential bundle {0} contains no usable cookies")]
    Empty(PathBuf),
}

#[derive(Debug, Error)]
pub enum FetchError {
    /// The platform rejected the session (login wall / redirect to login).
    #[error("session rejected by the platform")]
    AuthExpired,
    #[error("timed out while {0}")]
    NetworkTimeout(String),
    /// Expected markup is absent; the page contract changed.
    #[error("timeline layout changed: {0}")]
    LayoutChanged(String),
    /// Driver-level failure (launch, protocol, crashed tab).
    #[error("browser driver failure: {0}")]
    Browser(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::NetworkTimeout(_))
    }
}

/// Failure writing or reading the intermediate artifact.
#[derive(Debug, Error)]
#[error("artifact i/o on {path}: {source}")]
pub struct ArtifactError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("LLM backend rejected the API key (missing or invalid)")]
    AuthInvalid,
    #[error("LLM backend rate limited the request")]
    RateLimited,
    #[error("LLM backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("LLM backend returned an empty completion")]
    EmptyCompletion,
    /// Non-retryable 4xx other than auth / rate limit (e.g. payload too large).
    #[error("LLM backend rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl SummaryError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SummaryError::RateLimited
                | SummaryError::BackendUnavailable(_)
                | SummaryError::EmptyCompletion
        )
    }

    /// Map an HTTP status + body excerpt to the taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lower = body.to_ascii_lowercase();
        match status {
            401 | 403 => SummaryError::AuthInvalid,
            429 => SummaryError::RateLimited,
            // Gemini reports a bad key as 400 INVALID_ARGUMENT.
            400 if lower.contains("api key not valid") || lower.contains("api_key_invalid") => {
                SummaryError::AuthInvalid
            }
            500..=599 => SummaryError::BackendUnavailable(format!("HTTP {status}")),
            _ => SummaryError::Rejected {
                status,
                message: excerpt(body, 200),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("model returned an empty summary")]
    EmptySummary,
    #[error("report i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pipeline stage, used to label failures for the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Session,
    Fetch,
    Artifact,
    Summary,
    Report,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Session => "session",
            Stage::Fetch => "fetch",
            Stage::Artifact => "artifact",
            Stage::Summary => "summary",
            Stage::Report => "report",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[session] {0}")]
    Session(#[from] CredentialError),
    #[error("[fetch] {0}")]
    Fetch(#[from] FetchError),
    #[error("[artifact] {0}")]
    Artifact(#[from] ArtifactError),
    #[error("[summary] {0}")]
    Summary(#[from] SummaryError),
    #[error("[report] {0}")]
    Report(#[from] ReportError),
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Session(_) => Stage::Session,
            PipelineError::Fetch(_) => Stage::Fetch,
            PipelineError::Artifact(_) => Stage::Artifact,
            PipelineError::Summary(_) => Stage::Summary,
            PipelineError::Report(_) => Stage::Report,
        }
    }

    /// What the operator should do next, when there is something specific.
    pub fn guidance(&self) -> Option<&'static str> {
        match self {
            PipelineError::Session(_) | PipelineError::Fetch(FetchError::AuthExpired) => Some(
                "refresh the credential bundle: run `digest_login` and log in again, then re-run",
            ),
            PipelineError::Fetch(FetchError::LayoutChanged(_)) => {
                Some("the timeline markup changed; the page selectors need updating")
            }
            PipelineError::Summary(SummaryError::AuthInvalid) => {
                Some("set a valid API key (GOOGLE_API_KEY / OPENAI_API_KEY) in the environment")
            }
            PipelineError::Summary(SummaryError::RateLimited) => {
                Some("the LLM quota is exhausted; wait and re-run")
            }
            _ => None,
        }
    }
}

pub(crate) fn excerpt(s: &str, max: usize) -> String {
    let mut out: String = s.chars().take(max).collect();
    if s.chars().count() > max {
        out.push('…');
    }
    out.replace(['\r', '\n'], " ")
}
