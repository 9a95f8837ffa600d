// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod artifact;
pub mod config;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod session;
pub mod summary;

// ---- Re-exports for stable public API ----
pub use crate::config::DigestConfig;
pub use crate::error::{
    ArtifactError, CredentialError, FetchError, PipelineError, ReportError, Stage, SummaryError,
};
pub use crate::ingest::types::{NormalizedPost, RawPost, TimeWindow, TimelineSource};
pub use crate::pipeline::{Pipeline, RunSummary};
pub use crate::session::SessionState;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the tracing subscriber used by the binaries.
/// `RUST_LOG` overrides the default filter; `DIGEST_LOG_JSON=1` switches to JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("timeline_digest=info,warn"));
    let json = std::env::var("DIGEST_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if let Err(e) = res {
        eprintln!("tracing already initialised: {e}");
    }
}
