//! Timeline digest: one-shot runner.
//! Loads `.env` and `config/digest.toml`, runs the pipeline once and exits
//! non-zero with the failing stage when anything goes wrong.

use std::process::ExitCode;

use timeline_digest::{init_tracing, DigestConfig, Pipeline};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let pipeline = match DigestConfig::load_default().and_then(Pipeline::from_config) {
        Ok(p) => p,
        Err(e) => {
            error!(error = format!("{e:#}"), "configuration failed");
            return ExitCode::from(2);
        }
    };

    match pipeline.run(chrono::Utc::now()).await {
        Ok(run) => {
            info!(
                fetched = run.fetched,
                retained = run.retained,
                omitted = run.omitted_from_prompt,
                llm_calls = run.llm_calls,
                structured = run.report.structured,
                sections = ?run.report.sections,
                "digest complete"
            );
            println!("[scrape] {} posts in window -> {}", run.retained, run.artifact_path.display());
            println!("[summarize] report -> {}", run.report_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(stage = %e.stage(), error = %e, "run failed");
            if let Some(hint) = e.guidance() {
                eprintln!("{hint}");
            }
            ExitCode::FAILURE
        }
    }
}
