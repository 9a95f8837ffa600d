//! Opens a visible browser on the login page and saves the session cookies
//! to the configured credential bundle once the operator confirms.

use anyhow::Context;
use timeline_digest::ingest::providers::chromium::export_session;
use timeline_digest::{init_tracing, DigestConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = DigestConfig::load_default()?;
    let out = cfg.timeline.cookies_path.clone();
    let n = export_session(&cfg.browser, &out)
        .await
        .context("exporting browser session")?;
    println!("[login] {n} cookies saved to {}", out.display());
    Ok(())
}
