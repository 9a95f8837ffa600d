// src/ingest/providers/fixture.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use crate::error::FetchError;
use crate::ingest::types::{RawPost, TimeWindow, TimelineSource};
use crate::session::SessionState;

/// Offline timeline read from a JSON array of posts. Used for dry runs and
/// tests; the session is accepted but not needed.
pub struct FixtureTimelineSource {
    pub posts: Vec<RawPost>,
}

impl FixtureTimelineSource {
    pub fn from_fixture(content: &str) -> Result<Self> {
        let posts: Vec<RawPost> =
            serde_json::from_str(content).context("parsing timeline fixture json")?;
        Ok(Self { posts })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading timeline fixture {}", path.display()))?;
        Self::from_fixture(&content)
    }

    pub fn new(posts: Vec<RawPost>) -> Self {
        Self { posts }
    }
}

#[async_trait]
impl TimelineSource for FixtureTimelineSource {
    async fn fetch(
        &self,
        _session: &SessionState,
        account: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError> {
        let wanted = account.trim_start_matches('@');
        Ok(self
            .posts
            .iter()
            .filter(|p| p.author_handle.trim_start_matches('@').eq_ignore_ascii_case(wanted))
            .cloned()
            .collect())
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_returns_posts_for_the_requested_account() {
        let src = FixtureTimelineSource::from_fixture(
            r#"[
                {"text":"a","posted_at":"2024-05-01T10:00:00Z","author_handle":"financialjuice"},
                {"text":"b","posted_at":"2024-05-01T10:00:00Z","author_handle":"someoneelse"}
            ]"#,
        )
        .unwrap();
        let out = src
            .fetch(&SessionState::new(vec![]), "@FinancialJuice", &TimeWindow::trailing(chrono::Utc::now(), 24))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "a");
    }
}
