// src/ingest/types.rs
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::session::SessionState;

/// A post exactly as captured from the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawPost {
    pub text: String,
    /// Timestamp as rendered by the source (RFC 3339 / RFC 2822, any offset).
    pub posted_at: String,
    pub author_handle: String,
    /// Status link or other stable identifier, when the page exposes one.
    #[serde(default)]
    pub source_id: Option<String>,
}

/// A raw post whose timestamp parsed and lies inside the window, already
/// converted to the reporting timezone.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedPost {
    pub post: RawPost,
    pub posted_at: DateTime<Tz>,
}

/// Cleaned post ready for the artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedPost {
    pub text: String,
    pub posted_at: DateTime<Tz>,
    pub author_handle: String,
    pub source_id: Option<String>,
    /// Hex digest of the case/whitespace/link-insensitive text.
    pub dedup_key: String,
}

impl NormalizedPost {
    /// Back to the raw shape, so the post can re-enter the pipeline.
    pub fn to_raw(&self) -> RawPost {
        RawPost {
            text: self.text.clone(),
            posted_at: self.posted_at.to_rfc3339(),
            author_handle: self.author_handle.clone(),
            source_id: self.source_id.clone(),
        }
    }
}

/// `[now - lookback, now]`; `cutoff` is inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub cutoff: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

impl TimeWindow {
    pub fn trailing(now: DateTime<Utc>, lookback_hours: u32) -> Self {
        Self {
            cutoff: now - chrono::Duration::hours(i64::from(lookback_hours)),
            now,
        }
    }

    pub fn contains<T: chrono::TimeZone>(&self, ts: &DateTime<T>) -> bool {
        ts.with_timezone(&Utc) >= self.cutoff
    }
}

/// Anything that can produce a timeline for one account.
#[async_trait::async_trait]
pub trait TimelineSource: Send + Sync {
    async fn fetch(
        &self,
        session: &SessionState,
        account: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError>;
    fn name(&self) -> &'static str;
}
