// src/ingest/retrying.rs
use async_trait::async_trait;

use crate::error::FetchError;
use crate::ingest::types::{RawPost, TimeWindow, TimelineSource};
use crate::retry::{with_retry, RetryPolicy};
use crate::session::SessionState;

/// Retries transient fetch failures (`NetworkTimeout`) of any source.
/// Session and layout failures are returned on the first attempt.
pub struct RetryingSource<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: TimelineSource> RetryingSource<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<S: TimelineSource> TimelineSource for RetryingSource<S> {
    async fn fetch(
        &self,
        session: &SessionState,
        account: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError> {
        with_retry(&self.policy, "timeline fetch", FetchError::is_retryable, |_| {
            self.inner.fetch(session, account, window)
        })
        .await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
