// src/ingest/collector.rs
//! Scroll-and-collect loop, written against a minimal page abstraction so it
//! can be driven by a real browser or by a scripted page in tests.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::ingest::parse_timestamp;
use crate::ingest::types::RawPost;

/// A rendered timeline that can report its visible posts and load more.
#[async_trait::async_trait]
pub trait TimelinePage: Send {
    /// Posts currently rendered, in on-screen order.
    async fn visible_posts(&mut self) -> Result<Vec<RawPost>, FetchError>;
    /// Scroll further down and wait for the next batch to render.
    async fn scroll(&mut self) -> Result<(), FetchError>;
}

/// Limits that keep a sparse or broken feed from scrolling forever.
#[derive(Debug, Clone, Copy)]
pub struct ScrollBudget {
    pub max_scrolls: u32,
    pub max_duration: Duration,
    /// Keep scrolling until a whole new batch is this far past the cutoff.
    pub safety_margin: chrono::Duration,
    /// Consecutive scrolls without a new post before giving up.
    pub stall_limit: u32,
}

impl Default for ScrollBudget {
    fn default() -> Self {
        Self {
            max_scrolls: 80,
            max_duration: Duration::from_secs(300),
            safety_margin: chrono::Duration::minutes(30),
            stall_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PassedCutoff,
    ScrollLimit,
    TimeLimit,
    Stalled,
}

#[derive(Debug)]
pub struct Collected {
    pub posts: Vec<RawPost>,
    pub scrolls: u32,
    pub stop: StopReason,
}

/// Identity used to skip posts already collected in an earlier batch.
fn identity(p: &RawPost) -> String {
    match &p.source_id {
        Some(id) => id.clone(),
        None => format!("{}|{}", p.posted_at, p.text),
    }
}

/// Collect posts until a whole batch of newly rendered posts predates
/// `cutoff - safety_margin` or a budget runs out. Posts keep the order in which they were first rendered;
/// nothing is filtered by time here.
pub async fn collect_timeline<P: TimelinePage + ?Sized>(
    page: &mut P,
    cutoff: DateTime<Utc>,
    budget: &ScrollBudget,
) -> Result<Collected, FetchError> {
    let started = Instant::now();
    let stop_before = cutoff - budget.safety_margin;
    let mut seen: HashSet<String> = HashSet::new();
    let mut posts = Vec::new();
    let mut scrolls = 0u32;
    let mut stalled = 0u32;

    loop {
        let batch = page.visible_posts().await?;
        let mut fresh = 0usize;
        // Newest timestamp among this batch's new posts. Pinned or
        // out-of-order cards can be old, so a single old post says nothing.
        let mut frontier: Option<DateTime<Utc>> = None;
        for p in batch {
            if !seen.insert(identity(&p)) {
                continue;
            }
            if let Some(ts) = parse_timestamp(&p.posted_at) {
                let ts = ts.with_timezone(&Utc);
                frontier = Some(frontier.map_or(ts, |f| f.max(ts)));
            }
            posts.push(p);
            fresh += 1;
        }
        stalled = if fresh == 0 { stalled + 1 } else { 0 };

        tracing::debug!(
            target: "fetch",
            scrolls,
            fresh,
            total = posts.len(),
            frontier = ?frontier,
            "batch collected"
        );

        let stop = if frontier.is_some_and(|f| f < stop_before) {
            Some(StopReason::PassedCutoff)
        } else if scrolls >= budget.max_scrolls {
            Some(StopReason::ScrollLimit)
        } else if started.elapsed() >= budget.max_duration {
            Some(StopReason::TimeLimit)
        } else if stalled >= budget.stall_limit {
            Some(StopReason::Stalled)
        } else {
            None
        };
        if let Some(stop) = stop {
            return Ok(Collected {
                posts,
                scrolls,
                stop,
            });
        }

        page.scroll().await?;
        scrolls += 1;
    }
}
