// src/ingest/mod.rs
pub mod collector;
pub mod providers;
pub mod retrying;
pub mod types;

use crate::ingest::types::{NormalizedPost, RawPost, TimeWindow, WindowedPost};
use chrono::{DateTime, FixedOffset, Utc};
use chrono_tz::Tz;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashSet;

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "digest_posts_fetched_total",
            "Raw posts returned by the timeline source."
        );
        describe_counter!(
            "digest_posts_malformed_total",
            "Posts dropped because their timestamp did not parse."
        );
        describe_counter!(
            "digest_posts_out_of_window_total",
            "Posts older than the lookback cutoff."
        );
        describe_counter!("digest_dedup_total", "Posts collapsed as duplicates.");
        describe_counter!(
            "digest_summary_attempts_total",
            "LLM calls issued (including retries)."
        );
        describe_counter!(
            "digest_summary_failures_total",
            "Runs that failed in the summary stage."
        );
        describe_histogram!("digest_fetch_ms", "Timeline capture time in milliseconds.");
        describe_gauge!("digest_last_run_ts", "Unix ts of the last successful run.");
    });
}

fn re(cell: &'static OnceCell<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn re_tags() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"</?[A-Za-z][A-Za-z0-9-]*(?:\s[^<>]*)?/?>")
}

fn re_urls() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"(?i)\b(?:https?://|www\.|pic\.twitter\.com/)\S+")
}

fn re_retweet() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"^(?i)(?:(?:RT\s+@\w+:?|reposted)\s*)+")
}

fn re_ws() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    re(&RE, r"\s+")
}

/// Display form: entities decoded, tags/links/re-broadcast markers stripped,
/// whitespace collapsed to single spaces (so one post is one artifact line).
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip tags and links
    out = re_tags().replace_all(&out, "").to_string();
    out = re_urls().replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = re_ws().replace_all(&out, " ").trim().to_string();

    // 5) Leading re-broadcast marker
    out = re_retweet().replace(&out, "").trim().to_string();

    out
}

/// Case/whitespace/link-insensitive key over already-normalized text.
pub fn dedup_key(normalized: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut folded = normalized.to_lowercase();
    while let Some(last) = folded.chars().last() {
        if matches!(last, '!' | '?' | '.' | ',' | ';' | ':') {
            folded.pop();
        } else {
            break;
        }
    }
    let folded = re_ws().replace_all(folded.trim(), " ");

    let digest = Sha256::digest(folded.as_bytes());
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Accepts RFC 3339 (`2024-05-01T08:30:00.000Z`) and RFC 2822.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let t = raw.trim();
    DateTime::parse_from_rfc3339(t)
        .or_else(|_| DateTime::parse_from_rfc2822(t))
        .ok()
}

/// WindowFilter: keep posts with `posted_at >= now - lookback_hours`,
/// converted to `tz`. Unparseable timestamps are logged and dropped.
pub fn filter_window(
    posts: Vec<RawPost>,
    lookback_hours: u32,
    now: DateTime<Utc>,
    tz: Tz,
) -> Vec<WindowedPost> {
    let window = TimeWindow::trailing(now, lookback_hours);
    let mut malformed = 0usize;
    let mut stale = 0usize;
    let mut out = Vec::with_capacity(posts.len());

    for post in posts {
        let Some(ts) = parse_timestamp(&post.posted_at) else {
            malformed += 1;
            tracing::warn!(
                target: "window",
                source_id = post.source_id.as_deref().unwrap_or("-"),
                posted_at = %post.posted_at,
                "dropping post with malformed timestamp"
            );
            continue;
        };
        if !window.contains(&ts) {
            stale += 1;
            continue;
        }
        out.push(WindowedPost {
            posted_at: ts.with_timezone(&tz),
            post,
        });
    }

    counter!("digest_posts_malformed_total").increment(malformed as u64);
    counter!("digest_posts_out_of_window_total").increment(stale as u64);
    tracing::debug!(
        target: "window",
        cutoff = %window.cutoff,
        kept = out.len(),
        stale,
        malformed,
        "window applied"
    );
    out
}

/// Deduplicator/Normalizer: clean text, derive keys, keep the first post per
/// key in input order. Posts that normalize to nothing are dropped.
pub fn normalize(posts: Vec<WindowedPost>) -> Vec<NormalizedPost> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(posts.len());
    let mut dup = 0usize;
    let mut blank = 0usize;

    for wp in posts {
        let text = normalize_text(&wp.post.text);
        if text.is_empty() {
            blank += 1;
            continue;
        }
        let key = dedup_key(&text);
        if !seen.insert(key.clone()) {
            dup += 1;
            continue;
        }
        out.push(NormalizedPost {
            text,
            posted_at: wp.posted_at,
            author_handle: wp.post.author_handle,
            source_id: wp.post.source_id,
            dedup_key: key,
        });
    }

    counter!("digest_dedup_total").increment(dup as u64);
    tracing::debug!(target: "dedup", kept = out.len(), dup, blank, "normalized");
    out
}

/// Stable newest-first ordering used for the artifact.
pub fn newest_first(mut posts: Vec<NormalizedPost>) -> Vec<NormalizedPost> {
    posts.sort_by(|a, b| b.posted_at.cmp(&a.posted_at));
    posts
}
