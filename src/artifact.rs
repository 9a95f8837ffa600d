// src/artifact.rs
//! Intermediate text artifact: one post per line,
//! `[YYYY-MM-DD HH:MM TZ] text`, newest first. Overwritten on every run.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use chrono_tz::Tz;

use crate::error::ArtifactError;
use crate::ingest::types::NormalizedPost;

pub const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M %Z";

/// One parsed artifact line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLine {
    /// `YYYY-MM-DD HH:MM TZ` as written.
    pub stamp: String,
    pub text: String,
}

impl ArtifactLine {
    /// `YYYY-MM-DD HH:MM` part; sorts chronologically within one timezone.
    pub fn sort_key(&self) -> &str {
        self.stamp.get(..16).unwrap_or(&self.stamp)
    }
}

pub fn format_stamp(ts: &DateTime<Tz>) -> String {
    ts.format(STAMP_FORMAT).to_string()
}

pub fn format_line(post: &NormalizedPost) -> String {
    format!("[{}] {}", format_stamp(&post.posted_at), post.text)
}

/// Render all posts, one per line, in the given order.
pub fn render(posts: &[NormalizedPost]) -> String {
    let mut out = String::new();
    for p in posts {
        out.push_str(&format_line(p));
        out.push('\n');
    }
    out
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError {
        path: path.to_path_buf(),
        source,
    }
}

/// ArtifactWriter: replace the file at `path` with the rendered posts.
/// Written to a sibling temp file first, then renamed into place.
pub fn write(path: &Path, posts: &[NormalizedPost]) -> Result<(), ArtifactError> {
    write_atomic(path, render(posts).as_bytes()).map_err(io_err(path))?;
    tracing::info!(
        target: "artifact",
        path = %path.display(),
        posts = posts.len(),
        "artifact written"
    );
    Ok(())
}

pub fn read(path: &Path) -> Result<String, ArtifactError> {
    fs::read_to_string(path).map_err(io_err(path))
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    let tmp = tmp_path(path);
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Parse a single `[stamp] text` line; `None` for anything else.
pub fn parse_line(line: &str) -> Option<ArtifactLine> {
    let rest = line.strip_prefix('[')?;
    let (stamp, text) = rest.split_once("] ")?;
    Some(ArtifactLine {
        stamp: stamp.to_string(),
        text: text.trim_end().to_string(),
    })
}

pub fn parse(content: &str) -> Vec<ArtifactLine> {
    content.lines().filter_map(parse_line).collect()
}
