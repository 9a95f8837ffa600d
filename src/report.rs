// src/report.rs
//! ReportAssembler: turns untrusted model text into the final Markdown.
//!
//! Structured output is lightly repaired (code fence unwrapped, bold-line
//! headings promoted, bullets and spacing normalized). Output without any
//! recognizable heading is kept verbatim under [`FALLBACK_HEADING`].

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::artifact::write_atomic;
use crate::error::ReportError;

pub const FALLBACK_HEADING: &str = "## Digest (unstructured model output)";
pub const RISKS_HEADING: &str = "Risks & Watch-Fors";

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(\S.*?)\s*#*\s*$").expect("heading regex"));
static RE_BOLD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\*\*([^*]+?)\*\*:?\s*$").expect("bold line regex"));
static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z]*[ \t]*\n(.*?)\n?```$").expect("fence regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownReport {
    pub markdown: String,
    /// False when the fallback heading was used.
    pub structured: bool,
    /// Text of every `##` heading, in order.
    pub sections: Vec<String>,
}

impl MarkdownReport {
    pub fn has_risks_section(&self) -> bool {
        self.sections.iter().any(|s| s.eq_ignore_ascii_case(RISKS_HEADING))
    }

    /// Replace the report at `path`.
    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        write_atomic(path, self.markdown.as_bytes()).map_err(|source| ReportError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(
            target: "report",
            path = %path.display(),
            structured = self.structured,
            sections = self.sections.len(),
            "report written"
        );
        Ok(())
    }
}

fn unwrap_fence(s: &str) -> &str {
    RE_FENCE
        .captures(s)
        .and_then(|c| c.get(1))
        .map_or(s, |m| m.as_str())
}

fn is_heading(line: &str) -> bool {
    RE_HEADING.is_match(line)
}

/// Line-level repairs; returns the lines and whether any heading exists.
fn repair(body: &str) -> (Vec<String>, bool) {
    let mut lines = Vec::new();
    let mut in_code = false;
    let mut has_heading = false;
    for raw in body.lines() {
        let line = raw.trim_end();
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            lines.push(line.to_string());
            continue;
        }
        if in_code {
            lines.push(line.to_string());
            continue;
        }
        if is_heading(line) {
            has_heading = true;
            lines.push(line.to_string());
        } else if let Some(c) = RE_BOLD_LINE.captures(line) {
            has_heading = true;
            lines.push(format!("## {}", c[1].trim().trim_end_matches(':')));
        } else if let Some(rest) = line.trim_start().strip_prefix("• ") {
            lines.push(format!("- {rest}"));
        } else {
            lines.push(line.to_string());
        }
    }
    (lines, has_heading)
}

/// Blank line before headings, at most one blank line in a row.
fn tidy(lines: Vec<String>) -> String {
    let mut out = String::new();
    let mut prev_blank = true;
    for line in lines {
        let blank = line.trim().is_empty();
        if blank {
            if !prev_blank {
                out.push('\n');
            }
            prev_blank = true;
            continue;
        }
        if is_heading(&line) && !prev_blank {
            out.push('\n');
        }
        out.push_str(&line);
        out.push('\n');
        prev_blank = false;
    }
    out
}

fn section_titles(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .filter_map(|l| RE_HEADING.captures(l))
        .filter(|c| &c[1] == "##")
        .map(|c| c[2].to_string())
        .collect()
}

/// Validate and repair raw model output into the final report.
pub fn assemble(raw: &str) -> Result<MarkdownReport, ReportError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ReportError::EmptySummary);
    }

    let (lines, has_heading) = repair(unwrap_fence(trimmed).trim());
    if !has_heading {
        tracing::warn!(
            target: "report",
            chars = trimmed.chars().count(),
            "model output has no section headings, using fallback wrapping"
        );
        let markdown = format!("{FALLBACK_HEADING}\n\n{trimmed}\n");
        return Ok(MarkdownReport {
            sections: section_titles(&markdown),
            markdown,
            structured: false,
        });
    }

    let markdown = tidy(lines);
    Ok(MarkdownReport {
        sections: section_titles(&markdown),
        markdown,
        structured: true,
    })
}

/// Deterministic report for a window without posts; no model involved.
pub fn no_posts_report(account: &str, lookback_hours: u32) -> MarkdownReport {
    let markdown = format!(
        "## No news\n\n- No posts from @{account} in the last {lookback_hours} hours.\n"
    );
    MarkdownReport {
        sections: section_titles(&markdown),
        markdown,
        structured: true,
    }
}
