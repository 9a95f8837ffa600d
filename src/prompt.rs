// src/prompt.rs
//! PromptBuilder: merges the artifact into the instruction template.
//!
//! Templates may use three placeholders: `{{grouping}}`, `{{recency}}` and
//! `{{posts}}`. Missing placeholders are appended in that order, so a plain
//! instruction text works as a template too.

use crate::artifact;

pub const SYSTEM_INSTRUCTION: &str =
    "Follow the user's instructions exactly. Do not add extra sections beyond what they ask.";

pub const DEFAULT_TEMPLATE: &str = "\
Summarize the following headlines into a concise Daily Macro & Markets Recap.
Keep only the news most relevant for financial markets and group closely related items together.
{{grouping}}
Use these regions and omit any without relevant news: Euro Area; Nordics; United Kingdom; Switzerland; North America (United States, Canada); APAC (China, Japan, Australia, New Zealand).
Keep at most 5 bullet points per country and the whole recap within two pages.
{{recency}}
{{posts}}";

const GROUP_BY_COUNTRY: &str = "Divide the summary into sections by region using `## <Region>` headings, \
with a `### <Country> – <one-line headline>` subsection for each country inside multi-country regions.";
const GROUP_BY_REGION: &str =
    "Divide the summary into sections by region using `## <Region>` headings, without per-country subsections.";
const LATEST_ONLY: &str = "When several posts cover the same story, keep only the latest development and drop superseded figures.";
const OUTPUT_RULES: &str = "Return ONLY Markdown: bullet points under each heading, sections separated by a horizontal rule (---), \
optionally ending with a `## Risks & Watch-Fors` section.";

pub const TRUNCATION_MARKER_PREFIX: &str = "[... ";

/// Enumerated behavioural switches applied to the template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptOptions {
    pub group_by_country: bool,
    pub latest_only: bool,
}

/// A fully rendered request, built fresh per call.
#[derive(Debug, Clone)]
pub struct PromptPayload {
    pub system: String,
    pub template: String,
    /// Artifact text as sent (after truncation).
    pub body: String,
    pub options: PromptOptions,
    /// Entries dropped to fit the budget.
    pub omitted: usize,
    pub text: String,
}

fn truncation_marker(omitted: usize) -> String {
    format!("{TRUNCATION_MARKER_PREFIX}{omitted} older posts omitted ...]")
}

/// Keep the newest entries that fit in `budget` chars and mark the rest.
/// Works for both newest-first and oldest-first artifacts; the output keeps
/// the input orientation. Returns the text and the number of omitted entries.
pub fn truncate_oldest(artifact_text: &str, budget: usize) -> (String, usize) {
    if artifact_text.chars().count() <= budget {
        return (artifact_text.to_string(), 0);
    }

    let lines: Vec<&str> = artifact_text.lines().filter(|l| !l.trim().is_empty()).collect();
    let oldest_first = match (
        lines.first().and_then(|l| artifact::parse_line(l)),
        lines.last().and_then(|l| artifact::parse_line(l)),
    ) {
        (Some(first), Some(last)) => first.sort_key() < last.sort_key(),
        _ => false,
    };

    // Reserve room for the widest marker this input can produce.
    let reserve = truncation_marker(lines.len()).chars().count() + 1;
    let room = budget.saturating_sub(reserve);

    let newest_first: Vec<&str> = if oldest_first {
        lines.iter().rev().copied().collect()
    } else {
        lines.clone()
    };
    let mut kept: Vec<&str> = Vec::new();
    let mut used = 0usize;
    for line in newest_first {
        let len = line.chars().count() + 1;
        if used + len > room {
            break;
        }
        used += len;
        kept.push(line);
    }

    let omitted = lines.len() - kept.len();
    let marker = truncation_marker(omitted);
    if kept.is_empty() {
        return (marker.chars().take(budget).collect(), omitted);
    }

    let mut out = String::with_capacity(used + marker.len() + 1);
    if oldest_first {
        out.push_str(&marker);
        out.push('\n');
        for line in kept.iter().rev() {
            out.push_str(line);
            out.push('\n');
        }
    } else {
        for line in &kept {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str(&marker);
        out.push('\n');
    }
    (out, omitted)
}

/// Greedy split on entry (line) boundaries; no chunk exceeds `max_chars`
/// unless a single entry does.
pub fn chunk_entries(artifact_text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut cur = String::new();
    let mut cur_len = 0usize;
    for line in artifact_text.lines().filter(|l| !l.trim().is_empty()) {
        let len = line.chars().count() + 1;
        if !cur.is_empty() && cur_len + len > max_chars {
            chunks.push(std::mem::take(&mut cur));
            cur_len = 0;
        }
        cur.push_str(line);
        cur.push('\n');
        cur_len += len;
    }
    if !cur.is_empty() {
        chunks.push(cur);
    }
    chunks
}

fn apply_placeholders(template: &str, options: PromptOptions, posts_block: &str) -> String {
    let grouping = if options.group_by_country {
        GROUP_BY_COUNTRY
    } else {
        GROUP_BY_REGION
    };
    let recency = if options.latest_only { LATEST_ONLY } else { "" };

    let mut out = template.trim_end().to_string();
    for (placeholder, value) in [("{{grouping}}", grouping), ("{{recency}}", recency)] {
        if out.contains(placeholder) {
            out = out.replace(placeholder, value);
        } else if !value.is_empty() {
            out.push('\n');
            out.push_str(value);
        }
    }
    if out.contains("{{posts}}") {
        out = out.replace("{{posts}}", posts_block);
    } else {
        out.push_str("\n\n");
        out.push_str(posts_block);
    }

    // Blank lines left by empty clauses.
    let mut cleaned = String::with_capacity(out.len() + OUTPUT_RULES.len() + 2);
    let mut blank_run = 0;
    for line in out.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }
    cleaned.push('\n');
    cleaned.push_str(OUTPUT_RULES);
    cleaned
}

fn framed(label: &str, body: &str) -> String {
    format!("{label} START\n<<<\n{}\n>>>", body.trim_end())
}

/// Single-call payload; `artifact_text` is cut to `max_body_chars`.
pub fn build(
    template: &str,
    artifact_text: &str,
    options: PromptOptions,
    max_body_chars: usize,
) -> PromptPayload {
    let (body, omitted) = truncate_oldest(artifact_text, max_body_chars);
    if omitted > 0 {
        tracing::warn!(
            target: "prompt",
            omitted,
            budget = max_body_chars,
            "artifact over budget, oldest posts dropped"
        );
    }
    let text = apply_placeholders(template, options, &framed("POSTS", &body));
    PromptPayload {
        system: SYSTEM_INSTRUCTION.to_string(),
        template: template.to_string(),
        body,
        options,
        omitted,
        text,
    }
}

/// One payload per chunk for the chunked strategy.
pub fn build_chunks(
    template: &str,
    artifact_text: &str,
    options: PromptOptions,
    chunk_chars: usize,
) -> Vec<PromptPayload> {
    let chunks = chunk_entries(artifact_text, chunk_chars);
    let n = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, body)| {
            let block = format!(
                "{}\nReturn a concise Markdown summary (headings and bullet points) of this batch only.",
                framed(&format!("CHUNK {}/{n} - POSTS", i + 1), &body)
            );
            let text = apply_placeholders(template, options, &block);
            PromptPayload {
                system: SYSTEM_INSTRUCTION.to_string(),
                template: template.to_string(),
                body,
                options,
                omitted: 0,
                text,
            }
        })
        .collect()
}

const CHUNK_SPLIT: &str = "\n\n--- CHUNK SPLIT ---\n\n";
const PARTIAL_CUT_MARKER: &str = "[... rest of this partial summary omitted ...]";

/// Cut `partial` on a line boundary so it fits in `budget` chars,
/// marker included. Returns the text and whether anything was cut.
fn cap_partial(partial: &str, budget: usize) -> (String, bool) {
    if partial.chars().count() <= budget {
        return (partial.to_string(), false);
    }
    let room = budget.saturating_sub(PARTIAL_CUT_MARKER.chars().count() + 1);
    let mut out = String::new();
    let mut used = 0usize;
    for line in partial.lines() {
        let len = line.chars().count() + 1;
        if used + len > room {
            break;
        }
        out.push_str(line);
        out.push('\n');
        used += len;
    }
    out.push_str(PARTIAL_CUT_MARKER);
    (out.chars().take(budget).collect(), true)
}

/// Merge step of the chunked strategy. The joined partial summaries are
/// held to `max_body_chars` by giving each partial an equal share.
pub fn build_synthesis(
    template: &str,
    partials: &[String],
    options: PromptOptions,
    max_body_chars: usize,
) -> PromptPayload {
    let n = partials.len().max(1);
    let separators = CHUNK_SPLIT.chars().count() * (n - 1);
    let share = max_body_chars.saturating_sub(separators) / n;
    let mut cut = 0usize;
    let capped: Vec<String> = partials
        .iter()
        .map(|p| {
            let (text, was_cut) = cap_partial(p, share);
            cut += usize::from(was_cut);
            text
        })
        .collect();
    if cut > 0 {
        tracing::warn!(
            target: "prompt",
            cut,
            budget = max_body_chars,
            "partial summaries over budget, tails dropped"
        );
    }
    let body = capped.join(CHUNK_SPLIT);
    let block = format!(
        "You are given partial summaries of consecutive post batches. Merge them into ONE \
well-structured Markdown document following the instructions above.\n{}",
        framed("PARTIAL SUMMARIES", &body)
    );
    let text = apply_placeholders(template, options, &block);
    PromptPayload {
        system: SYSTEM_INSTRUCTION.to_string(),
        template: template.to_string(),
        body,
        options,
        omitted: cut,
        text,
    }
}
