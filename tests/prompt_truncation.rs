// tests/prompt_truncation.rs
use timeline_digest::prompt::{self, PromptOptions, DEFAULT_TEMPLATE, TRUNCATION_MARKER_PREFIX};

/// Newest-first artifact with `n` entries, entry 0 being the newest.
fn artifact(n: usize) -> String {
    (0..n)
        .map(|i| {
            let minutes = 59 - (i % 60);
            let hour = 23 - i / 60;
            format!("[2024-05-01 {hour:02}:{minutes:02} CEST] headline number {i} with some padding text\n")
        })
        .collect()
}

#[test]
fn body_never_exceeds_budget_and_keeps_newest_entries() {
    let text = artifact(200);
    for budget in [120usize, 500, 2_000, 7_777] {
        let payload = prompt::build(DEFAULT_TEMPLATE, &text, PromptOptions::default(), budget);
        assert!(
            payload.body.chars().count() <= budget,
            "budget {budget}: got {}",
            payload.body.chars().count()
        );
        assert!(payload.omitted > 0);

        let kept: Vec<&str> = payload
            .body
            .lines()
            .filter(|l| !l.starts_with(TRUNCATION_MARKER_PREFIX))
            .collect();
        // The kept entries are exactly the newest ones, verbatim.
        let expected: Vec<&str> = text.lines().take(kept.len()).collect();
        assert_eq!(kept, expected);
        assert_eq!(kept.len() + payload.omitted, 200);
    }
}

#[test]
fn oldest_first_input_is_trimmed_from_the_top() {
    let newest_first = artifact(50);
    let mut oldest_first: Vec<&str> = newest_first.lines().collect();
    oldest_first.reverse();
    let text = oldest_first.join("\n") + "\n";

    let (out, omitted) = prompt::truncate_oldest(&text, 400);
    assert!(out.chars().count() <= 400);
    assert!(omitted > 0);
    let lines: Vec<&str> = out.lines().collect();
    assert!(lines[0].starts_with(TRUNCATION_MARKER_PREFIX));
    assert_eq!(*lines.last().unwrap(), *oldest_first.last().unwrap());
}

#[test]
fn small_artifact_passes_through_untouched() {
    let text = artifact(3);
    let payload = prompt::build(DEFAULT_TEMPLATE, &text, PromptOptions::default(), 30_000);
    assert_eq!(payload.omitted, 0);
    assert_eq!(payload.body, text);
    assert!(payload.text.contains(text.trim_end()));
}

#[test]
fn options_are_rendered_into_the_template() {
    let text = artifact(2);
    let plain = prompt::build(DEFAULT_TEMPLATE, &text, PromptOptions::default(), 30_000);
    let latest = prompt::build(
        DEFAULT_TEMPLATE,
        &text,
        PromptOptions {
            group_by_country: true,
            latest_only: true,
        },
        30_000,
    );
    assert!(!plain.text.contains("{{"));
    assert!(!latest.text.contains("{{"));
    assert!(latest.text.contains("keep only the latest development"));
    assert!(!plain.text.contains("keep only the latest development"));
}

#[test]
fn custom_template_without_placeholders_still_gets_the_posts() {
    let text = artifact(2);
    let payload = prompt::build("Summarize briefly.", &text, PromptOptions::default(), 30_000);
    assert!(payload.text.starts_with("Summarize briefly."));
    assert!(payload.text.contains("headline number 1"));
}

#[test]
fn chunks_cover_every_entry_once() {
    let text = artifact(120);
    let chunks = prompt::build_chunks(DEFAULT_TEMPLATE, &text, PromptOptions::default(), 1_000);
    assert!(chunks.len() > 1);
    let total: usize = chunks.iter().map(|c| c.body.lines().count()).sum();
    assert_eq!(total, 120);
    assert!(chunks.iter().all(|c| c.body.chars().count() <= 1_000));
}

#[test]
fn synthesis_body_is_held_to_the_budget() {
    let partial: String = (0..80)
        .map(|i| format!("- bullet {i} about rates, inflation and growth\n"))
        .collect();
    let partials = vec![format!("## Euro Area\n{partial}"), format!("## APAC\n{partial}")];

    let merge = prompt::build_synthesis(DEFAULT_TEMPLATE, &partials, PromptOptions::default(), 1_500);
    assert!(merge.body.chars().count() <= 1_500);
    assert_eq!(merge.omitted, 2);
    assert!(merge.body.contains("## Euro Area\n- bullet 0 "));
    assert!(merge.body.contains("## APAC\n- bullet 0 "));

    let small = vec!["## A\n- one".to_string(), "## B\n- two".to_string()];
    let merge = prompt::build_synthesis(DEFAULT_TEMPLATE, &small, PromptOptions::default(), 1_500);
    assert_eq!(merge.omitted, 0);
    assert_eq!(merge.body, "## A\n- one\n\n--- CHUNK SPLIT ---\n\n## B\n- two");
}
