// tests/artifact_roundtrip.rs
use chrono::{TimeZone, Utc};
use chrono_tz::Europe::Zurich;
use timeline_digest::artifact;
use timeline_digest::ingest::types::RawPost;
use timeline_digest::ingest::{filter_window, newest_first, normalize};

fn posts() -> Vec<timeline_digest::NormalizedPost> {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let raw: Vec<RawPost> = [
        ("2024-05-01T07:15:00Z", "Swiss CPI 1.4% y/y vs 1.1% expected"),
        ("2024-05-01T11:45:00Z", "Brackets [inside] the text survive"),
        ("2024-05-01T09:00:00Z", "UK mortgage approvals 61.3K"),
    ]
    .into_iter()
    .enumerate()
    .map(|(i, (ts, text))| RawPost {
        text: text.into(),
        posted_at: ts.into(),
        author_handle: "financialjuice".into(),
        source_id: Some(i.to_string()),
    })
    .collect();
    newest_first(normalize(filter_window(raw, 24, now, Zurich)))
}

#[test]
fn written_artifact_parses_back_to_the_same_texts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("timeline_last_hours.txt");
    let posts = posts();

    artifact::write(&path, &posts).unwrap();
    let content = artifact::read(&path).unwrap();
    let lines = artifact::parse(&content);

    assert_eq!(lines.len(), posts.len());
    for (line, post) in lines.iter().zip(&posts) {
        assert_eq!(line.text, post.text);
    }
    // Newest first, stamped in the reporting zone.
    assert_eq!(
        content.lines().next().unwrap(),
        "[2024-05-01 13:45 CEST] Brackets [inside] the text survive"
    );
    assert!(!dir.path().join("out").join("timeline_last_hours.txt.tmp").exists());
}

#[test]
fn each_run_replaces_the_previous_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("timeline.txt");
    let posts = posts();

    artifact::write(&path, &posts).unwrap();
    artifact::write(&path, &posts[..1]).unwrap();
    assert_eq!(artifact::parse(&artifact::read(&path).unwrap()).len(), 1);

    artifact::write(&path, &[]).unwrap();
    assert_eq!(artifact::read(&path).unwrap(), "");
}

#[test]
fn unreadable_artifact_reports_its_path() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.txt");
    let err = artifact::read(&missing).unwrap_err();
    assert_eq!(err.path, missing);
}
