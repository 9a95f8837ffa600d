// tests/pipeline_run.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use timeline_digest::config::digest::Provider;
use timeline_digest::error::{CredentialError, FetchError, PipelineError, Stage, SummaryError};
use timeline_digest::ingest::providers::fixture::FixtureTimelineSource;
use timeline_digest::ingest::types::{RawPost, TimeWindow, TimelineSource};
use timeline_digest::report::FALLBACK_HEADING;
use timeline_digest::retry::RetryPolicy;
use timeline_digest::summary::{Completion, LlmBackend, LlmRequest, MockBackend, SummaryClient};
use timeline_digest::{artifact, DigestConfig, Pipeline, SessionState};

const COOKIES: &str = r#"[
  {"name": "auth_token", "value": "s3cr3t", "domain": ".x.com", "path": "/", "expires": 1900000000, "httpOnly": true, "secure": true},
  {"name": "ct0", "value": "csrf", "domain": ".x.com"}
]"#;

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/timeline.json")
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

fn config(dir: &Path) -> DigestConfig {
    let cookies = dir.join("x_cookies.json");
    fs::write(&cookies, COOKIES).unwrap();

    let mut cfg = DigestConfig::default();
    cfg.timeline.account = "financialjuice".into();
    cfg.timeline.lookback_hours = 24;
    cfg.timeline.cookies_path = cookies;
    cfg.output.artifact_path = dir.join("timeline_last_hours.txt");
    cfg.output.report_path = dir.join("summary.md");
    cfg.summary.provider = Provider::Mock;
    cfg
}

fn fixture_source() -> Box<dyn TimelineSource> {
    Box::new(FixtureTimelineSource::from_path(&fixture_path()).unwrap())
}

/// Returns the same outcome on every call and counts the calls.
struct Always {
    outcome: Result<Completion, SummaryError>,
    calls: Arc<AtomicUsize>,
}

impl Always {
    fn new(outcome: Result<Completion, SummaryError>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                outcome,
                calls: calls.clone(),
            },
            calls,
        )
    }
}

#[async_trait]
impl LlmBackend for Always {
    async fn complete(
        &self,
        _request: &LlmRequest<'_>,
        _api_key: &str,
    ) -> Result<Completion, SummaryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Ok(c) => Ok(c.clone()),
            Err(SummaryError::RateLimited) => Err(SummaryError::RateLimited),
            Err(e) => Err(SummaryError::BackendUnavailable(e.to_string())),
        }
    }
    fn name(&self) -> &'static str {
        "always"
    }
}

fn client(backend: impl LlmBackend + 'static) -> SummaryClient {
    SummaryClient::new(Arc::new(backend), RetryPolicy::new(3, 1))
}

#[tokio::test]
async fn full_run_writes_artifact_and_report() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let pipeline = Pipeline::new(cfg, fixture_source(), client(MockBackend::default())).unwrap();

    let run = pipeline.run(now()).await.unwrap();
    // Six posts by the account; one stale, one malformed, one duplicate.
    assert_eq!(run.fetched, 6);
    assert_eq!(run.retained, 3);
    assert_eq!(run.llm_calls, 1);
    assert_eq!(run.omitted_from_prompt, 0);

    let content = artifact::read(&run.artifact_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(
        lines,
        vec![
            "[2024-05-01 13:40 CEST] ECB KEEPS RATES UNCHANGED, AS EXPECTED",
            "[2024-05-01 12:05 CEST] US JOLTS job openings 8.49M vs 8.68M expected",
            "[2024-05-01 10:15 CEST] SNB's Jordan: inflation & franc strength remain in focus",
        ]
    );

    let report = fs::read_to_string(&run.report_path).unwrap();
    assert!(report.starts_with("## Mock"));
    assert!(run.report.structured);
}

#[tokio::test(start_paused = true)]
async fn repeated_rate_limits_fail_the_run_and_keep_the_old_report() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let report_path = cfg.output.report_path.clone();
    fs::write(&report_path, "## Yesterday\n- previous digest\n").unwrap();

    let (backend, calls) = Always::new(Err(SummaryError::RateLimited));
    let pipeline = Pipeline::new(cfg, fixture_source(), client(backend)).unwrap();

    let err = pipeline.run(now()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Summary(SummaryError::RateLimited)));
    assert_eq!(err.stage(), Stage::Summary);
    assert!(err.guidance().is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        fs::read_to_string(&report_path).unwrap(),
        "## Yesterday\n- previous digest\n"
    );
}

#[tokio::test]
async fn unstructured_reply_is_wrapped_under_fallback_heading() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let reply = "The ECB held rates.\nSwiss inflation stays low.";
    let (backend, _) = Always::new(Ok(Completion {
        text: reply.into(),
        truncated: false,
    }));
    let pipeline = Pipeline::new(cfg, fixture_source(), client(backend)).unwrap();

    let run = pipeline.run(now()).await.unwrap();
    assert!(!run.report.structured);
    let report = fs::read_to_string(&run.report_path).unwrap();
    assert_eq!(report, format!("{FALLBACK_HEADING}\n\n{reply}\n"));
    assert_eq!(report.matches("## ").count(), 1);
}

#[tokio::test]
async fn empty_window_skips_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let (backend, calls) = Always::new(Err(SummaryError::BackendUnavailable("unused".into())));
    let pipeline = Pipeline::new(cfg, fixture_source(), client(backend)).unwrap();

    let later = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let run = pipeline.run(later).await.unwrap();
    assert_eq!(run.retained, 0);
    assert_eq!(run.llm_calls, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(artifact::read(&run.artifact_path).unwrap(), "");
    let report = fs::read_to_string(&run.report_path).unwrap();
    assert!(report.starts_with("## No news"));
}

#[tokio::test]
async fn missing_credentials_stop_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.timeline.cookies_path = dir.path().join("absent.json");
    let artifact_path = cfg.output.artifact_path.clone();
    let pipeline = Pipeline::new(cfg, fixture_source(), client(MockBackend::default())).unwrap();

    let err = pipeline.run(now()).await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Session(CredentialError::Missing(_))
    ));
    assert_eq!(err.stage(), Stage::Session);
    assert!(!artifact_path.exists());
}

struct LoggedOut;

#[async_trait]
impl TimelineSource for LoggedOut {
    async fn fetch(
        &self,
        _session: &SessionState,
        _account: &str,
        _window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError> {
        Err(FetchError::AuthExpired)
    }
    fn name(&self) -> &'static str {
        "logged-out"
    }
}

#[tokio::test]
async fn expired_session_is_reported_as_fetch_failure() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let pipeline = Pipeline::new(cfg, Box::new(LoggedOut), client(MockBackend::default())).unwrap();

    let err = pipeline.run(now()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Fetch(FetchError::AuthExpired)));
    assert!(err.to_string().starts_with("[fetch]"));
    assert!(err.guidance().unwrap().contains("digest_login"));
}

#[tokio::test]
async fn missing_api_key_is_an_auth_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    cfg.summary.provider = Provider::Gemini;
    cfg.summary.api_key = String::new();
    let (backend, calls) = Always::new(Ok(Completion {
        text: "## Never".into(),
        truncated: false,
    }));
    let pipeline = Pipeline::new(cfg, fixture_source(), client(backend)).unwrap();

    let err = pipeline.run(now()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Summary(SummaryError::AuthInvalid)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unwritable_artifact_aborts_before_the_summary() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = config(dir.path());
    // A directory where the artifact file should go.
    let blocked = dir.path().join("artifact_dir");
    fs::create_dir_all(blocked.join("keep")).unwrap();
    cfg.output.artifact_path = blocked.clone();
    let report_path = cfg.output.report_path.clone();
    let (backend, calls) = Always::new(Ok(Completion {
        text: "## Never".into(),
        truncated: false,
    }));
    let pipeline = Pipeline::new(cfg, fixture_source(), client(backend)).unwrap();

    let err = pipeline.run(now()).await.unwrap_err();
    match &err {
        PipelineError::Artifact(e) => assert_eq!(e.path, blocked),
        other => panic!("expected artifact failure, got {other}"),
    }
    assert_eq!(err.stage(), Stage::Artifact);
    assert!(err.to_string().starts_with("[artifact]"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(!report_path.exists());
    assert!(!dir.path().join("artifact_dir.tmp").exists());
}

/// Records the window it was asked for and returns nothing.
struct WindowRecorder(Arc<std::sync::Mutex<Option<TimeWindow>>>);

#[async_trait]
impl TimelineSource for WindowRecorder {
    async fn fetch(
        &self,
        _session: &SessionState,
        _account: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError> {
        *self.0.lock().unwrap() = Some(*window);
        Ok(Vec::new())
    }
    fn name(&self) -> &'static str {
        "recorder"
    }
}

#[tokio::test]
async fn fetch_uses_the_run_reference_time() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());
    let seen = Arc::new(std::sync::Mutex::new(None));
    let source = Box::new(WindowRecorder(seen.clone()));

    let pipeline = Pipeline::new(cfg, source, client(MockBackend::default())).unwrap();
    pipeline.run(now()).await.unwrap();
    let window = seen.lock().unwrap().expect("source was called");
    assert_eq!(window, TimeWindow::trailing(now(), 24));
    assert_eq!(window.now, now());
}
