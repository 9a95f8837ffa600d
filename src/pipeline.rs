// src/pipeline.rs
//! End-to-end run: session → fetch → window → dedup → artifact → prompt →
//! summary → report. Each stage runs once; the report is only written after
//! a successful summary, so a failed run never replaces the previous report.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use metrics::{counter, gauge};
use tracing::{info, warn};

use crate::artifact;
use crate::config::digest::{DigestConfig, Driver, Strategy};
use crate::error::{PipelineError, SummaryError};
use crate::ingest::providers::chromium::ChromiumTimelineSource;
use crate::ingest::providers::fixture::FixtureTimelineSource;
use crate::ingest::retrying::RetryingSource;
use crate::ingest::types::{TimeWindow, TimelineSource};
use crate::ingest::{ensure_metrics_described, filter_window, newest_first, normalize};
use crate::prompt::{self, PromptOptions, DEFAULT_TEMPLATE};
use crate::report::{self, MarkdownReport};
use crate::session::SessionState;
use crate::summary::{build_backend, SummaryClient};

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fetched: usize,
    pub retained: usize,
    /// Posts cut from the prompt to fit the character budget.
    pub omitted_from_prompt: usize,
    pub llm_calls: usize,
    pub artifact_path: PathBuf,
    pub report_path: PathBuf,
    pub report: MarkdownReport,
}

pub struct Pipeline {
    cfg: DigestConfig,
    tz: Tz,
    template: String,
    source: Box<dyn TimelineSource>,
    client: SummaryClient,
}

impl Pipeline {
    pub fn new(
        cfg: DigestConfig,
        source: Box<dyn TimelineSource>,
        client: SummaryClient,
    ) -> anyhow::Result<Self> {
        cfg.validate()?;
        let tz = cfg.output.tz()?;
        let template = cfg
            .summary
            .load_template()?
            .unwrap_or_else(|| DEFAULT_TEMPLATE.to_string());
        Ok(Self {
            cfg,
            tz,
            template,
            source,
            client,
        })
    }

    /// Wire the concrete driver and backend named in config.
    pub fn from_config(cfg: DigestConfig) -> anyhow::Result<Self> {
        let source: Box<dyn TimelineSource> = match cfg.browser.driver {
            Driver::Chromium => Box::new(RetryingSource::new(
                ChromiumTimelineSource::new(cfg.browser.clone()),
                cfg.browser.retry_policy(),
            )),
            Driver::Fixture => {
                let path = cfg
                    .browser
                    .fixture_path
                    .as_ref()
                    .ok_or_else(|| anyhow!("browser.fixture_path is not set"))?;
                Box::new(FixtureTimelineSource::from_path(path).context("loading fixture driver")?)
            }
        };
        let backend = build_backend(&cfg.summary)?;
        let client = SummaryClient::new(backend, cfg.summary.retry_policy())
            .with_continuations(cfg.summary.max_continuations);
        Self::new(cfg, source, client)
    }

    pub fn config(&self) -> &DigestConfig {
        &self.cfg
    }

    fn options(&self) -> PromptOptions {
        PromptOptions {
            group_by_country: self.cfg.summary.group_by_country,
            latest_only: self.cfg.summary.latest_only,
        }
    }

    /// Single or chunked summarization; returns text, omitted posts, calls made.
    async fn summarize(
        &self,
        artifact_text: &str,
        api_key: &str,
    ) -> Result<(String, usize, usize), SummaryError> {
        let s = &self.cfg.summary;
        let options = self.options();
        match s.strategy {
            Strategy::Single => {
                let payload = prompt::build(&self.template, artifact_text, options, s.max_body_chars);
                let text = self.client.summarize(&payload, api_key).await?;
                Ok((text, payload.omitted, 1))
            }
            Strategy::Chunked => {
                let chunks = prompt::build_chunks(&self.template, artifact_text, options, s.chunk_chars);
                let mut partials = Vec::with_capacity(chunks.len());
                for (i, payload) in chunks.iter().enumerate() {
                    info!(target: "summary", chunk = i + 1, of = chunks.len(), "summarizing chunk");
                    partials.push(self.client.summarize(payload, api_key).await?);
                }
                if partials.len() == 1 {
                    return Ok((partials.remove(0), 0, 1));
                }
                let merge = prompt::build_synthesis(&self.template, &partials, options, s.max_body_chars);
                let text = self.client.summarize(&merge, api_key).await?;
                Ok((text, 0, chunks.len() + 1))
            }
        }
    }

    /// Run once with `now` as the window reference.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunSummary, PipelineError> {
        ensure_metrics_described();
        let t = &self.cfg.timeline;
        let out = &self.cfg.output;

        let session = SessionState::load(&t.cookies_path)?;
        let expired = session.expired_count(now.timestamp());
        if expired > 0 {
            warn!(target: "session", expired, "credential bundle contains expired cookies");
        }

        let window = TimeWindow::trailing(now, t.lookback_hours);
        info!(
            target: "pipeline",
            source = self.source.name(),
            account = %t.account,
            lookback_hours = t.lookback_hours,
            "fetching timeline"
        );
        let raw = self
            .source
            .fetch(&session, &t.account, &window)
            .await?;
        let fetched = raw.len();
        counter!("digest_posts_fetched_total").increment(fetched as u64);

        let windowed = filter_window(raw, t.lookback_hours, now, self.tz);
        let posts = newest_first(normalize(windowed));
        info!(target: "pipeline", fetched, retained = posts.len(), "posts prepared");

        artifact::write(&out.artifact_path, &posts)?;

        if posts.is_empty() {
            let report = report::no_posts_report(&t.account, t.lookback_hours);
            report.write(&out.report_path)?;
            gauge!("digest_last_run_ts").set(now.timestamp() as f64);
            return Ok(RunSummary {
                fetched,
                retained: 0,
                omitted_from_prompt: 0,
                llm_calls: 0,
                artifact_path: out.artifact_path.clone(),
                report_path: out.report_path.clone(),
                report,
            });
        }

        let artifact_text = artifact::read(&out.artifact_path)?;
        let api_key = self.cfg.summary.resolve_api_key().unwrap_or_default();
        info!(
            target: "summary",
            backend = self.client.backend_name(),
            model = %self.cfg.summary.model(),
            key_len = api_key.len(),
            "requesting summary"
        );
        let (text, omitted, llm_calls) = match self.summarize(&artifact_text, &api_key).await {
            Ok(v) => v,
            Err(e) => {
                counter!("digest_summary_failures_total").increment(1);
                return Err(e.into());
            }
        };

        let report = report::assemble(&text)?;
        report.write(&out.report_path)?;
        gauge!("digest_last_run_ts").set(now.timestamp() as f64);

        Ok(RunSummary {
            fetched,
            retained: posts.len(),
            omitted_from_prompt: omitted,
            llm_calls,
            artifact_path: out.artifact_path.clone(),
            report_path: out.report_path.clone(),
            report,
        })
    }
}
