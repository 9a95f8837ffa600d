// src/config/digest.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use crate::ingest::collector::ScrollBudget;
use crate::retry::RetryPolicy;

// --- env defaults & names ---
pub const DEFAULT_DIGEST_CONFIG_PATH: &str = "config/digest.toml";
pub const ENV_DIGEST_CONFIG_PATH: &str = "DIGEST_CONFIG_PATH";
/// `DIGEST_TEST_MODE=mock` forces the offline mock backend.
pub const ENV_TEST_MODE: &str = "DIGEST_TEST_MODE";

const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub timeline: TimelineSection,
    pub browser: BrowserSection,
    pub output: OutputSection,
    pub summary: SummarySection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimelineSection {
    pub account: String,
    pub lookback_hours: u32,
    pub cookies_path: PathBuf,
}

impl Default for TimelineSection {
    fn default() -> Self {
        Self {
            account: "financialjuice".to_string(),
            lookback_hours: 24,
            cookies_path: PathBuf::from("x_cookies.json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Chromium,
    Fixture,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub driver: Driver,
    /// JSON array of posts, read when `driver = "fixture"`.
    pub fixture_path: Option<PathBuf>,
    pub headless: bool,
    pub user_agent: String,
    pub chrome_path: Option<PathBuf>,
    pub max_scrolls: u32,
    pub scroll_wait_ms: u64,
    pub nav_timeout_secs: u64,
    pub max_fetch_secs: u64,
    pub safety_margin_minutes: u32,
    pub stall_limit: u32,
    pub max_attempts: u8,
    pub base_backoff_ms: u64,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            driver: Driver::Chromium,
            fixture_path: None,
            headless: true,
            user_agent: DEFAULT_UA.to_string(),
            chrome_path: None,
            max_scrolls: 80,
            scroll_wait_ms: 1_600,
            nav_timeout_secs: 90,
            max_fetch_secs: 300,
            safety_margin_minutes: 30,
            stall_limit: 5,
            max_attempts: 3,
            base_backoff_ms: 1_000,
        }
    }
}

impl BrowserSection {
    pub fn scroll_budget(&self) -> ScrollBudget {
        ScrollBudget {
            max_scrolls: self.max_scrolls,
            max_duration: Duration::from_secs(self.max_fetch_secs),
            safety_margin: chrono::Duration::minutes(i64::from(self.safety_margin_minutes)),
            stall_limit: self.stall_limit.max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSection {
    /// IANA name of the reporting timezone.
    pub timezone: String,
    pub artifact_path: PathBuf,
    pub report_path: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            timezone: "Europe/Zurich".to_string(),
            artifact_path: PathBuf::from("timeline_last_hours.txt"),
            report_path: PathBuf::from("summary.md"),
        }
    }
}

impl OutputSection {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("unknown timezone {:?}: {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    #[serde(alias = "open_ai")]
    OpenAi,
    Mock,
}

impl Provider {
    fn default_model(self) -> &'static str {
        match self {
            Provider::Gemini => "gemini-1.5-flash",
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Mock => "mock",
        }
    }

    fn key_env(self) -> Option<&'static str> {
        match self {
            Provider::Gemini => Some("GOOGLE_API_KEY"),
            Provider::OpenAi => Some("OPENAI_API_KEY"),
            Provider::Mock => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One call over the (possibly truncated) artifact.
    Single,
    /// Summarize fixed-size chunks, then merge the partial summaries.
    Chunked,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarySection {
    pub provider: Provider,
    pub model: Option<String>,
    /// "ENV" means: read GOOGLE_API_KEY / OPENAI_API_KEY (by provider).
    pub api_key: String,
    pub strategy: Strategy,
    pub max_body_chars: usize,
    pub chunk_chars: usize,
    pub max_attempts: u8,
    pub base_backoff_ms: u64,
    pub timeout_secs: u64,
    pub max_output_tokens: u32,
    pub max_continuations: u8,
    pub template_path: Option<PathBuf>,
    pub group_by_country: bool,
    pub latest_only: bool,
}

impl Default for SummarySection {
    fn default() -> Self {
        Self {
            provider: Provider::Gemini,
            model: None,
            api_key: "ENV".to_string(),
            strategy: Strategy::Single,
            max_body_chars: 30_000,
            chunk_chars: 15_000,
            max_attempts: 3,
            base_backoff_ms: 500,
            timeout_secs: 60,
            max_output_tokens: 4_096,
            max_continuations: 2,
            template_path: None,
            group_by_country: true,
            latest_only: false,
        }
    }
}

impl SummarySection {
    /// Provider after applying `DIGEST_TEST_MODE`.
    pub fn effective_provider(&self) -> Provider {
        if env::var(ENV_TEST_MODE).map(|v| v == "mock").unwrap_or(false) {
            Provider::Mock
        } else {
            self.provider
        }
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.effective_provider().default_model().to_string())
    }

    /// `None` when no key is configured; the summary stage turns that into
    /// an auth failure instead of failing config load.
    pub fn resolve_api_key(&self) -> Option<String> {
        let provider = self.effective_provider();
        let raw = self.api_key.trim();
        if provider == Provider::Mock {
            return Some("mock".to_string());
        }
        if raw.eq_ignore_ascii_case("env") {
            return provider
                .key_env()
                .and_then(|k| env::var(k).ok())
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty());
        }
        (!raw.is_empty()).then(|| raw.to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_backoff_ms)
    }

    /// External template if configured, else `None` (built-in template).
    pub fn load_template(&self) -> Result<Option<String>> {
        match &self.template_path {
            Some(p) => fs::read_to_string(p)
                .with_context(|| format!("reading prompt template {}", p.display()))
                .map(Some),
            None => Ok(None),
        }
    }
}

impl DigestConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg: DigestConfig =
            toml::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;
        cfg.timeline.account = cfg.timeline.account.trim().trim_start_matches('@').to_string();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config using env var + fallbacks:
    /// 1) $DIGEST_CONFIG_PATH
    /// 2) config/digest.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = env::var(ENV_DIGEST_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from_file(&pb);
            }
            bail!("{ENV_DIGEST_CONFIG_PATH} points to non-existent path {}", pb.display());
        }
        let default = PathBuf::from(DEFAULT_DIGEST_CONFIG_PATH);
        if default.exists() {
            return Self::load_from_file(&default);
        }
        let cfg = Self::default();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeline.account.is_empty() {
            bail!("timeline.account must not be empty");
        }
        if self.timeline.lookback_hours == 0 {
            bail!("timeline.lookback_hours must be a positive number of hours");
        }
        self.output.tz()?;
        if self.browser.driver == Driver::Fixture && self.browser.fixture_path.is_none() {
            bail!("browser.fixture_path is required when browser.driver = \"fixture\"");
        }
        if self.browser.max_scrolls == 0 || self.browser.nav_timeout_secs == 0 {
            bail!("browser.max_scrolls and browser.nav_timeout_secs must be positive");
        }
        if self.summary.max_body_chars == 0 || self.summary.chunk_chars == 0 {
            bail!("summary.max_body_chars and summary.chunk_chars must be positive");
        }
        if self.browser.scroll_wait_ms == 0 || self.browser.max_fetch_secs == 0 {
            bail!("browser.scroll_wait_ms and browser.max_fetch_secs must be positive");
        }
        if self.browser.max_attempts == 0 || self.summary.max_attempts == 0 {
            bail!("browser.max_attempts and summary.max_attempts must be at least 1");
        }
        if self.summary.timeout_secs == 0 || self.summary.max_output_tokens == 0 {
            bail!("summary.timeout_secs and summary.max_output_tokens must be positive");
        }
        Ok(())
    }
}
