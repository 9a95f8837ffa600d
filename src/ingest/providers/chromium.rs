// src/ingest/providers/chromium.rs
//! Headless Chromium timeline driver (Chrome DevTools Protocol).
//!
//! All DOM knowledge lives in the scripts below; if the platform changes
//! its markup, this is the only file that needs to follow.

use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams, TimeSinceEpoch};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use metrics::histogram;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;

use crate::config::digest::BrowserSection;
use crate::error::FetchError;
use crate::ingest::collector::{collect_timeline, TimelinePage};
use crate::ingest::types::{RawPost, TimeWindow, TimelineSource};
use crate::session::{Cookie, SessionState};

const BASE_URL: &str = "https://x.com";
const LOGIN_URL: &str = "https://x.com/i/flow/login";

const EXTRACT_POSTS_JS: &str = r#"
Array.from(document.querySelectorAll("article[data-testid='tweet']")).map(a => {
  const link = a.querySelector('a[role="link"][href*="/status/"]');
  const time = a.querySelector('time');
  const parts = Array.from(a.querySelectorAll('[data-testid="tweetText"]')).map(n => n.innerText);
  return {
    href: link ? link.getAttribute('href') : null,
    datetime: time ? time.getAttribute('datetime') : null,
    text: parts.join('\n')
  };
})
"#;

const PROBE_PAGE_JS: &str = r#"
({
  ready: document.readyState,
  tweets: document.querySelectorAll("article[data-testid='tweet']").length,
  login: !!document.querySelector('[data-testid="loginButton"], input[autocomplete="username"]')
    || location.pathname.startsWith('/i/flow/login') || location.pathname === '/login',
  column: !!document.querySelector('[data-testid="primaryColumn"]'),
  empty: !!document.querySelector('[data-testid="emptyState"]')
})
"#;

const DISMISS_CONSENT_JS: &str = r#"
(() => {
  const labels = ["Accept", "I agree", "Allow all", "Accept all cookies"];
  let clicked = 0;
  for (const b of document.querySelectorAll('button, [role="button"]')) {
    if (labels.includes((b.innerText || '').trim())) { b.click(); clicked++; }
  }
  return clicked;
})()
"#;

const SCROLL_JS: &str = "window.scrollBy(0, 20000); true";

#[derive(Debug, Deserialize)]
struct ScrapedArticle {
    href: Option<String>,
    datetime: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct PageProbe {
    ready: String,
    tweets: u32,
    login: bool,
    column: bool,
    empty: bool,
}

fn cdp_err(what: &str, e: CdpError) -> FetchError {
    match e {
        CdpError::Timeout => FetchError::NetworkTimeout(what.to_string()),
        other => FetchError::Browser(format!("{what}: {other}")),
    }
}

/// Bound a CDP call; elapsed or protocol timeouts become `NetworkTimeout`.
async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, CdpError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(cdp_err(what, e)),
        Err(_) => Err(FetchError::NetworkTimeout(what.to_string())),
    }
}

async fn eval<T: DeserializeOwned>(
    page: &Page,
    limit: Duration,
    what: &str,
    js: &str,
) -> Result<T, FetchError> {
    let params = EvaluateParams::builder()
        .expression(js)
        .return_by_value(true)
        .build()
        .map_err(FetchError::Browser)?;
    let res = bounded(limit, what, page.evaluate_expression(params)).await?;
    res.into_value::<T>()
        .map_err(|e| FetchError::LayoutChanged(format!("{what}: unexpected script result ({e})")))
}

/// Handle from a status link like `/financialjuice/status/1789...`.
fn handle_from_href(href: &str) -> Option<String> {
    let mut parts = href.trim_start_matches('/').split('/');
    let handle = parts.next()?;
    (parts.next() == Some("status") && !handle.is_empty()).then(|| handle.to_string())
}

fn to_cookie_params(session: &SessionState) -> Result<Vec<CookieParam>, FetchError> {
    session
        .cookies()
        .iter()
        .map(|c| {
            let mut b = CookieParam::builder()
                .name(c.name.clone())
                .value(c.value.clone())
                .domain(c.domain.clone())
                .path(c.path.clone())
                .secure(c.secure)
                .http_only(c.http_only);
            if let Some(exp) = c.expiry.filter(|e| *e > 0.0) {
                b = b.expires(TimeSinceEpoch::new(exp));
            }
            // Only the name is reported; the value stays out of errors.
            b.build()
                .map_err(|e| FetchError::Browser(format!("cookie {}: {e}", c.name)))
        })
        .collect()
}

struct LaunchedBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl LaunchedBrowser {
    async fn launch(settings: &BrowserSection, headless: bool) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .window_size(1280, 2000)
            .request_timeout(Duration::from_secs(settings.nav_timeout_secs))
            .arg("--disable-blink-features=AutomationControlled")
            .arg(format!("--user-agent={}", settings.user_agent));
        if !headless {
            builder = builder.with_head();
        }
        if let Some(path) = &settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(FetchError::Browser)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("launching chromium: {e}")))?;
        let handler = tokio::spawn(async move {
            while let Some(ev) = handler.next().await {
                if let Err(e) = ev {
                    tracing::debug!(target: "fetch", error = %e, "cdp handler event error");
                }
            }
        });
        Ok(Self { browser, handler })
    }

    async fn shutdown(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::debug!(target: "fetch", error = %e, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

/// [`TimelinePage`] over a live Chromium tab.
struct ChromiumPage<'a> {
    page: &'a Page,
    account: &'a str,
    step_timeout: Duration,
    scroll_wait: Duration,
}

#[async_trait]
impl TimelinePage for ChromiumPage<'_> {
    async fn visible_posts(&mut self) -> Result<Vec<RawPost>, FetchError> {
        let scraped: Vec<ScrapedArticle> =
            eval(self.page, self.step_timeout, "reading timeline", EXTRACT_POSTS_JS).await?;
        let mut out = Vec::with_capacity(scraped.len());
        let mut skipped = 0usize;
        for a in scraped {
            // Promoted/ad cards carry no status link or timestamp.
            let (Some(href), Some(datetime)) = (a.href, a.datetime) else {
                skipped += 1;
                continue;
            };
            out.push(RawPost {
                author_handle: handle_from_href(&href).unwrap_or_else(|| self.account.to_string()),
                text: a.text.trim().to_string(),
                posted_at: datetime,
                source_id: Some(href),
            });
        }
        if skipped > 0 {
            tracing::debug!(target: "fetch", skipped, "articles without status link or time");
        }
        Ok(out)
    }

    async fn scroll(&mut self) -> Result<(), FetchError> {
        let _: bool = eval(self.page, self.step_timeout, "scrolling", SCROLL_JS).await?;
        tokio::time::sleep(self.scroll_wait).await;
        Ok(())
    }
}

/// TimelineFetcher backed by headless Chromium.
pub struct ChromiumTimelineSource {
    settings: BrowserSection,
}

impl ChromiumTimelineSource {
    pub fn new(settings: BrowserSection) -> Self {
        Self { settings }
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.nav_timeout_secs.max(1))
    }

    /// Poll until the timeline rendered, the login wall appeared, or the
    /// navigation budget ran out.
    async fn await_timeline(&self, page: &Page) -> Result<(), FetchError> {
        let deadline = Instant::now() + self.step_timeout();
        loop {
            let probe: PageProbe =
                eval(page, self.step_timeout(), "probing page", PROBE_PAGE_JS).await?;
            if probe.login {
                return Err(FetchError::AuthExpired);
            }
            if probe.tweets > 0 || probe.empty {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(match (probe.ready.as_str(), probe.column) {
                    ("complete", true) => FetchError::LayoutChanged(
                        "timeline column rendered but no post articles matched".into(),
                    ),
                    ("complete", false) => {
                        FetchError::LayoutChanged("timeline column not found".into())
                    }
                    _ => FetchError::NetworkTimeout("waiting for the timeline to render".into()),
                });
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    async fn capture(
        &self,
        browser: &Browser,
        session: &SessionState,
        account: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError> {
        let step = self.step_timeout();
        let page = bounded(step, "opening tab", browser.new_page("about:blank")).await?;

        let cookies = to_cookie_params(session)?;
        bounded(step, "injecting session", page.execute(SetCookiesParams::new(cookies))).await?;

        let url = format!("{BASE_URL}/{}", account.trim_start_matches('@'));
        bounded(step, "loading the timeline", page.goto(url.as_str())).await?;

        let clicked: u32 = eval(&page, step, "dismissing consent", DISMISS_CONSENT_JS).await?;
        if clicked > 0 {
            tracing::debug!(target: "fetch", clicked, "dismissed consent overlay");
        }
        self.await_timeline(&page).await?;

        let mut tab = ChromiumPage {
            page: &page,
            account,
            step_timeout: step,
            scroll_wait: Duration::from_millis(self.settings.scroll_wait_ms),
        };
        let collected = collect_timeline(&mut tab, window.cutoff, &self.settings.scroll_budget()).await?;
        tracing::info!(
            target: "fetch",
            account,
            posts = collected.posts.len(),
            scrolls = collected.scrolls,
            stop = ?collected.stop,
            "timeline captured"
        );
        Ok(collected.posts)
    }
}

/// One browser launch per call; retries are layered on by
/// [`RetryingSource`](crate::ingest::retrying::RetryingSource).
#[async_trait]
impl TimelineSource for ChromiumTimelineSource {
    async fn fetch(
        &self,
        session: &SessionState,
        account: &str,
        window: &TimeWindow,
    ) -> Result<Vec<RawPost>, FetchError> {
        let t0 = Instant::now();
        let launched = LaunchedBrowser::launch(&self.settings, self.settings.headless).await?;
        let res = self
            .capture(&launched.browser, session, account, window)
            .await;
        launched.shutdown().await;

        histogram!("digest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        res
    }

    fn name(&self) -> &'static str {
        "chromium"
    }
}

/// Open a visible browser on the login flow, wait for the operator to press
/// Enter once logged in, then save the cookie jar to `out`.
pub async fn export_session(settings: &BrowserSection, out: &Path) -> anyhow::Result<usize> {
    let launched = LaunchedBrowser::launch(settings, false).await?;
    let res = async {
        let page = launched.browser.new_page(LOGIN_URL).await?;
        println!("A browser window opened. Log in, and once your timeline is visible press Enter here...");
        let mut line = String::new();
        tokio::io::BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;

        let cookies: Vec<Cookie> = page
            .get_cookies()
            .await?
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expiry: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
            })
            .collect();
        let state = SessionState::new(cookies);
        state.save(out)?;
        anyhow::Ok(state.cookies().len())
    }
    .await;
    launched.shutdown().await;
    res
}
