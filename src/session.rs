// src/session.rs
//! Credential bundle loading. The bundle is a JSON cookie jar exported from a
//! logged-in browser (see `digest_login`). Cookie values never reach logs.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CredentialError;

/// One cookie record as exported by the browser.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix seconds; absent or negative means a session cookie.
    #[serde(default, alias = "expires")]
    pub expiry: Option<f64>,
    #[serde(default, alias = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

fn default_path() -> String {
    "/".to_string()
}

impl Cookie {
    fn is_usable(&self) -> bool {
        !self.name.trim().is_empty() && !self.value.is_empty() && !self.domain.trim().is_empty()
    }

    /// True when the cookie carries an expiry that lies before `now_unix`.
    pub fn is_expired_at(&self, now_unix: i64) -> bool {
        match self.expiry {
            Some(e) if e > 0.0 => (e as i64) < now_unix,
            _ => false,
        }
    }
}

// Values are secrets: Debug only shows name + domain.
impl fmt::Debug for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .finish()
    }
}

/// Opaque authenticated session handed to the fetch layer.
#[derive(Debug, Clone)]
pub struct SessionState {
    cookies: Vec<Cookie>,
}

impl SessionState {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    /// Load and validate a credential bundle.
    pub fn load(path: &Path) -> Result<Self, CredentialError> {
        let raw = fs::read_to_string(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CredentialError::Missing(path.to_path_buf()),
            _ => CredentialError::Unreadable {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        let state = Self::parse(&raw).map_err(|reason| CredentialError::Malformed {
            path: path.to_path_buf(),
            reason,
        })?;
        if state.cookies.is_empty() {
            return Err(CredentialError::Empty(path.to_path_buf()));
        }
        info!(
            target: "session",
            cookies = state.cookies.len(),
            domains = ?state.domains(),
            "credential bundle loaded"
        );
        Ok(state)
    }

    /// Accepts either a bare array of cookies or `{"cookies": [...]}`
    /// (Playwright storage-state shape). Unusable entries are dropped.
    fn parse(raw: &str) -> Result<Self, String> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Bundle {
            Bare(Vec<Cookie>),
            Wrapped { cookies: Vec<Cookie> },
        }

        let bundle: Bundle = serde_json::from_str(raw).map_err(|e| e.to_string())?;
        let all = match bundle {
            Bundle::Bare(v) => v,
            Bundle::Wrapped { cookies } => cookies,
        };
        let total = all.len();
        let cookies: Vec<Cookie> = all.into_iter().filter(Cookie::is_usable).collect();
        if cookies.len() < total {
            debug!(target: "session", dropped = total - cookies.len(), "ignored incomplete cookie records");
        }
        Ok(Self { cookies })
    }

    pub fn cookies(&self) -> &[Cookie] {
        &self.cookies
    }

    pub fn domains(&self) -> Vec<String> {
        let mut d: Vec<String> = self.cookies.iter().map(|c| c.domain.clone()).collect();
        d.sort();
        d.dedup();
        d
    }

    /// Number of cookies whose expiry lies before `now_unix`.
    pub fn expired_count(&self, now_unix: i64) -> usize {
        self.cookies.iter().filter(|c| c.is_expired_at(now_unix)).count()
    }

    /// Write the bundle as pretty JSON (used by the login helper).
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(&self.cookies)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }
}
