//! Scholar session cookies.
//!
//! Cookies exported from a real browser session are kept in a JSON file and
//! replayed as a `Cookie` header on every Scholar page request.

use crate::error::{PaperError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default cookie file: `~/.rustpaperbot_cookies.json`
fn default_cookie_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|p| p.join(".rustpaperbot_cookies.json"))
        .ok_or_else(|| PaperError::Config("Cannot determine home directory".to_string()))
}

/// Cookie entry in the browser export format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
}

/// JSON-file backed cookie store
pub struct CookieStore {
    path: PathBuf,
}

impl CookieStore {
    pub fn new() -> Result<Self> {
        Ok(Self {
            path: default_cookie_path()?,
        })
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load cookies; a missing or unreadable file yields an empty list
    pub fn load(&self) -> Vec<Cookie> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Cookie file not found");
            return Vec::new();
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<Vec<Cookie>>(&content) {
                Ok(cookies) => cookies,
                Err(e) => {
                    warn!(error = %e, "Failed to parse cookies");
                    Vec::new()
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to read cookie file");
                Vec::new()
            }
        }
    }

    /// `Cookie` header value for the given host, empty when nothing applies
    pub fn header_for(&self, host: &str) -> String {
        build_cookie_header(&self.load(), host)
    }

    /// Parse a JSON export and persist it
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let cookies: Vec<Cookie> = serde_json::from_str(json)?;
        self.save(&cookies)?;
        Ok(cookies.len())
    }

    pub fn save(&self, cookies: &[Cookie]) -> Result<()> {
        let content = serde_json::to_string_pretty(cookies)?;
        std::fs::write(&self.path, content)?;
        info!(count = cookies.len(), path = %self.path.display(), "Saved cookies");
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
            info!(path = %self.path.display(), "Cleared cookies");
        }
        Ok(())
    }
}

impl Default for CookieStore {
    fn default() -> Self {
        Self::new().unwrap_or_else(|_| Self {
            path: PathBuf::from(".rustpaperbot_cookies.json"),
        })
    }
}

/// Join the cookies whose domain matches `host` into a header value
fn build_cookie_header(cookies: &[Cookie], host: &str) -> String {
    cookies
        .iter()
        .filter(|c| {
            let domain = c.domain.trim_start_matches('.');
            host == domain || host.ends_with(&format!(".{}", domain))
        })
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}
