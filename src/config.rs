//! Configuration loading.
//!
//! Resolution order for the config file:
//! 1. `--config` command-line argument
//! 2. `RUSTPAPERBOT_CONFIG` environment variable
//! 3. `<config_dir>/rustpaperbot/config.toml`
//! 4. Built-in defaults
//!
//! Individual CLI flags are applied on top by the binary.

use crate::error::{PaperError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "RUSTPAPERBOT_CONFIG";

/// How Scholar result pages are fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FetchBackend {
    /// Plain HTTP with stored cookies
    #[default]
    Http,
    /// One headless browser process per page
    Headless,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    /// Where database backups go; defaults to `backup/` next to the database
    pub backup_dir: Option<PathBuf>,
    /// Output directory for PDFs
    pub pdf_dir: PathBuf,
    pub scholar_base_url: String,
    pub crossref_base_url: String,
    /// Contact address for the Crossref polite pool
    pub mailto: String,
    /// Mirror base URLs, tried in order
    pub mirrors: Vec<String>,
    /// How many entries of `mirrors` to try
    pub mirror_count: usize,
    /// Also search mirrors by title after the DOI attempts fail
    pub title_fallback: bool,
    /// Fixed pause before every outbound request
    pub request_delay_ms: u64,
    pub metadata_timeout_secs: u64,
    pub page_timeout_secs: u64,
    pub proxy: Option<String>,
    pub fetch_backend: FetchBackend,
    /// Browser executable for the headless backend
    pub browser_binary: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("db").join("paper.db"),
            backup_dir: None,
            pdf_dir: PathBuf::from("pdf"),
            scholar_base_url: crate::gscholar::DEFAULT_SCHOLAR_URL.to_string(),
            crossref_base_url: crate::crossref::CROSSREF_API_URL.to_string(),
            mailto: "rustpaperbot@example.com".to_string(),
            mirrors: Vec::new(),
            mirror_count: 3,
            title_fallback: false,
            request_delay_ms: 1000,
            metadata_timeout_secs: 10,
            page_timeout_secs: 30,
            proxy: None,
            fetch_backend: FetchBackend::Http,
            browser_binary: "chromium".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration following the resolution order in the module docs
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = default_config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
            debug!(path = %path.display(), "No config file, using defaults");
        }

        Ok(Self::default())
    }

    /// Parse a TOML config file; missing keys take their default values
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PaperError::Config(format!("Cannot read config {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)?;
        info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| PaperError::Config(format!("Invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.mirrors.iter().any(|m| url::Url::parse(m).is_err()) {
            return Err(PaperError::Config("Every mirror must be an absolute URL".to_string()));
        }
        if self.page_timeout_secs == 0 || self.metadata_timeout_secs == 0 {
            return Err(PaperError::Config("Timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| {
            self.database_path
                .parent()
                .map(|p| p.join("backup"))
                .unwrap_or_else(|| PathBuf::from("backup"))
        })
    }

    /// The configured mirrors truncated to `mirror_count`
    pub fn active_mirrors(&self) -> &[String] {
        &self.mirrors[..self.mirror_count.min(self.mirrors.len())]
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout_secs)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rustpaperbot").join("config.toml"))
}
