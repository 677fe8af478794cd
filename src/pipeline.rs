//! Session context: the store and every client built once from [`AppConfig`],
//! plus the end-to-end operations the CLI exposes.

use crate::config::AppConfig;
use crate::cookies::CookieStore;
use crate::crossref::CrossrefClient;
use crate::dedup::{self, DedupReport};
use crate::download::{self, DownloadOptions, DownloadReport, Downloader};
use crate::error::{PaperError, Result};
use crate::gscholar::{ScholarClient, ScholarOptions};
use crate::store::{PaperStore, SaveReport};
use crate::validator::{self, ValidateOptions, ValidationReport};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::info;

/// A search stage followed by a save
#[derive(Debug)]
pub struct SearchReport {
    pub found: usize,
    /// Pages or DOIs that could not be fetched
    pub failures: Vec<String>,
    pub saved: SaveReport,
}

impl SearchReport {
    pub fn summary(&self) -> String {
        let mut message = format!("Found {} papers. {}", self.found, self.saved.summary());
        if !self.failures.is_empty() {
            message.push_str(&format!(". Failed: {}", self.failures.join(", ")));
        }
        message
    }
}

#[derive(Debug)]
pub struct ValidateReport {
    pub validation: ValidationReport,
    pub scholar: SaveReport,
    pub crossref: SaveReport,
    pub verified: SaveReport,
}

impl ValidateReport {
    pub fn summary(&self) -> String {
        format!(
            "{}. {}. {}. {}",
            self.validation.summary(),
            self.scholar.summary(),
            self.crossref.summary(),
            self.verified.summary()
        )
    }
}

pub struct SessionContext {
    config: AppConfig,
    store: PaperStore,
    crossref: CrossrefClient,
    scholar: ScholarClient,
    downloader: Downloader,
}

impl SessionContext {
    /// Build a session with the default cookie file
    pub async fn open(config: AppConfig) -> Result<Self> {
        Self::with_cookies(config, &CookieStore::default()).await
    }

    pub async fn with_cookies(config: AppConfig, cookies: &CookieStore) -> Result<Self> {
        let store = PaperStore::open(&config.database_path).await?;
        store.init_schema().await?;

        let host = url::Url::parse(&config.scholar_base_url)
            .map_err(|e| PaperError::Config(format!("Invalid Scholar URL: {}", e)))?
            .host_str()
            .unwrap_or_default()
            .to_string();
        let scholar = ScholarClient::new(ScholarOptions::from_config(&config, cookies.header_for(&host)))?;
        let crossref = CrossrefClient::from_config(&config)?;
        let downloader = Downloader::new(DownloadOptions::from_config(&config))?;

        info!(database = %config.database_path.display(), "Session ready");
        Ok(Self {
            config,
            store,
            crossref,
            scholar,
            downloader,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &PaperStore {
        &self.store
    }

    /// Scrape Scholar pages and save them to `scholar_papers`
    pub async fn scholar_search(&self, query: &str, pages: &[u32], min_year: Option<i32>) -> Result<SearchReport> {
        let search = self.scholar.search_pages(query, pages, min_year).await;
        let saved = self.store.save_scholar_papers(&search.records, query).await?;
        Ok(SearchReport {
            found: search.records.len(),
            failures: search.failed_pages.iter().map(|p| format!("page {}", p)).collect(),
            saved,
        })
    }

    /// Free-text Crossref search saved to `crossref_papers`
    pub async fn crossref_search(&self, query: &str, rows: usize) -> Result<SearchReport> {
        let records = self.crossref.search(query, rows).await?;
        let saved = self.store.save_crossref_papers(&records).await?;
        Ok(SearchReport {
            found: records.len(),
            failures: Vec::new(),
            saved,
        })
    }

    /// Resolve DOIs and save them to `crossref_papers`
    pub async fn doi_search(&self, dois: &[String]) -> Result<SearchReport> {
        let lookup = self.crossref.lookup_dois(dois, self.config.request_delay()).await;
        let saved = self.store.save_crossref_papers(&lookup.records).await?;
        Ok(SearchReport {
            found: lookup.records.len(),
            failures: lookup.not_found.into_iter().chain(lookup.failed).collect(),
            saved,
        })
    }

    /// Scholar page 1, reconciled against Crossref. The scraped rows, the
    /// exact Crossref matches and the reconciled rows are saved in that order
    /// so verified rows link to both sources
    pub async fn validate(&self, query: &str, max_results: usize, min_year: Option<i32>) -> Result<ValidateReport> {
        let scraped = self.scholar.search_page(query, 1).await?;
        let scholar = self.store.save_scholar_papers(&scraped, query).await?;

        let options = ValidateOptions {
            max_results,
            min_year,
            delay: self.config.request_delay(),
        };
        let validation = validator::reconcile(scraped, &self.crossref, &options).await;
        let crossref = self.store.save_crossref_papers(&validation.crossref_matches).await?;
        let verified = self.store.save_verified_papers(&validation.records).await?;

        Ok(ValidateReport {
            validation,
            scholar,
            crossref,
            verified,
        })
    }

    /// Acquire PDFs for verified papers at 1-based positions in `range`
    pub async fn download(&self, range: RangeInclusive<usize>) -> Result<DownloadReport> {
        download::download_batch(&self.store, &self.downloader, range).await
    }

    pub async fn deduplicate(&self) -> Result<DedupReport> {
        dedup::deduplicate(&self.store, &self.config.database_path, &self.config.backup_dir()).await
    }

    pub fn backup(&self) -> Result<PathBuf> {
        dedup::backup_database(&self.config.database_path, &self.config.backup_dir())
    }

    /// Close the session and replace the database with `backup`
    pub async fn restore(self, backup: &Path) -> Result<()> {
        let database = self.config.database_path.clone();
        self.store.close().await;
        dedup::restore_database(backup, &database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> AppConfig {
        AppConfig {
            database_path: dir.path().join("db").join("paper.db"),
            pdf_dir: dir.path().join("pdf"),
            request_delay_ms: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = TempDir::new().expect("temp dir");
        let cookies = CookieStore::with_path(dir.path().join("cookies.json"));
        let session = SessionContext::with_cookies(config(&dir), &cookies).await.expect("session");
        assert!(session.store().table_exists(Table::Fulltext).await.expect("exists"));
    }

    #[tokio::test]
    async fn test_backup_and_restore() {
        let dir = TempDir::new().expect("temp dir");
        let cookies = CookieStore::with_path(dir.path().join("cookies.json"));
        let session = SessionContext::with_cookies(config(&dir), &cookies).await.expect("session");

        let backup = session.backup().expect("backup");
        assert!(backup.starts_with(dir.path().join("db").join("backup")));

        session
            .store()
            .save_scholar_papers(&[crate::record::PaperRecord::new("After Backup")], "q")
            .await
            .expect("save");
        session.restore(&backup).await.expect("restore");

        let session = SessionContext::with_cookies(config(&dir), &cookies).await.expect("session");
        assert_eq!(session.store().count(Table::Scholar).await.expect("count"), 0);
    }
}
