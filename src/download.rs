//! PDF acquisition.
//!
//! A record's stored URL is tried first, then each configured mirror by DOI,
//! then (optionally) each mirror by title. Mirror pages are HTML: the PDF link
//! is pulled out with an ordered list of patterns, resolved against the mirror
//! base and fetched. The first acceptable body is written to
//! `<pdf_dir>/<sanitized title>.pdf`.

use crate::config::AppConfig;
use crate::error::{PaperError, Result};
use crate::record::{sanitize_filename, PaperRecord};
use crate::store::{FulltextEntry, PaperStore};
use regex::Regex;
use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Bodies at or below this size are never accepted as PDFs
pub const MIN_PDF_BYTES: usize = 1000;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Characters scanned on each side of the first "save" for the fallback
const SAVE_WINDOW: usize = 200;

/// Finds a PDF link in a mirror page
pub trait PdfLinkExtractor {
    fn extract(&self, html: &str) -> Option<String>;
}

/// Ordered regex patterns, first hit wins, then a scan around "save"
pub struct PatternLinkExtractor {
    patterns: Vec<Regex>,
    nearby_href: Regex,
    nearby_onclick: Regex,
}

impl PatternLinkExtractor {
    pub fn new() -> Result<Self> {
        let patterns = [
            // save button
            r#"(?i)<button[^>]*onclick="location\.href='([^']+)'[^>]*>save<"#,
            r#"(?i)<button[^>]*onclick="location\.href='([^']+)'"#,
            r#"(?i)location\.href='([^']+)'"#,
            r#"(?i)location\.href="([^"]+)""#,
            r#"(?i)<iframe[^>]*src="([^"]+)""#,
            r#"(?i)<embed[^>]*src="([^"]+)""#,
            r#"(?i)(/downloads/[^"'\s<>]+\.pdf)"#,
            r#"(?i)(https?://[^\s<>"]+?\.pdf)"#,
            r#"(?i)<a[^>]*href="([^"]*\.pdf)""#,
            r#"(?i)<meta[^>]*content="([^"]*\.pdf)""#,
            r#"(?i)window\.location\.href\s*=\s*['"]([^'"]+)['"]"#,
        ]
        .iter()
        .map(|p| compile(p))
        .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            patterns,
            nearby_href: compile(r#"href=['"]([^'"]+)['"]"#)?,
            nearby_onclick: compile(r#"onclick=['"][^'"]+=['"](https?://[^'"]+)['"]"#)?,
        })
    }

    fn near_save(&self, html: &str) -> Option<String> {
        let pos = html.to_ascii_lowercase().find("save")?;
        let start = floor_boundary(html, pos.saturating_sub(SAVE_WINDOW));
        let end = floor_boundary(html, (pos + SAVE_WINDOW).min(html.len()));
        let window = html.get(start..end)?;

        first_capture(&self.nearby_href, window).or_else(|| first_capture(&self.nearby_onclick, window))
    }
}

impl PdfLinkExtractor for PatternLinkExtractor {
    fn extract(&self, html: &str) -> Option<String> {
        for (idx, pattern) in self.patterns.iter().enumerate() {
            if let Some(link) = first_capture(pattern, html) {
                debug!(pattern = idx + 1, link = %link, "PDF link found");
                return Some(link);
            }
        }
        self.near_save(html)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| PaperError::Parse(format!("Bad link pattern: {}", e)))
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    let caps = re.captures(text)?;
    caps.get(1)
        .or_else(|| caps.get(0))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Resolve a link found on a mirror page: `//host/..` gets `https:`,
/// absolute URLs are kept, anything else is joined onto the mirror base.
pub fn resolve_link(mirror_base: &str, link: &str) -> Option<String> {
    if let Some(rest) = link.strip_prefix("//") {
        return Some(format!("https://{}", rest));
    }
    if link.starts_with("http://") || link.starts_with("https://") {
        return Some(link.to_string());
    }
    Url::parse(mirror_base)
        .and_then(|base| base.join(link))
        .map(|u| u.to_string())
        .ok()
}

/// A body is a PDF if it is larger than [`MIN_PDF_BYTES`] and either the
/// content type mentions pdf or the body carries the PDF magic
pub fn is_acceptable_pdf(content_type: &str, body: &[u8]) -> bool {
    body.len() > MIN_PDF_BYTES
        && (content_type.to_ascii_lowercase().contains("pdf") || body.starts_with(b"%PDF-"))
}

/// Whether `pdf_dir` already holds `<stem>.pdf`, ignoring case
pub fn already_downloaded(pdf_dir: &Path, stem: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(pdf_dir) else {
        return false;
    };
    let wanted = stem.to_lowercase();
    entries.flatten().any(|entry| {
        let path = entry.path();
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        is_pdf
            && path
                .file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|s| s.to_lowercase() == wanted)
    })
}

/// Where an accepted PDF came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdfSource {
    Direct,
    MirrorDoi(String),
    MirrorTitle(String),
}

impl fmt::Display for PdfSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::MirrorDoi(base) => write!(f, "mirror:{}", base),
            Self::MirrorTitle(base) => write!(f, "mirror-title:{}", base),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    AlreadyPresent(PathBuf),
    /// Neither a DOI nor a stored URL
    NotDownloadable,
    Downloaded {
        path: PathBuf,
        url: String,
        source: PdfSource,
        content_type: String,
        bytes: usize,
    },
    Failed {
        attempts: usize,
    },
}

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub pdf_dir: PathBuf,
    /// Mirror base URLs in the order they are tried
    pub mirrors: Vec<String>,
    pub title_fallback: bool,
    pub delay: Duration,
    pub metadata_timeout: Duration,
    pub page_timeout: Duration,
}

impl DownloadOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            pdf_dir: config.pdf_dir.clone(),
            mirrors: config.active_mirrors().to_vec(),
            title_fallback: config.title_fallback,
            delay: config.request_delay(),
            metadata_timeout: config.metadata_timeout(),
            page_timeout: config.page_timeout(),
        }
    }
}

struct Fetched {
    url: String,
    content_type: String,
    body: Vec<u8>,
}

pub struct Downloader<E = PatternLinkExtractor> {
    client: reqwest::Client,
    extractor: E,
    options: DownloadOptions,
}

impl Downloader<PatternLinkExtractor> {
    pub fn new(options: DownloadOptions) -> Result<Self> {
        Self::with_extractor(options, PatternLinkExtractor::new()?)
    }
}

impl<E: PdfLinkExtractor> Downloader<E> {
    pub fn with_extractor(options: DownloadOptions, extractor: E) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PaperError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            extractor,
            options,
        })
    }

    pub fn pdf_dir(&self) -> &Path {
        &self.options.pdf_dir
    }

    /// Try every source for `record` in order. Only file system errors are
    /// returned as `Err`; network failures just move on to the next source.
    pub async fn acquire(&self, record: &PaperRecord) -> Result<DownloadOutcome> {
        let stem = sanitize_filename(&record.title);
        let target = self.options.pdf_dir.join(format!("{}.pdf", stem));

        if stem.is_empty() {
            warn!("Record has no usable title for a file name");
            return Ok(DownloadOutcome::NotDownloadable);
        }
        if already_downloaded(&self.options.pdf_dir, &stem) {
            info!(title = %record.title, "Already downloaded");
            return Ok(DownloadOutcome::AlreadyPresent(target));
        }
        if !record.can_be_downloaded() {
            return Ok(DownloadOutcome::NotDownloadable);
        }

        let mut attempts = 0;

        if let Some(url) = record.source_url.as_deref() {
            attempts += 1;
            if let Some(fetched) = self.fetch_pdf(url).await {
                return self.save(target, fetched, PdfSource::Direct).await;
            }
        }

        if let Some(doi) = record.doi.as_deref() {
            for base in &self.options.mirrors {
                attempts += 1;
                if let Some(fetched) = self.try_mirror(base, doi).await {
                    return self.save(target, fetched, PdfSource::MirrorDoi(base.clone())).await;
                }
            }
        }

        if self.options.title_fallback {
            let encoded = urlencoding::encode(&record.title).into_owned();
            for base in &self.options.mirrors {
                attempts += 1;
                if let Some(fetched) = self.try_mirror(base, &encoded).await {
                    return self.save(target, fetched, PdfSource::MirrorTitle(base.clone())).await;
                }
            }
        }

        warn!(title = %record.title, attempts, "All download attempts failed");
        Ok(DownloadOutcome::Failed { attempts })
    }

    async fn try_mirror(&self, base: &str, key: &str) -> Option<Fetched> {
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let page_url = format!("{}{}", base, key);

        let (_, html) = self.get(&page_url, self.options.metadata_timeout).await?;
        let html = String::from_utf8_lossy(&html);
        let Some(link) = self.extractor.extract(&html) else {
            debug!(url = %page_url, "No PDF link on mirror page");
            return None;
        };
        let pdf_url = resolve_link(&base, &link)?;
        self.fetch_pdf(&pdf_url).await
    }

    async fn fetch_pdf(&self, url: &str) -> Option<Fetched> {
        let (content_type, body) = self.get(url, self.options.page_timeout).await?;
        if is_acceptable_pdf(&content_type, &body) {
            Some(Fetched {
                url: url.to_string(),
                content_type,
                body,
            })
        } else {
            debug!(url, content_type = %content_type, bytes = body.len(), "Response is not a PDF");
            None
        }
    }

    /// Courtesy delay, then GET; failures are logged and yield `None`
    async fn get(&self, url: &str, timeout: Duration) -> Option<(String, Vec<u8>)> {
        if !self.options.delay.is_zero() {
            tokio::time::sleep(self.options.delay).await;
        }
        debug!(url, "GET");

        let response = match self.client.get(url).timeout(timeout).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "Request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(url, status = %response.status(), "Unexpected status");
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        match response.bytes().await {
            Ok(body) => Some((content_type, body.to_vec())),
            Err(e) => {
                warn!(url, error = %e, "Failed to read body");
                None
            }
        }
    }

    async fn save(&self, path: PathBuf, fetched: Fetched, source: PdfSource) -> Result<DownloadOutcome> {
        tokio::fs::create_dir_all(&self.options.pdf_dir).await?;
        tokio::fs::write(&path, &fetched.body).await?;
        info!(path = %path.display(), bytes = fetched.body.len(), source = %source, "PDF saved");

        Ok(DownloadOutcome::Downloaded {
            path,
            url: fetched.url,
            source,
            content_type: fetched.content_type,
            bytes: fetched.body.len(),
        })
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub attempted: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadReport {
    pub fn summary(&self) -> String {
        format!(
            "Downloaded {} of {} attempted papers ({} skipped, {} failed)",
            self.downloaded, self.attempted, self.skipped, self.failed
        )
    }
}

/// Acquire verified papers whose 1-based position (most cited first) lies in
/// `range`. Discovered URLs are written back and every attempt on a paper
/// with a DOI leaves a `paper_fulltext` row.
pub async fn download_batch<E: PdfLinkExtractor>(
    store: &PaperStore,
    downloader: &Downloader<E>,
    range: RangeInclusive<usize>,
) -> Result<DownloadReport> {
    let papers = store.list_verified().await?;
    let mut report = DownloadReport::default();
    info!(total = papers.len(), start = range.start(), end = range.end(), "Starting downloads");

    for (position, paper) in papers.iter().enumerate().map(|(i, p)| (i + 1, p)) {
        if !range.contains(&position) {
            continue;
        }
        let record = &paper.record;

        let outcome = match downloader.acquire(record).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(position, title = %record.title, error = %e, "Download failed");
                report.attempted += 1;
                report.failed += 1;
                if let Some(doi) = &record.doi {
                    store
                        .record_fulltext(&FulltextEntry {
                            doi: doi.clone(),
                            title: record.title.clone(),
                            error_message: Some(e.to_string()),
                            ..Default::default()
                        })
                        .await?;
                }
                continue;
            }
        };

        match outcome {
            DownloadOutcome::AlreadyPresent(_) | DownloadOutcome::NotDownloadable => report.skipped += 1,
            DownloadOutcome::Downloaded {
                path,
                url,
                source,
                content_type,
                bytes,
            } => {
                report.attempted += 1;
                report.downloaded += 1;
                if record.source_url.as_deref() != Some(url.as_str()) {
                    store.update_verified_url(paper.id, &url).await?;
                }
                if let Some(doi) = &record.doi {
                    store
                        .record_fulltext(&FulltextEntry {
                            doi: doi.clone(),
                            title: record.title.clone(),
                            file_path: Some(path.display().to_string()),
                            file_size: i64::try_from(bytes).ok(),
                            content_type: Some(content_type),
                            source: Some(source.to_string()),
                            downloaded: true,
                            error_message: None,
                        })
                        .await?;
                }
            }
            DownloadOutcome::Failed { attempts } => {
                report.attempted += 1;
                report.failed += 1;
                if let Some(doi) = &record.doi {
                    store
                        .record_fulltext(&FulltextEntry {
                            doi: doi.clone(),
                            title: record.title.clone(),
                            error_message: Some(format!("No acceptable PDF after {} attempts", attempts)),
                            ..Default::default()
                        })
                        .await?;
                }
            }
        }
    }

    info!(
        downloaded = report.downloaded,
        failed = report.failed,
        skipped = report.skipped,
        "Downloads complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;
    use tempfile::TempDir;

    fn pdf_body() -> Vec<u8> {
        let mut body = b"%PDF-1.7\n".to_vec();
        body.resize(2048, b'x');
        body
    }

    fn options(dir: &Path, mirrors: Vec<String>) -> DownloadOptions {
        DownloadOptions {
            pdf_dir: dir.join("pdf"),
            mirrors,
            title_fallback: false,
            delay: Duration::ZERO,
            metadata_timeout: Duration::from_secs(5),
            page_timeout: Duration::from_secs(5),
        }
    }

    fn record(title: &str, doi: Option<&str>, url: Option<String>) -> PaperRecord {
        let mut record = PaperRecord::new(title);
        record.doi = doi.map(str::to_string);
        record.source_url = url;
        record
    }

    #[test]
    fn test_acceptance_rule() {
        assert!(!is_acceptable_pdf("application/pdf", b""));
        assert!(!is_acceptable_pdf("application/pdf", &[b'x'; 1000]));
        assert!(is_acceptable_pdf("application/PDF", &[b'x'; 1001]));
        assert!(is_acceptable_pdf("application/octet-stream", &pdf_body()));
        assert!(!is_acceptable_pdf("text/html", &[b'x'; 5000]));
    }

    #[test]
    fn test_extract_patterns_in_order() -> Result<()> {
        let extractor = PatternLinkExtractor::new()?;
        let save = r#"<button onclick="location.href='//cdn.example/x.pdf?download=true'">save</button>"#;
        assert_eq!(extractor.extract(save).as_deref(), Some("//cdn.example/x.pdf?download=true"));

        let iframe = r#"<div><iframe id="pdf" src="/storage/abc.pdf#view=FitH"></iframe></div>"#;
        assert_eq!(extractor.extract(iframe).as_deref(), Some("/storage/abc.pdf#view=FitH"));

        let js = r#"<script>window.location.href = '/go/123';</script>"#;
        assert_eq!(extractor.extract(js).as_deref(), Some("/go/123"));

        assert_eq!(extractor.extract("<p>nothing here</p>"), None);
        Ok(())
    }

    #[test]
    fn test_extract_near_save_fallback() -> Result<()> {
        let extractor = PatternLinkExtractor::new()?;
        let html = r#"<div id="buttons"><a href="/fetch/42">Save</a></div>"#;
        assert_eq!(extractor.extract(html).as_deref(), Some("/fetch/42"));
        Ok(())
    }

    #[test]
    fn test_resolve_link() {
        let base = "https://mirror.example/";
        assert_eq!(resolve_link(base, "//cdn.example/a.pdf").as_deref(), Some("https://cdn.example/a.pdf"));
        assert_eq!(resolve_link(base, "http://other/a.pdf").as_deref(), Some("http://other/a.pdf"));
        assert_eq!(resolve_link(base, "/downloads/a.pdf").as_deref(), Some("https://mirror.example/downloads/a.pdf"));
        assert_eq!(resolve_link(base, "files/a.pdf").as_deref(), Some("https://mirror.example/files/a.pdf"));
    }

    #[test]
    fn test_already_downloaded_ignores_case() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join("Digital WORKPLACE.PDF"), b"x").expect("write");
        assert!(already_downloaded(dir.path(), "digital workplace"));
        assert!(!already_downloaded(dir.path(), "digital"));
        assert!(!already_downloaded(&dir.path().join("missing"), "digital workplace"));
    }

    #[tokio::test]
    async fn test_zero_length_pdf_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/empty.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body("")
            .expect(1)
            .create_async()
            .await;

        let downloader = Downloader::new(options(dir.path(), Vec::new())).expect("downloader");
        let paper = record("Empty", None, Some(format!("{}/empty.pdf", server.url())));
        let outcome = downloader.acquire(&paper).await.expect("acquire");

        mock.assert_async().await;
        assert_eq!(outcome, DownloadOutcome::Failed { attempts: 1 });
        assert!(!dir.path().join("pdf").join("Empty.pdf").exists());
    }

    #[tokio::test]
    async fn test_direct_failure_falls_through_to_mirror() {
        let dir = TempDir::new().expect("temp dir");
        let mut server = mockito::Server::new_async().await;
        let _broken = server.mock("GET", "/direct").with_status(404).create_async().await;
        let _dead_mirror = server
            .mock("GET", "/dead/10.1000/xyz")
            .with_status(200)
            .with_body("<html>no link</html>")
            .create_async()
            .await;
        let _page = server
            .mock("GET", "/live/10.1000/xyz")
            .with_status(200)
            .with_body(r#"<html><iframe src="/files/xyz.pdf"></iframe></html>"#)
            .create_async()
            .await;
        let _pdf = server
            .mock("GET", "/files/xyz.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(pdf_body())
            .create_async()
            .await;

        let mirrors = vec![format!("{}/dead/", server.url()), format!("{}/live", server.url())];
        let downloader = Downloader::new(options(dir.path(), mirrors)).expect("downloader");
        let paper = record("X: Y/Z", Some("10.1000/xyz"), Some(format!("{}/direct", server.url())));

        match downloader.acquire(&paper).await.expect("acquire") {
            DownloadOutcome::Downloaded { path, url, source, bytes, .. } => {
                assert_eq!(path, dir.path().join("pdf").join("X YZ.pdf"));
                assert_eq!(url, format!("{}/files/xyz.pdf", server.url()));
                assert_eq!(source, PdfSource::MirrorDoi(format!("{}/live", server.url())));
                assert_eq!(bytes, 2048);
                assert!(path.is_file());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        // Second run hits the file-name guard
        assert!(matches!(
            downloader.acquire(&paper).await.expect("acquire"),
            DownloadOutcome::AlreadyPresent(_)
        ));
    }

    #[tokio::test]
    async fn test_not_downloadable_without_doi_or_url() {
        let dir = TempDir::new().expect("temp dir");
        let downloader = Downloader::new(options(dir.path(), Vec::new())).expect("downloader");
        let outcome = downloader.acquire(&record("Nothing", None, None)).await.expect("acquire");
        assert_eq!(outcome, DownloadOutcome::NotDownloadable);
    }

    #[tokio::test]
    async fn test_download_batch_writes_back_url() {
        let dir = TempDir::new().expect("temp dir");
        let store = PaperStore::open(&dir.path().join("paper.db")).await.expect("open");
        store.init_schema().await.expect("schema");

        let mut server = mockito::Server::new_async().await;
        let _page = server
            .mock("GET", "/m/10.1/a")
            .with_status(200)
            .with_body(r#"<a href="/pdfs/a.pdf">download</a>"#)
            .create_async()
            .await;
        let _pdf = server
            .mock("GET", "/pdfs/a.pdf")
            .with_status(200)
            .with_header("content-type", "application/pdf")
            .with_body(pdf_body())
            .create_async()
            .await;
        let _missing = server.mock("GET", "/m/10.1/b").with_status(404).create_async().await;

        let mut first = record("Paper A", Some("10.1/a"), None);
        first.citation_count = Some(10);
        let mut second = record("Paper B", Some("10.1/b"), None);
        second.citation_count = Some(5);
        let third = record("Paper C", Some("10.1/c"), None);
        store.save_verified_papers(&[first, second, third]).await.expect("save");

        let downloader =
            Downloader::new(options(dir.path(), vec![format!("{}/m/", server.url())])).expect("downloader");
        let report = download_batch(&store, &downloader, 1..=2).await.expect("batch");

        assert_eq!(
            report,
            DownloadReport {
                attempted: 2,
                downloaded: 1,
                skipped: 0,
                failed: 1
            }
        );
        let listed = store.list_verified().await.expect("list");
        assert_eq!(listed[0].record.source_url, Some(format!("{}/pdfs/a.pdf", server.url())));
        assert_eq!(store.count(Table::Fulltext).await.expect("count"), 2);
    }
}
