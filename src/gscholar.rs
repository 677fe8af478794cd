//! Google Scholar result scraping.
//!
//! Result pages are fetched either over plain HTTP (with replayed session
//! cookies) or through a short-lived headless browser process, then parsed
//! with `scraper`. Pages are fetched strictly one after another.

use crate::config::{AppConfig, FetchBackend};
use crate::error::{OptionExt, PaperError, Result};
use crate::record::{normalize_doi, PaperRecord};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};
use url::Url;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Citation count patterns, tried in this order against each footer link text
const CITATION_PATTERNS: &[&str] = &[
    r"被引用次数[：:]\s*(\d+)",
    r"被引用\s*(\d+)\s*次",
    r"引用次数[：:]\s*(\d+)",
    r"引用[：:]\s*(\d+)",
    r"被引用[：:]\s*(\d+)",
    r"引用\s*(\d+)",
    r"Cited by (\d+)",
    r"(\d+)\s*次引用",
    r"(\d+)\s*引用",
];

/// Options for Scholar page fetches
#[derive(Debug, Clone)]
pub struct ScholarOptions {
    pub base_url: String,
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    pub backend: FetchBackend,
    pub browser_binary: String,
    pub page_timeout: Duration,
    /// Pause between successive page requests
    pub request_delay: Duration,
    /// Source data type filter ("0,5" excludes patents)
    pub sdt: String,
    /// Pre-built `Cookie` header, may be empty
    pub cookie_header: String,
}

impl Default for ScholarOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SCHOLAR_URL.to_string(),
            proxy: None,
            backend: FetchBackend::Http,
            browser_binary: "chromium".to_string(),
            page_timeout: Duration::from_secs(30),
            request_delay: Duration::from_secs(1),
            sdt: "0,5".to_string(),
            cookie_header: String::new(),
        }
    }
}

impl ScholarOptions {
    pub fn from_config(config: &AppConfig, cookie_header: String) -> Self {
        Self {
            base_url: config.scholar_base_url.trim_end_matches('/').to_string(),
            proxy: config.proxy.clone(),
            backend: config.fetch_backend,
            browser_binary: config.browser_binary.clone(),
            page_timeout: config.page_timeout(),
            request_delay: config.request_delay(),
            cookie_header,
            ..Default::default()
        }
    }
}

/// Outcome of a multi-page search
#[derive(Debug, Default)]
pub struct ScholarSearchReport {
    pub records: Vec<PaperRecord>,
    /// Pages that failed and were skipped
    pub failed_pages: Vec<u32>,
}

impl ScholarSearchReport {
    pub fn summary(&self) -> String {
        if self.failed_pages.is_empty() {
            format!("Found {} papers", self.records.len())
        } else {
            format!(
                "Found {} papers, pages {:?} failed",
                self.records.len(),
                self.failed_pages
            )
        }
    }
}

/// Scholar scraping client
pub struct ScholarClient {
    client: reqwest::Client,
    options: ScholarOptions,
}

impl ScholarClient {
    pub fn new(options: ScholarOptions) -> Result<Self> {
        let client = build_http_client(options.proxy.as_deref(), options.page_timeout)?;
        Ok(Self { client, options })
    }

    /// Search several pages in order, skipping pages that fail.
    ///
    /// With `min_year` set, only records whose year is known and `>= min_year` are kept.
    pub async fn search_pages(
        &self,
        query: &str,
        pages: &[u32],
        min_year: Option<i32>,
    ) -> ScholarSearchReport {
        info!(query, pages = ?pages, "Starting Google Scholar search");
        let mut report = ScholarSearchReport::default();

        for (idx, &page) in pages.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(self.options.request_delay).await;
            }

            match self.search_page(query, page).await {
                Ok(page_records) => {
                    let page_records = match min_year {
                        Some(year) => crate::validator::filter_by_min_year(page_records, year),
                        None => page_records,
                    };
                    info!(page, count = page_records.len(), "Page collected");
                    report.records.extend(page_records);
                }
                Err(e) => {
                    error!(page, error = %e, "Failed to search page");
                    report.failed_pages.push(page);
                }
            }
        }

        info!(total = report.records.len(), "Search complete");
        report
    }

    /// Fetch and parse a single results page (1-indexed).
    ///
    /// # Errors
    ///
    /// Any failure before the result list is located (network, non-2xx status,
    /// CAPTCHA page, browser failure) aborts the page.
    pub async fn search_page(&self, query: &str, page: u32) -> Result<Vec<PaperRecord>> {
        let start = page.saturating_sub(1) * 10;
        let url = build_search_url(&self.options.base_url, query, start, &self.options.sdt)?;
        debug!(page, url = %url, "Fetching page");

        let html = match self.options.backend {
            FetchBackend::Http => self.fetch_http(&url).await?,
            FetchBackend::Headless => {
                let mut session = BrowserSession::launch(&self.options.browser_binary, &url)?;
                session.dump_dom(self.options.page_timeout).await?
            }
        };

        if is_captcha_page(&html) {
            warn!(page, "CAPTCHA detected");
            return Err(PaperError::Captcha);
        }

        let mut records = parse_result_items(&html)?;
        for record in &mut records {
            record.scholar_page = Some(page);
        }
        Ok(records)
    }

    async fn fetch_http(&self, url: &Url) -> Result<String> {
        let mut request = self
            .client
            .get(url.as_str())
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Upgrade-Insecure-Requests", "1");

        if !self.options.cookie_header.is_empty() {
            request = request.header("Cookie", &self.options.cookie_header);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PaperError::RateLimited(60));
        }
        if !status.is_success() {
            return Err(PaperError::Api {
                code: status.as_u16(),
                message: format!("HTTP error: {}", status),
            });
        }

        Ok(response.text().await?)
    }
}

/// A headless browser process scoped to one page load.
///
/// The process is killed when the session is dropped unless it already
/// exited, so no exit path can leak it.
pub struct BrowserSession {
    child: Child,
    finished: bool,
}

impl BrowserSession {
    /// Spawn the browser with `--dump-dom` pointed at `url`
    pub fn launch(binary: &str, url: &Url) -> Result<Self> {
        info!(binary, "Starting headless browser");
        let child = Command::new(binary)
            .args([
                "--headless",
                "--no-sandbox",
                "--disable-gpu",
                "--disable-dev-shm-usage",
                "--disable-extensions",
            ])
            .arg(format!("--user-agent={}", USER_AGENT))
            .arg("--dump-dom")
            .arg(url.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PaperError::Browser(format!("Failed to start {}: {}", binary, e)))?;

        Ok(Self {
            child,
            finished: false,
        })
    }

    /// OS process id, `None` once the process has been reaped
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Read the rendered DOM, waiting at most `timeout` for the process to finish
    pub async fn dump_dom(&mut self, timeout: Duration) -> Result<String> {
        let mut stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| PaperError::Browser("Browser stdout not captured".to_string()))?;

        let child = &mut self.child;
        let read = async {
            let mut html = String::new();
            stdout.read_to_string(&mut html).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((html, status))
        };

        let outcome = tokio::time::timeout(timeout, read).await;
        match outcome {
            Ok(Ok((html, status))) => {
                self.finished = true;
                if status.success() {
                    Ok(html)
                } else {
                    Err(PaperError::Browser(format!("Browser exited with {}", status)))
                }
            }
            Ok(Err(e)) => Err(PaperError::Io(e)),
            Err(_) => Err(PaperError::Browser(format!(
                "Page load timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        if self.finished {
            debug!("Browser process already exited");
            return;
        }
        match self.child.start_kill() {
            Ok(()) => info!("Browser process closed"),
            Err(e) => warn!(error = %e, "Failed to kill browser process"),
        }
    }
}

/// Build HTTP client with optional proxy
fn build_http_client(proxy: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .cookie_store(true);

    if let Some(proxy_url) = proxy {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            PaperError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| PaperError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Build Google Scholar search URL
fn build_search_url(base_url: &str, query: &str, start: u32, sdt: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/scholar", base_url.trim_end_matches('/')))
        .map_err(|e| PaperError::Config(format!("Invalid base URL: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("q", query)
        .append_pair("hl", "en-US")
        .append_pair("start", &start.to_string())
        .append_pair("as_sdt", sdt);

    Ok(url)
}

fn is_captcha_page(html: &str) -> bool {
    html.contains("Solving the above CAPTCHA")
        || html.contains("unusual traffic")
        || html.contains("id=\"gs_captcha_ccl\"")
}

/// Parse a page range: `"5"` or `"1-3"` (inclusive)
pub fn parse_pages(pages: &str) -> Result<Vec<u32>> {
    let invalid = || PaperError::Validation(format!("Invalid page range '{}', use N or N-M", pages));
    let pages = pages.trim();

    let (start, end) = match pages.split_once('-') {
        Some((a, b)) => (
            a.trim().parse::<u32>().map_err(|_| invalid())?,
            b.trim().parse::<u32>().map_err(|_| invalid())?,
        ),
        None => {
            let page = pages.parse::<u32>().map_err(|_| invalid())?;
            (page, page)
        }
    };

    if start == 0 || start > end {
        return Err(invalid());
    }
    Ok((start..=end).collect())
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| PaperError::Parse(e.to_string()))
}

/// Compiled selectors and patterns used per result item
struct ItemParser {
    title: Selector,
    title_link: Selector,
    authors: Selector,
    footer_links: Selector,
    any_link: Selector,
    year: Regex,
    marker: Regex,
    citations: Vec<Regex>,
    cites_param: Regex,
}

impl ItemParser {
    fn new() -> Result<Self> {
        let citations = CITATION_PATTERNS
            .iter()
            .map(|p| Regex::new(p).map_err(|e| PaperError::Parse(e.to_string())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            title: selector("h3.gs_rt")?,
            title_link: selector("h3.gs_rt a")?,
            authors: selector("div.gs_a")?,
            footer_links: selector(".gs_fl a")?,
            any_link: selector("a")?,
            year: Regex::new(r"\b(19|20)\d{2}\b").map_err(|e| PaperError::Parse(e.to_string()))?,
            marker: Regex::new(r"^\s*(\[[^\]]{1,12}\]\s*)+").map_err(|e| PaperError::Parse(e.to_string()))?,
            citations,
            cites_param: Regex::new(r"cites=(\d+)").map_err(|e| PaperError::Parse(e.to_string()))?,
        })
    }

    fn parse(&self, item: ElementRef<'_>) -> Result<PaperRecord> {
        let title_elem = item
            .select(&self.title)
            .next()
            .ok_or_parse("result without title")?;
        let link = item.select(&self.title_link).next();

        let raw_title = match link {
            Some(a) => a.text().collect::<String>(),
            None => title_elem.text().collect::<String>(),
        };
        let title = self.marker.replace(raw_title.trim(), "").trim().to_string();
        if title.is_empty() {
            return Err(PaperError::Parse("empty title".to_string()));
        }

        let authors = item
            .select(&self.authors)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .ok_or_else(|| PaperError::Parse(format!("no author line for '{}'", title)))?;

        let mut record = PaperRecord::new(title);
        record.year = self.year.find(&authors).map(|m| m.as_str().to_string());
        record.authors = authors;
        record.source_url = link
            .and_then(|a| a.value().attr("href"))
            .filter(|h| !h.is_empty())
            .map(str::to_string);
        record.citation_count = Some(self.citation_count(item).unwrap_or(0));
        record.doi = item
            .select(&self.any_link)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| href.split_once("doi.org/").map(|(_, doi)| doi.to_string()))
            .and_then(|doi| normalize_doi(&doi));

        Ok(record)
    }

    /// First pattern hit over the footer links, in link order then pattern
    /// order; otherwise the `cites=N` parameter of a footer link href
    fn citation_count(&self, item: ElementRef<'_>) -> Option<i64> {
        for link in item.select(&self.footer_links) {
            let text = link.text().collect::<String>();
            for pattern in &self.citations {
                if let Some(count) = capture_number(pattern, &text) {
                    return Some(count);
                }
            }
        }

        item.select(&self.footer_links)
            .filter_map(|link| link.value().attr("href"))
            .find_map(|href| capture_number(&self.cites_param, href))
    }
}

fn capture_number(re: &Regex, text: &str) -> Option<i64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Parse a Google Scholar results page.
///
/// Items that cannot be parsed are skipped with a warning.
pub fn parse_result_items(html: &str) -> Result<Vec<PaperRecord>> {
    let document = Html::parse_document(html);
    let item_selector = selector("div.gs_ri")?;
    let parser = ItemParser::new()?;

    let mut records = Vec::new();
    for (idx, item) in document.select(&item_selector).enumerate() {
        match parser.parse(item) {
            Ok(record) => records.push(record),
            Err(e) => warn!(item = idx + 1, error = %e, "Skipping result"),
        }
    }

    if records.is_empty() {
        warn!("No results found on page");
    }
    Ok(records)
}
