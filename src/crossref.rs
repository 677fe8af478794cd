//! Crossref REST API client.
//!
//! Free-text search, title search with exact-match collapsing, and DOI
//! lookup. Calls are sequential and never retried: a non-2xx answer is
//! returned to the caller as an error.

use crate::config::AppConfig;
use crate::error::{OptionExt, PaperError, Result};
use crate::record::{normalize_doi, normalize_title, PaperRecord};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Crossref API base URL
pub const CROSSREF_API_URL: &str = "https://api.crossref.org";

/// Ranked results returned when no exact title match exists
const UNFILTERED_LIMIT: usize = 5;

/// Title search request. Only `title` is sent to the API; the other fields
/// are accepted as hints.
#[derive(Debug, Clone, Default)]
pub struct TitleQuery {
    pub title: String,
    pub author: Option<String>,
    pub journal: Option<String>,
    pub year: Option<i32>,
    pub doi: Option<String>,
}

impl TitleQuery {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// Result of a title search
#[derive(Debug, Clone, PartialEq)]
pub enum TitleMatch {
    /// A result whose title equals the query title, case-insensitively
    Exact(PaperRecord),
    /// No exact match: the top ranked results, unfiltered
    Ranked(Vec<PaperRecord>),
}

impl TitleMatch {
    pub fn exact(&self) -> Option<&PaperRecord> {
        match self {
            Self::Exact(record) => Some(record),
            Self::Ranked(_) => None,
        }
    }

    pub fn into_records(self) -> Vec<PaperRecord> {
        match self {
            Self::Exact(record) => vec![record],
            Self::Ranked(records) => records,
        }
    }
}

/// Outcome of a batch DOI lookup
#[derive(Debug, Default)]
pub struct DoiLookupReport {
    pub records: Vec<PaperRecord>,
    pub not_found: Vec<String>,
    pub failed: Vec<String>,
}

impl DoiLookupReport {
    pub fn summary(&self) -> String {
        format!(
            "Resolved {} DOIs ({} not found, {} failed)",
            self.records.len(),
            self.not_found.len(),
            self.failed.len()
        )
    }
}

/// Crossref API client
pub struct CrossrefClient {
    client: reqwest::Client,
    base_url: String,
    mailto: String,
}

impl CrossrefClient {
    /// Create a client against `base_url` with a per-request `timeout`
    pub fn new(base_url: &str, mailto: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("rustpaperbot/0.1 (mailto:{})", mailto))
            .timeout(timeout)
            .build()
            .map_err(|e| PaperError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            mailto: mailto.to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(&config.crossref_base_url, &config.mailto, config.metadata_timeout())
    }

    /// Free-text search, one page of `rows` results
    pub async fn search(&self, query: &str, rows: usize) -> Result<Vec<PaperRecord>> {
        info!(query, rows, "Crossref search");
        let items = self
            .fetch_items(&[("query", query.to_string()), ("rows", rows.max(1).to_string())])
            .await?;
        Ok(items.iter().filter_map(record_from_item).collect())
    }

    /// Title search.
    ///
    /// Fetches up to `max_results` ranked results and collapses to the first one
    /// whose title equals the query title ignoring case and whitespace runs.
    pub async fn search_with_filters(&self, query: &TitleQuery, max_results: usize) -> Result<TitleMatch> {
        if query.title.trim().is_empty() {
            return Err(PaperError::Validation("Title query is empty".to_string()));
        }
        if query.author.is_some() || query.journal.is_some() || query.year.is_some() || query.doi.is_some() {
            debug!(
                author = ?query.author,
                journal = ?query.journal,
                year = ?query.year,
                doi = ?query.doi,
                "Hints are not sent to Crossref"
            );
        }

        let items = self
            .fetch_items(&[
                ("query.title", query.title.trim().to_string()),
                ("rows", max_results.max(1).to_string()),
            ])
            .await?;
        let records: Vec<PaperRecord> = items.iter().filter_map(record_from_item).collect();

        Ok(collapse_title_match(&query.title, records, max_results))
    }

    /// Look up one DOI. A 404 yields `Ok(None)`.
    pub async fn get_by_doi(&self, doi: &str) -> Result<Option<PaperRecord>> {
        let doi = normalize_doi(doi)
            .ok_or_else(|| PaperError::Validation("DOI is empty".to_string()))?;
        let url = format!("{}/works/{}", self.base_url, urlencoding::encode(&doi));
        debug!(doi = %doi, "Crossref DOI lookup");

        let response = self
            .client
            .get(&url)
            .query(&[("mailto", self.mailto.as_str())])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = check_status(response).await?.json::<Value>().await?;
        let item = body
            .get("message")
            .ok_or_parse("Crossref response without message")?;
        Ok(record_from_item(item))
    }

    /// Resolve DOIs one after another; failures are logged and skipped
    pub async fn lookup_dois(&self, dois: &[String], delay: Duration) -> DoiLookupReport {
        info!(count = dois.len(), "Starting DOI lookup");
        let mut report = DoiLookupReport::default();

        for (idx, doi) in dois.iter().enumerate() {
            if idx > 0 {
                tokio::time::sleep(delay).await;
            }
            match self.get_by_doi(doi).await {
                Ok(Some(record)) => report.records.push(record),
                Ok(None) => {
                    warn!(doi = %doi, "DOI not found");
                    report.not_found.push(doi.clone());
                }
                Err(e) => {
                    warn!(doi = %doi, error = %e, "DOI lookup failed");
                    report.failed.push(doi.clone());
                }
            }
        }

        info!(resolved = report.records.len(), "DOI lookup complete");
        report
    }

    async fn fetch_items(&self, params: &[(&str, String)]) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(format!("{}/works", self.base_url))
            .query(params)
            .query(&[("mailto", self.mailto.as_str())])
            .send()
            .await?;

        let body: Value = check_status(response).await?.json().await?;
        let items = body
            .get("message")
            .and_then(|m| m.get("items"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(count = items.len(), "Crossref items");
        Ok(items)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(PaperError::RateLimited(
            response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        ));
    }
    Err(PaperError::Api {
        code: status.as_u16(),
        message: format!("Crossref API error: {}", status),
    })
}

/// Exact title match wins alone; otherwise the top ranked results
fn collapse_title_match(title: &str, records: Vec<PaperRecord>, max_results: usize) -> TitleMatch {
    let wanted = normalize_title(title);
    let mut records = records;

    if let Some(pos) = records.iter().position(|r| normalize_title(&r.title) == wanted) {
        return TitleMatch::Exact(records.swap_remove(pos));
    }

    records.truncate(UNFILTERED_LIMIT.min(max_results.max(1)));
    TitleMatch::Ranked(records)
}

/// Number of populated top-level fields in a raw Crossref item
pub fn metadata_completeness(item: &Value) -> i64 {
    let Some(fields) = item.as_object() else {
        return 0;
    };
    fields
        .values()
        .filter(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
            _ => true,
        })
        .count() as i64
}

// === Crossref API Response Types ===

#[derive(Debug, Deserialize)]
struct CrossrefItem {
    #[serde(rename = "DOI", default)]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<CrossrefAuthor>,
    #[serde(rename = "container-title", default)]
    container_title: Vec<String>,
    #[serde(rename = "published-print", default)]
    published_print: Option<CrossrefDate>,
    #[serde(rename = "published-online", default)]
    published_online: Option<CrossrefDate>,
    #[serde(default)]
    issued: Option<CrossrefDate>,
    #[serde(rename = "URL", default)]
    url: Option<String>,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(rename = "type", default)]
    work_type: Option<String>,
    #[serde(rename = "reference-count", default)]
    reference_count: Option<i64>,
    #[serde(rename = "is-referenced-by-count", default)]
    is_referenced_by_count: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CrossrefAuthor {
    #[serde(default)]
    given: String,
    #[serde(default)]
    family: String,
}

#[derive(Debug, Deserialize)]
struct CrossrefDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i32>>>,
}

impl CrossrefDate {
    fn year(&self) -> Option<i32> {
        self.date_parts.first().and_then(|p| p.first().copied().flatten())
    }
}

/// Map a raw Crossref item; items without a title yield `None`
fn record_from_item(raw: &Value) -> Option<PaperRecord> {
    let item: CrossrefItem = match serde_json::from_value(raw.clone()) {
        Ok(item) => item,
        Err(e) => {
            warn!(error = %e, "Skipping malformed Crossref item");
            return None;
        }
    };

    let title = item
        .title
        .first()
        .map(|t| strip_html_tags(t).trim().to_string())
        .filter(|t| !t.is_empty())?;

    let authors = item
        .author
        .iter()
        .map(|a| format!("{} {}", a.given, a.family).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ");

    let year = [&item.published_print, &item.published_online, &item.issued]
        .into_iter()
        .flatten()
        .find_map(CrossrefDate::year);

    let mut record = PaperRecord::new(title);
    record.authors = authors;
    record.year = year.map(|y| y.to_string());
    record.doi = item.doi.as_deref().and_then(normalize_doi);
    record.source_url = item.url;
    record.venue = item.container_title.into_iter().find(|c| !c.trim().is_empty());
    record.metadata_completeness = Some(metadata_completeness(raw));
    record.publisher = item.publisher;
    record.language = item.language;
    record.work_type = item.work_type;
    record.references_count = item.reference_count;
    record.is_referenced_by_count = item.is_referenced_by_count;
    Some(record)
}

/// Strip HTML tags (JATS markup in titles)
fn strip_html_tags(text: &str) -> String {
    match Regex::new(r"<[^>]+>") {
        Ok(re) => re.replace_all(text, "").to_string(),
        Err(_) => text.to_string(),
    }
}

/// Split a newline-separated DOI list, dropping blanks and repeats
pub fn parse_doi_list(text: &str) -> Vec<String> {
    let mut dois: Vec<String> = Vec::new();
    for doi in text.lines().filter_map(normalize_doi) {
        if !dois.contains(&doi) {
            dois.push(doi);
        }
    }
    dois
}
