//! Reconciliation of Scholar results against Crossref.
//!
//! Every record starts `Unverified` and ends either `Matched` (an exact title
//! match was found, DOI and venue copied over) or `Unmatched`. Unmatched
//! records are kept.

use crate::crossref::{CrossrefClient, TitleMatch, TitleQuery};
use crate::error::Result;
use crate::record::PaperRecord;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Title search used by reconciliation
#[allow(async_fn_in_trait)]
pub trait TitleLookup {
    async fn lookup_title(&self, query: &TitleQuery, max_results: usize) -> Result<TitleMatch>;
}

impl TitleLookup for CrossrefClient {
    async fn lookup_title(&self, query: &TitleQuery, max_results: usize) -> Result<TitleMatch> {
        self.search_with_filters(query, max_results).await
    }
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    /// Records taken from the (filtered) input
    pub max_results: usize,
    pub min_year: Option<i32>,
    /// Pause between lookups
    pub delay: Duration,
}

impl Default for ValidateOptions {
    fn default() -> Self {
        Self {
            max_results: 10,
            min_year: None,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub records: Vec<PaperRecord>,
    /// Crossref records behind each `Matched` record
    pub crossref_matches: Vec<PaperRecord>,
    pub matched: usize,
    pub total: usize,
}

impl ValidationReport {
    pub fn summary(&self) -> String {
        format!("Validated {} of {} papers against Crossref", self.matched, self.total)
    }
}

/// Keep records published in or after `min_year`. Records without a
/// parsable year are dropped.
pub fn filter_by_min_year(records: Vec<PaperRecord>, min_year: i32) -> Vec<PaperRecord> {
    records
        .into_iter()
        .filter(|r| r.year_value().is_some_and(|y| y >= min_year))
        .collect()
}

/// Year-filter, truncate, then look every record up by title
pub async fn reconcile<L: TitleLookup>(
    records: Vec<PaperRecord>,
    lookup: &L,
    options: &ValidateOptions,
) -> ValidationReport {
    let mut records = match options.min_year {
        Some(year) => filter_by_min_year(records, year),
        None => records,
    };
    records.truncate(options.max_results);

    let total = records.len();
    let mut matched = 0;
    let mut crossref_matches = Vec::new();
    info!(total, "Reconciling records");

    for (idx, record) in records.iter_mut().enumerate() {
        if idx > 0 && !options.delay.is_zero() {
            tokio::time::sleep(options.delay).await;
        }

        let query = TitleQuery {
            author: Some(record.authors.clone()).filter(|a| !a.is_empty()),
            year: record.year_value(),
            ..TitleQuery::title(record.title.clone())
        };

        match lookup.lookup_title(&query, 1).await {
            Ok(TitleMatch::Exact(found)) => {
                debug!(title = %record.title, doi = ?found.doi, "Matched");
                record.mark_matched(found.doi.clone(), found.venue.clone(), found.metadata_completeness);
                crossref_matches.push(found);
                matched += 1;
            }
            Ok(TitleMatch::Ranked(_)) => {
                debug!(title = %record.title, "No exact title match");
                record.mark_unmatched();
            }
            Err(e) => {
                warn!(title = %record.title, error = %e, "Title lookup failed");
                record.mark_unmatched();
            }
        }
    }

    info!(matched, total, "Reconciliation complete");
    ValidationReport {
        records,
        crossref_matches,
        matched,
        total,
    }
}
