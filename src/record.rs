//! Paper record shared by every stage of the pipeline.
//!
//! One explicit optional-field struct is used for Scholar results, Crossref
//! results and reconciled results alike, so the presence of a field is part of
//! the type instead of a runtime check.

use serde::{Deserialize, Serialize};

/// Characters that cannot appear in a file name on common platforms
const INVALID_FILENAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Reconciliation state of a record.
///
/// `Unverified` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    #[default]
    Unverified,
    Matched,
    Unmatched,
}

impl VerificationStatus {
    /// Integer code stored in the `verified_papers.verification_status` column
    pub fn as_code(self) -> i64 {
        match self {
            Self::Unverified => 0,
            Self::Matched => 1,
            Self::Unmatched => 2,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Matched,
            2 => Self::Unmatched,
            _ => Self::Unverified,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Unverified => "unverified",
            Self::Matched => "matched",
            Self::Unmatched => "unmatched",
        }
    }
}

/// Identity key of a record: DOI first, normalized title as fallback
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Doi(String),
    Title(String),
}

/// A paper as seen by Scholar, Crossref, or both.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PaperRecord {
    /// Article title
    pub title: String,
    /// Free-text author line ("Given Family, Given Family")
    pub authors: String,
    /// Four digit publication year
    pub year: Option<String>,
    /// Normalized DOI (see [`normalize_doi`])
    pub doi: Option<String>,
    /// Result-page link or publisher URL
    pub source_url: Option<String>,
    /// Journal / container title
    pub venue: Option<String>,
    /// Citation count, Scholar only
    pub citation_count: Option<i64>,
    /// Number of populated fields in the Crossref item
    pub metadata_completeness: Option<i64>,
    pub verification_status: VerificationStatus,
    /// Scholar results page the record was scraped from
    pub scholar_page: Option<u32>,
    pub publisher: Option<String>,
    pub language: Option<String>,
    pub work_type: Option<String>,
    pub references_count: Option<i64>,
    pub is_referenced_by_count: Option<i64>,
}

impl PaperRecord {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Publication year as a number, if it parses
    pub fn year_value(&self) -> Option<i32> {
        self.year.as_deref().and_then(|y| y.trim().parse().ok())
    }

    /// DOI when present, otherwise the normalized title; `None` for a blank title
    pub fn identity_key(&self) -> Option<RecordKey> {
        if let Some(doi) = self.doi.as_deref().and_then(normalize_doi) {
            return Some(RecordKey::Doi(doi));
        }
        let title = normalize_title(&self.title);
        if title.is_empty() {
            None
        } else {
            Some(RecordKey::Title(title))
        }
    }

    /// Whether the acquisition step has anything to work with
    pub fn can_be_downloaded(&self) -> bool {
        self.doi.is_some() || self.source_url.is_some()
    }

    /// Record a successful cross-validation. Terminal records are left untouched.
    pub fn mark_matched(&mut self, doi: Option<String>, venue: Option<String>, completeness: Option<i64>) {
        if self.verification_status != VerificationStatus::Unverified {
            return;
        }
        self.doi = doi.as_deref().and_then(normalize_doi);
        self.venue = venue.filter(|v| !v.trim().is_empty());
        self.metadata_completeness = completeness;
        self.verification_status = VerificationStatus::Matched;
    }

    pub fn mark_unmatched(&mut self) {
        if self.verification_status == VerificationStatus::Unverified {
            self.verification_status = VerificationStatus::Unmatched;
        }
    }
}

/// Title normalization used for exact matching and for title deduplication:
/// trimmed, inner whitespace collapsed, lowercased.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalize a DOI: strip resolver prefixes, trim, lowercase. Empty input yields `None`.
pub fn normalize_doi(doi: &str) -> Option<String> {
    let mut value = doi.trim();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"] {
        let head = value.get(..prefix.len());
        if head.is_some_and(|h| h.eq_ignore_ascii_case(prefix)) {
            value = value[prefix.len()..].trim();
            break;
        }
    }
    if value.is_empty() {
        None
    } else {
        Some(value.to_lowercase())
    }
}

/// File name stem for a paper title: illegal characters and control characters stripped
pub fn sanitize_filename(title: &str) -> String {
    title
        .chars()
        .filter(|c| !INVALID_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
