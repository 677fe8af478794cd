//! SQLite persistence.
//!
//! Four tables: `scholar_papers`, `crossref_papers`, `verified_papers` and
//! `paper_fulltext`. Each is keyed by `UNIQUE(doi) ON CONFLICT REPLACE`;
//! DOI-less rows accumulate and are collapsed by title in [`crate::dedup`].
//!
//! Every batch save runs in one transaction. A failing row is logged and
//! skipped; an error outside the row loop drops the transaction, which rolls
//! the whole batch back.

use crate::error::{PaperError, Result};
use crate::record::{normalize_title, PaperRecord, VerificationStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Scholar,
    Crossref,
    Verified,
    Fulltext,
}

impl Table {
    /// Tables holding paper records
    pub const RECORDS: [Table; 3] = [Table::Scholar, Table::Crossref, Table::Verified];

    pub fn name(self) -> &'static str {
        match self {
            Self::Scholar => "scholar_papers",
            Self::Crossref => "crossref_papers",
            Self::Verified => "verified_papers",
            Self::Fulltext => "paper_fulltext",
        }
    }

    /// Uniform record projection used by [`PaperStore::query_papers`]
    fn record_projection(self) -> Option<&'static str> {
        match self {
            Self::Scholar => Some(
                "SELECT id, NULL AS scholar_id, NULL AS crossref_id, title, authors, year, doi, url, journal, \
                 citations, NULL AS metadata_score, 0 AS verification_status, page FROM scholar_papers",
            ),
            Self::Crossref => Some(
                "SELECT id, NULL AS scholar_id, NULL AS crossref_id, title, authors, year, doi, url, journal, \
                 NULL AS citations, metadata_score, 0 AS verification_status, NULL AS page FROM crossref_papers",
            ),
            Self::Verified => Some(
                "SELECT id, scholar_id, crossref_id, title, authors, year, doi, url, journal, \
                 citations, metadata_score, verification_status, NULL AS page FROM verified_papers",
            ),
            Self::Fulltext => None,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS scholar_papers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        title TEXT NOT NULL,
        authors TEXT,
        year TEXT,
        doi TEXT,
        url TEXT,
        journal TEXT,
        citations INTEGER,
        page INTEGER,
        search_query TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(doi) ON CONFLICT REPLACE
    )",
    "CREATE TABLE IF NOT EXISTS crossref_papers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doi TEXT NOT NULL,
        title TEXT NOT NULL,
        authors TEXT,
        year TEXT,
        journal TEXT,
        url TEXT,
        publisher TEXT,
        language TEXT,
        type TEXT,
        references_count INTEGER,
        is_referenced_by_count INTEGER,
        metadata_score INTEGER,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(doi) ON CONFLICT REPLACE
    )",
    "CREATE TABLE IF NOT EXISTS verified_papers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        scholar_id INTEGER,
        crossref_id INTEGER,
        title TEXT NOT NULL,
        authors TEXT,
        year TEXT,
        doi TEXT,
        url TEXT,
        journal TEXT,
        citations INTEGER,
        metadata_score INTEGER,
        verification_status INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(doi) ON CONFLICT REPLACE
    )",
    "CREATE TABLE IF NOT EXISTS paper_fulltext (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        doi TEXT NOT NULL,
        title TEXT,
        file_path TEXT,
        file_size INTEGER,
        content_type TEXT,
        source TEXT,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        UNIQUE(doi) ON CONFLICT REPLACE
    )",
    "CREATE INDEX IF NOT EXISTS idx_scholar_title ON scholar_papers(title)",
    "CREATE INDEX IF NOT EXISTS idx_crossref_title ON crossref_papers(title)",
    "CREATE INDEX IF NOT EXISTS idx_verified_title ON verified_papers(title)",
];

/// Outcome of a batch save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub table: Table,
    pub total: usize,
    pub saved: usize,
    /// Records without a usable key
    pub skipped: usize,
    /// Records whose insert failed
    pub failed: usize,
}

impl SaveReport {
    fn new(table: Table, total: usize) -> Self {
        Self {
            table,
            total,
            saved: 0,
            skipped: 0,
            failed: 0,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Saved {} of {} records to {} ({} skipped, {} failed)",
            self.saved, self.total, self.table, self.skipped, self.failed
        )
    }
}

/// Bookkeeping row for one acquisition attempt
#[derive(Debug, Clone, Default)]
pub struct FulltextEntry {
    pub doi: String,
    pub title: String,
    pub file_path: Option<String>,
    pub file_size: Option<i64>,
    pub content_type: Option<String>,
    pub source: Option<String>,
    pub downloaded: bool,
    pub error_message: Option<String>,
}

/// A stored record with its id; provenance ids are only set on verified rows
#[derive(Debug, Clone)]
pub struct StoredPaper {
    pub id: i64,
    pub scholar_id: Option<i64>,
    pub crossref_id: Option<i64>,
    pub record: PaperRecord,
}

/// Filters for [`PaperStore::query_papers`]; unset fields do not filter
#[derive(Debug, Clone, Default)]
pub struct PaperFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub journal: Option<String>,
    pub year_from: Option<i32>,
    pub year_to: Option<i32>,
    pub min_metadata_score: Option<i64>,
    pub limit: Option<i64>,
}

pub struct PaperStore {
    pool: SqlitePool,
}

impl PaperStore {
    /// Open (creating if needed) the database file and its parent directory
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let newly_created = !db_path.exists();
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", db_path.display()))?
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        if newly_created {
            info!(path = %db_path.display(), "Created database");
        } else {
            debug!(path = %db_path.display(), "Opened database");
        }
        Ok(Self { pool })
    }

    /// Create the four tables and their indices; idempotent
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Database schema ready");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(self) {
        self.pool.close().await;
    }

    pub async fn table_exists(&self, table: Table) -> Result<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
                .bind(table.name())
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    async fn require_table(&self, table: Table) -> Result<()> {
        if self.table_exists(table).await? {
            Ok(())
        } else {
            Err(PaperError::MissingTable(table.name().to_string()))
        }
    }

    pub async fn count(&self, table: Table) -> Result<i64> {
        self.require_table(table).await?;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Upsert Scholar results; records need a DOI or a non-blank title
    pub async fn save_scholar_papers(&self, records: &[PaperRecord], search_query: &str) -> Result<SaveReport> {
        self.require_table(Table::Scholar).await?;
        let mut report = SaveReport::new(Table::Scholar, records.len());
        let mut tx = self.pool.begin().await?;

        for record in records {
            if record.identity_key().is_none() {
                warn!("Skipping Scholar record without DOI or title");
                report.skipped += 1;
                continue;
            }

            let result = sqlx::query(
                "INSERT OR REPLACE INTO scholar_papers
                    (title, authors, year, doi, url, journal, citations, page, search_query)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )
            .bind(tidy_title(&record.title))
            .bind(&record.authors)
            .bind(&record.year)
            .bind(&record.doi)
            .bind(&record.source_url)
            .bind(&record.venue)
            .bind(record.citation_count)
            .bind(record.scholar_page.map(i64::from))
            .bind(search_query)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => report.saved += 1,
                Err(e) => {
                    warn!(title = %record.title, error = %e, "Failed to save Scholar record");
                    report.failed += 1;
                }
            }
        }

        tx.commit().await?;
        info!(saved = report.saved, skipped = report.skipped, "Saved Scholar records");
        Ok(report)
    }

    /// Upsert Crossref results; records without a DOI are skipped
    pub async fn save_crossref_papers(&self, records: &[PaperRecord]) -> Result<SaveReport> {
        self.require_table(Table::Crossref).await?;
        let mut report = SaveReport::new(Table::Crossref, records.len());
        let mut tx = self.pool.begin().await?;

        for record in records {
            let Some(doi) = record.doi.as_deref() else {
                warn!(title = %record.title, "Skipping Crossref record without DOI");
                report.skipped += 1;
                continue;
            };

            let result = sqlx::query(
                "INSERT OR REPLACE INTO crossref_papers
                    (doi, title, authors, year, journal, url, publisher, language, type,
                     references_count, is_referenced_by_count, metadata_score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )
            .bind(doi)
            .bind(tidy_title(&record.title))
            .bind(&record.authors)
            .bind(&record.year)
            .bind(&record.venue)
            .bind(&record.source_url)
            .bind(&record.publisher)
            .bind(&record.language)
            .bind(&record.work_type)
            .bind(record.references_count)
            .bind(record.is_referenced_by_count)
            .bind(record.metadata_completeness)
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => report.saved += 1,
                Err(e) => {
                    warn!(doi, error = %e, "Failed to save Crossref record");
                    report.failed += 1;
                }
            }
        }

        tx.commit().await?;
        info!(saved = report.saved, skipped = report.skipped, "Saved Crossref records");
        Ok(report)
    }

    /// Upsert reconciled records with provenance ids of their source rows
    pub async fn save_verified_papers(&self, records: &[PaperRecord]) -> Result<SaveReport> {
        self.require_table(Table::Verified).await?;
        let mut report = SaveReport::new(Table::Verified, records.len());
        let mut tx = self.pool.begin().await?;
        let scholar_titles = first_id_per_title(&mut *tx, Table::Scholar).await?;

        for record in records {
            if record.identity_key().is_none() {
                warn!("Skipping verified record without DOI or title");
                report.skipped += 1;
                continue;
            }

            let title = tidy_title(&record.title);
            let (scholar_id, crossref_id) = match lookup_provenance(&mut *tx, record, &scholar_titles).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(title = %record.title, error = %e, "Failed to look up provenance");
                    report.failed += 1;
                    continue;
                }
            };

            let result = sqlx::query(
                "INSERT OR REPLACE INTO verified_papers
                    (scholar_id, crossref_id, title, authors, year, doi, url, journal,
                     citations, metadata_score, verification_status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )
            .bind(scholar_id)
            .bind(crossref_id)
            .bind(&title)
            .bind(&record.authors)
            .bind(&record.year)
            .bind(&record.doi)
            .bind(&record.source_url)
            .bind(&record.venue)
            .bind(record.citation_count)
            .bind(record.metadata_completeness)
            .bind(record.verification_status.as_code())
            .execute(&mut *tx)
            .await;

            match result {
                Ok(_) => report.saved += 1,
                Err(e) => {
                    warn!(title = %record.title, error = %e, "Failed to save verified record");
                    report.failed += 1;
                }
            }
        }

        tx.commit().await?;
        info!(saved = report.saved, skipped = report.skipped, "Saved verified records");
        Ok(report)
    }

    /// Record one acquisition attempt, replacing any earlier row for the DOI
    pub async fn record_fulltext(&self, entry: &FulltextEntry) -> Result<()> {
        self.require_table(Table::Fulltext).await?;
        sqlx::query(
            "INSERT OR REPLACE INTO paper_fulltext
                (doi, title, file_path, file_size, content_type, source, status, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&entry.doi)
        .bind(&entry.title)
        .bind(&entry.file_path)
        .bind(entry.file_size)
        .bind(&entry.content_type)
        .bind(&entry.source)
        .bind(if entry.downloaded { "downloaded" } else { "failed" })
        .bind(&entry.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cache a discovered PDF URL on a verified row
    pub async fn update_verified_url(&self, id: i64, url: &str) -> Result<()> {
        let result = sqlx::query("UPDATE verified_papers SET url = ?1 WHERE id = ?2")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            warn!(id, "No verified paper to update");
        }
        Ok(())
    }

    /// Verified papers, most cited first
    pub async fn list_verified(&self) -> Result<Vec<StoredPaper>> {
        self.require_table(Table::Verified).await?;
        let sql = format!(
            "{} ORDER BY citations IS NULL, citations DESC, id",
            Table::Verified.record_projection().unwrap_or_default()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(stored_paper_from_row).collect()
    }

    /// Search a record table
    pub async fn query_papers(&self, table: Table, filter: &PaperFilter) -> Result<Vec<StoredPaper>> {
        let projection = table
            .record_projection()
            .ok_or_else(|| PaperError::Validation(format!("{} does not hold paper records", table)))?;
        self.require_table(table).await?;

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM (");
        builder.push(projection);
        builder.push(") WHERE 1 = 1");

        if let Some(title) = &filter.title {
            builder.push(" AND title LIKE ").push_bind(format!("%{}%", title));
        }
        if let Some(author) = &filter.author {
            builder.push(" AND authors LIKE ").push_bind(format!("%{}%", author));
        }
        if let Some(journal) = &filter.journal {
            builder.push(" AND journal LIKE ").push_bind(format!("%{}%", journal));
        }
        if let Some(year) = filter.year_from {
            builder.push(" AND CAST(year AS INTEGER) >= ").push_bind(year);
        }
        if let Some(year) = filter.year_to {
            builder.push(" AND CAST(year AS INTEGER) <= ").push_bind(year);
        }
        if let Some(score) = filter.min_metadata_score {
            builder.push(" AND metadata_score >= ").push_bind(score);
        }
        builder.push(" ORDER BY citations IS NULL, citations DESC, id");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(stored_paper_from_row).collect()
    }
}

/// Lowest id per normalized title
async fn first_id_per_title(conn: &mut SqliteConnection, table: Table) -> Result<HashMap<String, i64>> {
    let rows: Vec<(i64, String)> = sqlx::query_as(&format!("SELECT id, title FROM {} ORDER BY id", table.name()))
        .fetch_all(&mut *conn)
        .await?;
    let mut first = HashMap::new();
    for (id, title) in rows {
        first.entry(normalize_title(&title)).or_insert(id);
    }
    Ok(first)
}

/// Ids of the Scholar row (same DOI, else same normalized title) and the
/// Crossref row (same DOI) behind a reconciled record
async fn lookup_provenance(
    conn: &mut SqliteConnection,
    record: &PaperRecord,
    scholar_titles: &HashMap<String, i64>,
) -> Result<(Option<i64>, Option<i64>)> {
    let Some(doi) = record.doi.as_deref() else {
        return Ok((scholar_titles.get(&normalize_title(&record.title)).copied(), None));
    };

    let scholar_by_doi: Option<i64> =
        sqlx::query_scalar("SELECT id FROM scholar_papers WHERE doi = ?1 ORDER BY id LIMIT 1")
            .bind(doi)
            .fetch_optional(&mut *conn)
            .await?;
    let scholar_id = scholar_by_doi.or_else(|| scholar_titles.get(&normalize_title(&record.title)).copied());

    let crossref_id: Option<i64> = sqlx::query_scalar("SELECT id FROM crossref_papers WHERE doi = ?1 LIMIT 1")
        .bind(doi)
        .fetch_optional(&mut *conn)
        .await?;

    Ok((scholar_id, crossref_id))
}

/// Titles are stored with whitespace runs collapsed
fn tidy_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn stored_paper_from_row(row: &SqliteRow) -> Result<StoredPaper> {
    let page: Option<i64> = row.try_get("page")?;
    let record = PaperRecord {
        title: row.try_get("title")?,
        authors: row.try_get::<Option<String>, _>("authors")?.unwrap_or_default(),
        year: row.try_get("year")?,
        doi: row.try_get("doi")?,
        source_url: row.try_get("url")?,
        venue: row.try_get("journal")?,
        citation_count: row.try_get("citations")?,
        metadata_completeness: row.try_get("metadata_score")?,
        verification_status: VerificationStatus::from_code(row.try_get("verification_status")?),
        scholar_page: page.and_then(|p| u32::try_from(p).ok()),
        ..Default::default()
    };
    Ok(StoredPaper {
        id: row.try_get("id")?,
        scholar_id: row.try_get("scholar_id")?,
        crossref_id: row.try_get("crossref_id")?,
        record,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, PaperStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = PaperStore::open(&dir.path().join("db").join("paper.db"))
            .await
            .expect("open store");
        store.init_schema().await.expect("schema");
        (dir, store)
    }

    fn paper(title: &str, doi: Option<&str>) -> PaperRecord {
        let mut record = PaperRecord::new(title);
        record.doi = doi.map(str::to_string);
        record.year = Some("2021".to_string());
        record
    }

    #[tokio::test]
    async fn test_schema_creates_four_tables() {
        let (_dir, store) = temp_store().await;
        for table in [Table::Scholar, Table::Crossref, Table::Verified, Table::Fulltext] {
            assert!(store.table_exists(table).await.expect("exists"), "{} missing", table);
        }
    }

    #[tokio::test]
    async fn test_missing_table_is_precondition_error() {
        let dir = TempDir::new().expect("temp dir");
        let store = PaperStore::open(&dir.path().join("bare.db")).await.expect("open");
        let err = store
            .save_scholar_papers(&[paper("T", None)], "q")
            .await
            .expect_err("no schema");
        assert!(matches!(err, PaperError::MissingTable(name) if name == "scholar_papers"));
    }

    #[tokio::test]
    async fn test_same_doi_replaces_row() {
        let (_dir, store) = temp_store().await;
        let mut first = paper("First Title", Some("10.1/x"));
        first.citation_count = Some(1);
        let mut second = paper("Second Title", Some("10.1/x"));
        second.citation_count = Some(2);

        store.save_scholar_papers(&[first], "q").await.expect("save");
        store.save_scholar_papers(&[second], "q").await.expect("save");

        assert_eq!(store.count(Table::Scholar).await.expect("count"), 1);
        let rows = store
            .query_papers(Table::Scholar, &PaperFilter::default())
            .await
            .expect("query");
        assert_eq!(rows[0].record.title, "Second Title");
        assert_eq!(rows[0].record.citation_count, Some(2));
    }

    #[tokio::test]
    async fn test_key_policy_per_table() {
        let (_dir, store) = temp_store().await;
        let records = vec![paper("Titled", None), paper("   ", None), paper("With DOI", Some("10.1/a"))];

        let scholar = store.save_scholar_papers(&records, "q").await.expect("save");
        assert_eq!((scholar.saved, scholar.skipped, scholar.failed), (2, 1, 0));

        let crossref = store.save_crossref_papers(&records).await.expect("save");
        assert_eq!((crossref.saved, crossref.skipped), (1, 2));
        assert_eq!(crossref.summary(), "Saved 1 of 3 records to crossref_papers (2 skipped, 0 failed)");
    }

    #[tokio::test]
    async fn test_verified_rows_carry_provenance() {
        let (_dir, store) = temp_store().await;
        let scholar = paper("Digital  Workplace", None);
        let mut crossref = paper("Digital Workplace", Some("10.1/dw"));
        crossref.metadata_completeness = Some(9);
        store.save_scholar_papers(&[scholar.clone()], "q").await.expect("save");
        store.save_crossref_papers(&[crossref]).await.expect("save");

        let mut matched = scholar.clone();
        matched.mark_matched(Some("10.1/dw".to_string()), Some("J".to_string()), Some(9));
        let mut unmatched = paper("Orphan", None);
        unmatched.mark_unmatched();
        let report = store.save_verified_papers(&[matched, unmatched]).await.expect("save");
        assert_eq!(report.saved, 2);

        let ids: Vec<(Option<i64>, Option<i64>, i64)> = sqlx::query_as(
            "SELECT scholar_id, crossref_id, verification_status FROM verified_papers ORDER BY id",
        )
        .fetch_all(store.pool())
        .await
        .expect("rows");
        assert_eq!(ids[0], (Some(1), Some(1), 1));
        assert_eq!(ids[1], (None, None, 2));
    }

    #[tokio::test]
    async fn test_provenance_matches_non_ascii_title_case() {
        let (_dir, store) = temp_store().await;
        store
            .save_scholar_papers(&[paper("Other", None), paper("ÉTUDE DU TRAVAIL À DISTANCE", None)], "q")
            .await
            .expect("save");

        let mut matched = paper("étude du travail à distance", None);
        matched.mark_matched(Some("10.1/etude".to_string()), None, None);
        store.save_verified_papers(&[matched]).await.expect("save");

        let listed = store.list_verified().await.expect("list");
        assert_eq!(listed[0].scholar_id, Some(2));
        assert_eq!(listed[0].crossref_id, None);
    }

    #[tokio::test]
    async fn test_list_verified_and_url_update() {
        let (_dir, store) = temp_store().await;
        let mut low = paper("Low", Some("10.1/low"));
        low.citation_count = Some(1);
        let mut high = paper("High", Some("10.1/high"));
        high.citation_count = Some(50);
        store
            .save_verified_papers(&[low, paper("Unknown", None), high])
            .await
            .expect("save");

        let listed = store.list_verified().await.expect("list");
        let titles: Vec<_> = listed.iter().map(|p| p.record.title.as_str()).collect();
        assert_eq!(titles, vec!["High", "Low", "Unknown"]);

        store
            .update_verified_url(listed[0].id, "https://mirror.example/high.pdf")
            .await
            .expect("update");
        let listed = store.list_verified().await.expect("list");
        assert_eq!(listed[0].record.source_url.as_deref(), Some("https://mirror.example/high.pdf"));
    }

    #[tokio::test]
    async fn test_query_papers_filters() {
        let (_dir, store) = temp_store().await;
        let mut a = paper("Remote Work", Some("10.1/a"));
        a.metadata_completeness = Some(20);
        a.authors = "Ada Lovelace".to_string();
        let mut b = paper("Office Design", Some("10.1/b"));
        b.year = Some("2010".to_string());
        b.metadata_completeness = Some(5);
        store.save_crossref_papers(&[a, b]).await.expect("save");

        let filter = PaperFilter {
            year_from: Some(2015),
            min_metadata_score: Some(10),
            author: Some("lovelace".to_string()),
            ..Default::default()
        };
        let found = store.query_papers(Table::Crossref, &filter).await.expect("query");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].record.title, "Remote Work");

        assert!(store.query_papers(Table::Fulltext, &PaperFilter::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_record_fulltext_replaces_by_doi() {
        let (_dir, store) = temp_store().await;
        let mut entry = FulltextEntry {
            doi: "10.1/x".to_string(),
            title: "X".to_string(),
            error_message: Some("no mirror".to_string()),
            ..Default::default()
        };
        store.record_fulltext(&entry).await.expect("record");
        entry.downloaded = true;
        entry.error_message = None;
        store.record_fulltext(&entry).await.expect("record");

        assert_eq!(store.count(Table::Fulltext).await.expect("count"), 1);
        let status: String = sqlx::query_scalar("SELECT status FROM paper_fulltext")
            .fetch_one(store.pool())
            .await
            .expect("status");
        assert_eq!(status, "downloaded");
    }
}
