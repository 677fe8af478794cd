//! Database backup and deduplication.
//!
//! Deduplication always copies the database file first and refuses to
//! delete anything if that copy fails.

use crate::error::{PaperError, Result};
use crate::record::normalize_title;
use crate::store::{PaperStore, Table};
use chrono::Local;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Row counts of one table around a deduplication run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDedup {
    pub table: Table,
    pub before: i64,
    pub after: i64,
}

impl TableDedup {
    pub fn removed(&self) -> i64 {
        self.before - self.after
    }
}

#[derive(Debug, Clone)]
pub struct DedupReport {
    pub backup_path: PathBuf,
    pub tables: Vec<TableDedup>,
}

impl DedupReport {
    pub fn removed(&self) -> i64 {
        self.tables.iter().map(TableDedup::removed).sum()
    }

    pub fn summary(&self) -> String {
        let per_table = self
            .tables
            .iter()
            .map(|t| format!("{}: {} -> {}", t.table, t.before, t.after))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "Removed {} duplicate rows ({}); backup at {}",
            self.removed(),
            per_table,
            self.backup_path.display()
        )
    }
}

/// Copy the database file to `backup_dir/paper_db_backup_<timestamp>.db`
pub fn backup_database(db_path: &Path, backup_dir: &Path) -> Result<PathBuf> {
    if !db_path.is_file() {
        return Err(PaperError::Backup(format!("Database {} does not exist", db_path.display())));
    }

    std::fs::create_dir_all(backup_dir).map_err(|e| {
        PaperError::Backup(format!("Cannot create backup directory {}: {}", backup_dir.display(), e))
    })?;

    let name = format!("paper_db_backup_{}.db", Local::now().format("%Y%m%d_%H%M%S_%3f"));
    let target = backup_dir.join(name);
    std::fs::copy(db_path, &target)
        .map_err(|e| PaperError::Backup(format!("Cannot copy database to {}: {}", target.display(), e)))?;

    info!(backup = %target.display(), "Database backed up");
    Ok(target)
}

/// Replace the database file with a backup. The store must be closed.
pub fn restore_database(backup: &Path, db_path: &Path) -> Result<()> {
    if !backup.is_file() {
        return Err(PaperError::Backup(format!("Backup {} does not exist", backup.display())));
    }
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(backup, db_path)?;
    info!(backup = %backup.display(), database = %db_path.display(), "Database restored");
    Ok(())
}

/// Back up, then delete duplicate rows from every record table.
///
/// Per table, rows sharing a DOI keep the lowest id; among DOI-less rows,
/// rows sharing a [`normalize_title`] key keep the lowest id.
pub async fn deduplicate(store: &PaperStore, db_path: &Path, backup_dir: &Path) -> Result<DedupReport> {
    let backup_path = backup_database(db_path, backup_dir).inspect_err(|e| {
        error!(error = %e, "Backup failed, deduplication aborted");
    })?;

    let mut tables = Vec::new();
    let mut tx = store.pool().begin().await?;

    for table in Table::RECORDS {
        let name = table.name();
        let before: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", name))
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query(&format!(
            "DELETE FROM {name} WHERE doi IS NOT NULL AND id NOT IN (
                SELECT MIN(id) FROM {name} WHERE doi IS NOT NULL GROUP BY doi
            )"
        ))
        .execute(&mut *tx)
        .await?;

        let doi_less: Vec<(i64, String)> =
            sqlx::query_as(&format!("SELECT id, title FROM {name} WHERE doi IS NULL ORDER BY id"))
                .fetch_all(&mut *tx)
                .await?;
        for id in title_duplicates(&doi_less) {
            sqlx::query(&format!("DELETE FROM {name} WHERE id = ?1"))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let after: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", name))
            .fetch_one(&mut *tx)
            .await?;

        info!(table = name, before, after, "Deduplicated table");
        tables.push(TableDedup { table, before, after });
    }

    tx.commit().await?;
    Ok(DedupReport { backup_path, tables })
}

/// Ids of every row but the lowest-id one in each normalized-title group
fn title_duplicates(rows: &[(i64, String)]) -> Vec<i64> {
    let mut kept: HashMap<String, i64> = HashMap::new();
    let mut duplicates = Vec::new();
    for (id, title) in rows {
        match kept.entry(normalize_title(title)) {
            Entry::Vacant(slot) => {
                slot.insert(*id);
            }
            Entry::Occupied(mut slot) if *slot.get() > *id => {
                duplicates.push(slot.insert(*id));
            }
            Entry::Occupied(_) => duplicates.push(*id),
        }
    }
    duplicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PaperRecord;
    use tempfile::TempDir;

    async fn store_with_duplicates(dir: &TempDir) -> (PathBuf, PaperStore) {
        let db_path = dir.path().join("paper.db");
        let store = PaperStore::open(&db_path).await.expect("open");
        store.init_schema().await.expect("schema");

        let records = vec![
            PaperRecord::new("Digital Workplace"),
            PaperRecord::new("digital workplace "),
            PaperRecord::new("Remote Work"),
        ];
        store.save_scholar_papers(&records, "q").await.expect("save");
        (db_path, store)
    }

    #[tokio::test]
    async fn test_collapses_doi_less_titles() {
        let dir = TempDir::new().expect("temp dir");
        let (db_path, store) = store_with_duplicates(&dir).await;

        let report = deduplicate(&store, &db_path, &dir.path().join("backup"))
            .await
            .expect("dedup");

        assert!(report.backup_path.is_file());
        let scholar = report
            .tables
            .iter()
            .find(|t| t.table == Table::Scholar)
            .expect("scholar stats");
        assert_eq!((scholar.before, scholar.after), (3, 2));
        assert_eq!(report.removed(), 1);

        let titles: Vec<String> = sqlx::query_scalar("SELECT title FROM scholar_papers ORDER BY id")
            .fetch_all(store.pool())
            .await
            .expect("titles");
        assert_eq!(titles, vec!["Digital Workplace".to_string(), "Remote Work".to_string()]);
    }

    #[tokio::test]
    async fn test_collapses_non_ascii_titles() {
        let dir = TempDir::new().expect("temp dir");
        let db_path = dir.path().join("paper.db");
        let store = PaperStore::open(&db_path).await.expect("open");
        store.init_schema().await.expect("schema");
        let records = vec![PaperRecord::new("ÉTUDE DU TRAVAIL"), PaperRecord::new("étude du  travail")];
        store.save_scholar_papers(&records, "q").await.expect("save");
        store.save_verified_papers(&records).await.expect("save");

        let report = deduplicate(&store, &db_path, &dir.path().join("backup"))
            .await
            .expect("dedup");

        assert_eq!(report.removed(), 2);
        assert_eq!(store.count(Table::Scholar).await.expect("count"), 1);
        assert_eq!(store.count(Table::Verified).await.expect("count"), 1);
        let title: String = sqlx::query_scalar("SELECT title FROM scholar_papers")
            .fetch_one(store.pool())
            .await
            .expect("title");
        assert_eq!(title, "ÉTUDE DU TRAVAIL");
    }

    #[test]
    fn test_title_duplicates_keep_lowest_id() {
        let rows = vec![
            (4, "Ωmega Study".to_string()),
            (2, "ωMEGA  study".to_string()),
            (3, "Other".to_string()),
        ];
        assert_eq!(title_duplicates(&rows), vec![4]);
    }

    #[tokio::test]
    async fn test_refuses_without_backup() {
        let dir = TempDir::new().expect("temp dir");
        let (db_path, store) = store_with_duplicates(&dir).await;

        // A regular file where the backup directory should be
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").expect("write");

        let err = deduplicate(&store, &db_path, &blocked).await.expect_err("backup must fail");
        assert!(matches!(err, PaperError::Backup(_)));
        assert_eq!(store.count(Table::Scholar).await.expect("count"), 3);
    }

    #[test]
    fn test_backup_missing_database() {
        let dir = TempDir::new().expect("temp dir");
        let err = backup_database(&dir.path().join("nope.db"), dir.path()).expect_err("missing db");
        assert!(matches!(err, PaperError::Backup(_)));
    }

    #[tokio::test]
    async fn test_restore_roundtrip() {
        let dir = TempDir::new().expect("temp dir");
        let (db_path, store) = store_with_duplicates(&dir).await;
        let backup = backup_database(&db_path, &dir.path().join("backup")).expect("backup");
        let name = backup.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        assert!(name.starts_with("paper_db_backup_") && name.ends_with(".db"));

        store.save_scholar_papers(&[PaperRecord::new("Added Later")], "q").await.expect("save");
        store.close().await;

        restore_database(&backup, &db_path).expect("restore");
        let store = PaperStore::open(&db_path).await.expect("reopen");
        assert_eq!(store.count(Table::Scholar).await.expect("count"), 3);
    }
}
