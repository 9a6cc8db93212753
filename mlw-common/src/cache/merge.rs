//! Seeding a task cache from its parents' caches
//!
//! Parents are merged in the order given. Each parent is attached to a single
//! connection and copied table by table inside one transaction, using
//! `INSERT OR REPLACE`: a row whose primary key already exists is replaced by
//! the incoming one, so later parents win. Merging the same parents again
//! yields the same rows.

use super::{open_read_only, CacheStore, CacheTable};
use crate::{Error, Result};
use sqlx::{Connection, SqliteConnection};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

const SOURCE_ALIAS: &str = "parent_cache";

/// Tables copied from parent caches, kept in dependency order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeTables(Vec<CacheTable>);

impl MergeTables {
    /// Images, elements, transcriptions and classifications
    pub fn core() -> Self {
        Self(vec![
            CacheTable::Images,
            CacheTable::Elements,
            CacheTable::Transcriptions,
            CacheTable::Classifications,
        ])
    }

    /// Every cache table, entities and their transcription links included
    pub fn all() -> Self {
        Self(CacheTable::ALL.to_vec())
    }

    /// Arbitrary selection; order is normalized to dependency order
    pub fn only(tables: &[CacheTable]) -> Self {
        Self(
            CacheTable::ALL
                .into_iter()
                .filter(|t| tables.contains(t))
                .collect(),
        )
    }

    pub fn tables(&self) -> &[CacheTable] {
        &self.0
    }
}

impl Default for MergeTables {
    fn default() -> Self {
        Self::core()
    }
}

/// Result of merging one parent cache
#[derive(Debug)]
pub struct MergeOutcome {
    pub path: PathBuf,
    pub result: Result<()>,
}

impl MergeOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// `file:` URI opening `path` read-only
///
/// The parent, `-wal` file included, must stay untouched.
fn read_only_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for c in path.to_string_lossy().chars() {
        match c {
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            '%' => uri.push_str("%25"),
            _ => uri.push(c),
        }
    }
    uri.push_str("?mode=ro");
    uri
}

fn merge_statement(table: CacheTable) -> String {
    let columns = table
        .columns()
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT OR REPLACE INTO main.{name} ({columns}) SELECT {columns} FROM {SOURCE_ALIAS}.{name}",
        name = table.name()
    )
}

impl CacheStore {
    /// Merge every parent cache into this one, in order
    ///
    /// All parent versions are checked before any row is copied; a mismatch
    /// aborts the whole merge with `CacheVersionMismatch`. After that, a
    /// failure on one parent only rolls back that parent: it is logged and
    /// reported in its [`MergeOutcome`], and the remaining parents are merged.
    pub async fn merge_from_parents(
        &self,
        parents: &[PathBuf],
        tables: &MergeTables,
    ) -> Result<Vec<MergeOutcome>> {
        if parents.is_empty() {
            info!("No parent caches to merge");
            return Ok(Vec::new());
        }

        for path in parents {
            let conn = open_read_only(path).await?;
            conn.close().await?;
        }

        let mut outcomes = Vec::with_capacity(parents.len());
        for path in parents {
            let result = self.merge_parent(path, tables).await;
            match &result {
                Ok(()) => info!("Merged parent cache {}", path.display()),
                Err(e) => error!("Failed to merge parent cache {}: {}", path.display(), e),
            }
            outcomes.push(MergeOutcome {
                path: path.clone(),
                result,
            });
        }

        Ok(outcomes)
    }

    async fn merge_parent(&self, path: &Path, tables: &MergeTables) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(&format!("ATTACH DATABASE ? AS {SOURCE_ALIAS}"))
            .bind(read_only_uri(path))
            .execute(&mut *conn)
            .await?;

        let copied = copy_tables(&mut conn, tables).await;

        if let Err(e) = sqlx::query(&format!("DETACH DATABASE {SOURCE_ALIAS}"))
            .execute(&mut *conn)
            .await
        {
            warn!("Could not detach parent cache {}: {}", path.display(), e);
            // A connection still holding the alias would fail the next ATTACH
            conn.detach().close().await?;
        }

        copied
    }
}

async fn copy_tables(conn: &mut SqliteConnection, tables: &MergeTables) -> Result<()> {
    let mut tx = conn.begin().await?;
    for table in tables.tables() {
        let source_has_table: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {SOURCE_ALIAS}.sqlite_master WHERE type='table' AND name=?)"
        ))
        .bind(table.name())
        .fetch_one(&mut *tx)
        .await?;

        if !source_has_table {
            warn!(table = table.name(), "Parent cache lacks table, skipping");
            continue;
        }

        let copied = sqlx::query(&merge_statement(*table))
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::from_insert(table.name(), e))?;
        tracing::debug!(table = table.name(), rows = copied.rows_affected(), "Copied parent rows");
    }
    tx.commit().await?;
    Ok(())
}
