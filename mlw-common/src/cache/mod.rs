//! Process-local SQLite cache mirroring the remote annotation graph
//!
//! The cache file is owned by a single worker process. It is opened with
//! foreign keys and check constraints enforced and WAL journaling so that a
//! lazy read cursor never blocks a publisher's insert. On close the journal is
//! switched back to rollback mode, leaving a self-contained file that child
//! tasks can merge.

pub mod insert;
pub mod merge;
pub mod models;
pub mod query;
pub mod schema;

pub use insert::CacheRecord;
pub use merge::{MergeOutcome, MergeTables};
pub use models::*;
pub use query::{ElementQuery, TranscriptionQuery, WorkerRunFilter, WorkerVersionFilter};
pub use schema::CACHE_VERSION;

use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{ConnectOptions, Connection, SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Connections kept by the writer pool: one cursor plus one publisher
/// in flight, with headroom for nested reads
const MAX_CONNECTIONS: u32 = 4;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tables held by the cache, in foreign key dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheTable {
    Images,
    Elements,
    Transcriptions,
    Classifications,
    Entities,
    TranscriptionEntities,
}

impl CacheTable {
    pub const ALL: [CacheTable; 6] = [
        CacheTable::Images,
        CacheTable::Elements,
        CacheTable::Transcriptions,
        CacheTable::Classifications,
        CacheTable::Entities,
        CacheTable::TranscriptionEntities,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CacheTable::Images => CachedImage::TABLE,
            CacheTable::Elements => CachedElement::TABLE,
            CacheTable::Transcriptions => CachedTranscription::TABLE,
            CacheTable::Classifications => CachedClassification::TABLE,
            CacheTable::Entities => CachedEntity::TABLE,
            CacheTable::TranscriptionEntities => CachedTranscriptionEntity::TABLE,
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            CacheTable::Images => CachedImage::COLUMNS,
            CacheTable::Elements => CachedElement::COLUMNS,
            CacheTable::Transcriptions => CachedTranscription::COLUMNS,
            CacheTable::Classifications => CachedClassification::COLUMNS,
            CacheTable::Entities => CachedEntity::COLUMNS,
            CacheTable::TranscriptionEntities => CachedTranscriptionEntity::COLUMNS,
        }
    }
}

/// Whether [`CacheStore::open`] may create a missing cache file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the file, tables and version row if the path doesn't exist
    CreateIfMissing,
    /// The file must already exist
    ExistingOnly,
}

/// Handle on the worker's cache file
#[derive(Debug, Clone)]
pub struct CacheStore {
    pub(crate) pool: SqlitePool,
    path: PathBuf,
}

impl CacheStore {
    /// Open (or create) the cache at `path`
    ///
    /// A new file gets every table plus the version row. An existing file must
    /// carry the current version row, otherwise `CacheVersionMismatch`.
    pub async fn open(path: &Path, mode: OpenMode) -> Result<Self> {
        let newly_created = !path.exists();

        if newly_created && mode == OpenMode::ExistingOnly {
            return Err(Error::Config(format!(
                "Cache file {} does not exist",
                path.display()
            )));
        }

        if newly_created {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(newly_created)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .pragma("ignore_check_constraints", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        {
            let mut conn = pool.acquire().await?;
            if newly_created {
                schema::create_tables(&mut conn).await?;
                schema::create_version_table(&mut conn).await?;
                info!("Initialized new cache: {}", path.display());
            } else {
                if let Err(e) = schema::check_version(&mut conn, path).await {
                    drop(conn);
                    pool.close().await;
                    return Err(e);
                }
                schema::create_tables(&mut conn).await?;
                info!("Opened existing cache: {}", path.display());
            }
        }

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Location of the cache file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Version row of this cache
    pub async fn version(&self) -> Result<Option<i64>> {
        let mut conn = self.pool.acquire().await?;
        schema::read_version(&mut conn).await
    }

    /// Number of rows held by `table`
    pub async fn count(&self, table: CacheTable) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(sqlx::query_scalar(&sql).fetch_one(&self.pool).await?)
    }

    /// Flush the write-ahead log and release the file
    pub async fn close(self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        self.pool.close().await;

        // Leave a rollback-journal file behind so readers need no -wal/-shm
        let conn = SqliteConnectOptions::new()
            .filename(&self.path)
            .journal_mode(SqliteJournalMode::Delete)
            .connect()
            .await?;
        conn.close().await?;

        debug!("Closed cache: {}", self.path.display());
        Ok(())
    }
}

/// Open a parent cache read-only and check its version
pub(crate) async fn open_read_only(path: &Path) -> Result<SqliteConnection> {
    if !path.is_file() {
        return Err(Error::Config(format!(
            "Parent cache {} does not exist",
            path.display()
        )));
    }

    let mut conn = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true)
        .connect()
        .await?;

    schema::check_version(&mut conn, path).await?;
    Ok(conn)
}

/// Read the version row of any cache file without keeping it open
pub async fn check_version(path: &Path) -> Result<()> {
    let conn = open_read_only(path).await?;
    conn.close().await?;
    Ok(())
}
