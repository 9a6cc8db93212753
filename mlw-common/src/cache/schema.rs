//! Cache schema creation and version gating
//!
//! The cache carries a single-row `version` table. A cache whose version row
//! is missing or differs from [`CACHE_VERSION`] is rejected: there are no
//! in-place migrations, an incompatible change bumps the constant.

use crate::{Error, Result};
use sqlx::SqliteConnection;
use std::path::Path;
use tracing::debug;

/// Current cache schema version
///
/// **IMPORTANT:** Increment this on any incompatible table or column change
pub const CACHE_VERSION: i64 = 3;

/// Table creation statements, in foreign key dependency order
const TABLES: &[(&str, &str)] = &[
    (
        "images",
        r#"
        CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            url TEXT NOT NULL
        )
        "#,
    ),
    (
        "elements",
        r#"
        CREATE TABLE IF NOT EXISTS elements (
            id TEXT PRIMARY KEY NOT NULL,
            parent_id TEXT,
            type TEXT NOT NULL,
            image_id TEXT REFERENCES images(id),
            polygon TEXT,
            rotation_angle INTEGER NOT NULL DEFAULT 0,
            mirrored BOOLEAN NOT NULL DEFAULT 0,
            initial BOOLEAN NOT NULL DEFAULT 0,
            worker_version_id TEXT,
            worker_run_id TEXT,
            confidence REAL CHECK (confidence IS NULL OR (confidence >= 0 AND confidence <= 1))
        )
        "#,
    ),
    (
        "transcriptions",
        r#"
        CREATE TABLE IF NOT EXISTS transcriptions (
            id TEXT PRIMARY KEY NOT NULL,
            element_id TEXT NOT NULL REFERENCES elements(id),
            text TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
            orientation TEXT NOT NULL DEFAULT 'horizontal-lr'
                CHECK (orientation IN ('horizontal-lr', 'horizontal-rl', 'vertical-lr', 'vertical-rl')),
            worker_version_id TEXT,
            worker_run_id TEXT
        )
        "#,
    ),
    (
        "classifications",
        r#"
        CREATE TABLE IF NOT EXISTS classifications (
            id TEXT PRIMARY KEY NOT NULL,
            element_id TEXT NOT NULL REFERENCES elements(id),
            class_name TEXT NOT NULL,
            confidence REAL NOT NULL CHECK (confidence >= 0 AND confidence <= 1),
            state TEXT NOT NULL DEFAULT 'pending',
            worker_run_id TEXT
        )
        "#,
    ),
    (
        "entities",
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            id TEXT PRIMARY KEY NOT NULL,
            type TEXT NOT NULL,
            name TEXT NOT NULL,
            validated BOOLEAN NOT NULL DEFAULT 0,
            metas TEXT,
            worker_run_id TEXT
        )
        "#,
    ),
    (
        "transcription_entities",
        r#"
        CREATE TABLE IF NOT EXISTS transcription_entities (
            transcription_id TEXT NOT NULL REFERENCES transcriptions(id),
            entity_id TEXT NOT NULL REFERENCES entities(id),
            "offset" INTEGER NOT NULL CHECK ("offset" >= 0),
            length INTEGER NOT NULL CHECK (length > 0),
            worker_run_id TEXT,
            confidence REAL CHECK (confidence IS NULL OR (confidence >= 0 AND confidence <= 1)),
            PRIMARY KEY (transcription_id, entity_id)
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS elements_parent_id ON elements(parent_id)",
    "CREATE INDEX IF NOT EXISTS elements_initial ON elements(initial)",
    "CREATE INDEX IF NOT EXISTS transcriptions_element_id ON transcriptions(element_id)",
    "CREATE INDEX IF NOT EXISTS classifications_element_id ON classifications(element_id)",
];

/// Create every cache table and index (idempotent)
pub async fn create_tables(conn: &mut SqliteConnection) -> Result<()> {
    for (name, ddl) in TABLES {
        sqlx::query(ddl).execute(&mut *conn).await?;
        debug!(table = name, "Cache table ready");
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(&mut *conn).await?;
    }
    Ok(())
}

/// Create the version table and record [`CACHE_VERSION`]
pub async fn create_version_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS version (version INTEGER PRIMARY KEY NOT NULL)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("INSERT OR IGNORE INTO version (version) VALUES (?)")
        .bind(CACHE_VERSION)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Read the version row
///
/// Returns `None` if the version table doesn't exist or has no rows
pub async fn read_version(conn: &mut SqliteConnection) -> Result<Option<i64>> {
    let table_exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM sqlite_master
            WHERE type='table' AND name='version'
        )
        "#,
    )
    .fetch_one(&mut *conn)
    .await?;

    if !table_exists {
        return Ok(None);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM version LIMIT 1")
        .fetch_optional(&mut *conn)
        .await?;

    Ok(version)
}

/// Fail with `CacheVersionMismatch` unless the cache at `path` is at [`CACHE_VERSION`]
pub async fn check_version(conn: &mut SqliteConnection, path: &Path) -> Result<()> {
    let found = read_version(conn).await?;
    if found != Some(CACHE_VERSION) {
        return Err(Error::CacheVersionMismatch {
            path: path.to_path_buf(),
            found,
            expected: CACHE_VERSION,
        });
    }
    Ok(())
}
