//! Row insertion
//!
//! Every cached model implements [`CacheRecord`], which names its table and
//! binds its columns in declaration order. Inserts never replace: an existing
//! primary key surfaces as [`Error::CacheConstraint`].

use super::models::{
    CachedClassification, CachedElement, CachedEntity, CachedImage, CachedTranscription,
    CachedTranscriptionEntity,
};
use crate::{Error, Result};
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::Sqlite;
use uuid::Uuid;

pub type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// A model stored in one cache table
pub trait CacheRecord: Send + Sync {
    /// Table name
    const TABLE: &'static str;
    /// Column names, in bind order
    const COLUMNS: &'static [&'static str];

    /// Bind every column value, in [`Self::COLUMNS`] order
    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>>;

    /// `INSERT INTO <table> (<columns>) VALUES (?, ...)`
    fn insert_sql() -> String {
        let columns = Self::COLUMNS
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; Self::COLUMNS.len()].join(", ");
        format!("INSERT INTO {} ({columns}) VALUES ({placeholders})", Self::TABLE)
    }
}

fn opt_id(id: Option<Uuid>) -> Option<String> {
    id.map(|id| id.to_string())
}

impl CacheRecord for CachedImage {
    const TABLE: &'static str = "images";
    const COLUMNS: &'static [&'static str] = &["id", "width", "height", "url"];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>> {
        Ok(query
            .bind(self.id.to_string())
            .bind(self.width)
            .bind(self.height)
            .bind(&self.url))
    }
}

impl CacheRecord for CachedElement {
    const TABLE: &'static str = "elements";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "parent_id",
        "type",
        "image_id",
        "polygon",
        "rotation_angle",
        "mirrored",
        "initial",
        "worker_version_id",
        "worker_run_id",
        "confidence",
    ];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>> {
        let polygon = self.polygon.as_ref().map(serde_json::to_string).transpose()?;
        Ok(query
            .bind(self.id.to_string())
            .bind(opt_id(self.parent_id))
            .bind(&self.element_type)
            .bind(opt_id(self.image_id))
            .bind(polygon)
            .bind(self.rotation_angle)
            .bind(self.mirrored)
            .bind(self.initial)
            .bind(opt_id(self.worker_version_id))
            .bind(opt_id(self.worker_run_id))
            .bind(self.confidence))
    }
}

impl CacheRecord for CachedTranscription {
    const TABLE: &'static str = "transcriptions";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "element_id",
        "text",
        "confidence",
        "orientation",
        "worker_version_id",
        "worker_run_id",
    ];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>> {
        Ok(query
            .bind(self.id.to_string())
            .bind(self.element_id.to_string())
            .bind(&self.text)
            .bind(self.confidence)
            .bind(self.orientation.as_str())
            .bind(opt_id(self.worker_version_id))
            .bind(opt_id(self.worker_run_id)))
    }
}

impl CacheRecord for CachedClassification {
    const TABLE: &'static str = "classifications";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "element_id",
        "class_name",
        "confidence",
        "state",
        "worker_run_id",
    ];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>> {
        Ok(query
            .bind(self.id.to_string())
            .bind(self.element_id.to_string())
            .bind(&self.class_name)
            .bind(self.confidence)
            .bind(&self.state)
            .bind(opt_id(self.worker_run_id)))
    }
}

impl CacheRecord for CachedEntity {
    const TABLE: &'static str = "entities";
    const COLUMNS: &'static [&'static str] =
        &["id", "type", "name", "validated", "metas", "worker_run_id"];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>> {
        let metas = self.metas.as_ref().map(serde_json::to_string).transpose()?;
        Ok(query
            .bind(self.id.to_string())
            .bind(&self.entity_type)
            .bind(&self.name)
            .bind(self.validated)
            .bind(metas)
            .bind(opt_id(self.worker_run_id)))
    }
}

impl CacheRecord for CachedTranscriptionEntity {
    const TABLE: &'static str = "transcription_entities";
    const COLUMNS: &'static [&'static str] = &[
        "transcription_id",
        "entity_id",
        "offset",
        "length",
        "worker_run_id",
        "confidence",
    ];

    fn bind_columns<'q>(&'q self, query: SqliteQuery<'q>) -> Result<SqliteQuery<'q>> {
        Ok(query
            .bind(self.transcription_id.to_string())
            .bind(self.entity_id.to_string())
            .bind(self.offset)
            .bind(self.length)
            .bind(opt_id(self.worker_run_id))
            .bind(self.confidence))
    }
}

impl super::CacheStore {
    /// Insert rows of one table in a single transaction
    ///
    /// All rows are rolled back if any of them violates a constraint.
    pub async fn insert<R: CacheRecord>(&self, rows: &[R]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let sql = R::insert_sql();
        let mut tx = self.pool.begin().await?;
        for row in rows {
            row.bind_columns(sqlx::query(&sql))?
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::from_insert(R::TABLE, e))?;
        }
        tx.commit().await?;

        tracing::debug!(table = R::TABLE, count = rows.len(), "Inserted cache rows");
        Ok(())
    }

    /// Insert a single row
    pub async fn insert_one<R: CacheRecord>(&self, row: &R) -> Result<()> {
        self.insert(std::slice::from_ref(row)).await
    }

    /// Insert an image unless a row with the same id already exists
    ///
    /// Images are immutable, so an existing row is left untouched.
    pub async fn ensure_image(&self, image: &CachedImage) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO images (id, width, height, url) VALUES (?, ?, ?, ?) ON CONFLICT(id) DO NOTHING",
        )
        .bind(image.id.to_string())
        .bind(image.width)
        .bind(image.height)
        .bind(&image.url)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::from_insert(CachedImage::TABLE, e))?;

        Ok(result.rows_affected() > 0)
    }
}
