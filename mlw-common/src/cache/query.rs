//! Cache read path
//!
//! Queries return lazy cursors (`BoxStream`) that own their SQL and a pool
//! handle, so callers may keep iterating while publishing into the same cache.
//!
//! The recursive transcription query walks `elements.parent_id` breadth-first
//! from the requested root (inclusive). Output is ordered by depth, so a
//! parent's transcriptions always come before its children's. The walk is
//! bounded by [`MAX_TREE_DEPTH`]; reaching the bound fails with
//! [`Error::RecursionLimit`] instead of truncating.

use super::models::{
    CachedClassification, CachedElement, CachedImage, CachedTranscription,
    CachedTranscriptionEntity, ClassificationRow, ElementRow, ImageRow, TranscriptionEntityRow,
    TranscriptionRow,
};
use super::CacheStore;
use crate::{Error, Result};
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

/// Deepest element tree the recursive walk accepts
pub const MAX_TREE_DEPTH: u32 = 1000;

/// Filter on the worker version that produced a row
///
/// `Manual` selects rows with no worker version (created by hand).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerVersionFilter {
    #[default]
    Any,
    Manual,
    Version(Uuid),
}

/// Filter on the worker run that produced a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerRunFilter {
    #[default]
    Any,
    Manual,
    Run(Uuid),
}

impl WorkerVersionFilter {
    fn push_condition(&self, column: &str, conditions: &mut Vec<String>, binds: &mut Vec<String>) {
        match self {
            WorkerVersionFilter::Any => {}
            WorkerVersionFilter::Manual => conditions.push(format!("{column} IS NULL")),
            WorkerVersionFilter::Version(id) => {
                conditions.push(format!("{column} = ?"));
                binds.push(id.to_string());
            }
        }
    }
}

impl WorkerRunFilter {
    fn push_condition(&self, column: &str, conditions: &mut Vec<String>, binds: &mut Vec<String>) {
        match self {
            WorkerRunFilter::Any => {}
            WorkerRunFilter::Manual => conditions.push(format!("{column} IS NULL")),
            WorkerRunFilter::Run(id) => {
                conditions.push(format!("{column} = ?"));
                binds.push(id.to_string());
            }
        }
    }
}

/// Element selection supported by the cache
#[derive(Debug, Clone, Default)]
pub struct ElementQuery {
    pub parent_id: Option<Uuid>,
    pub element_type: Option<String>,
    pub worker_version: WorkerVersionFilter,
    pub worker_run: WorkerRunFilter,
    pub initial_only: bool,
}

impl ElementQuery {
    /// Direct children of `parent_id`
    pub fn children_of(parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Default::default()
        }
    }

    /// Elements seeded as the task's input
    pub fn initial() -> Self {
        Self {
            initial_only: true,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }

    pub fn with_worker_version(mut self, filter: WorkerVersionFilter) -> Self {
        self.worker_version = filter;
        self
    }

    pub fn with_worker_run(mut self, filter: WorkerRunFilter) -> Self {
        self.worker_run = filter;
        self
    }

    fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();

        if let Some(parent_id) = self.parent_id {
            conditions.push("parent_id = ?".to_string());
            binds.push(parent_id.to_string());
        }
        if let Some(element_type) = &self.element_type {
            conditions.push("type = ?".to_string());
            binds.push(element_type.clone());
        }
        if self.initial_only {
            conditions.push("initial = 1".to_string());
        }
        self.worker_version
            .push_condition("worker_version_id", &mut conditions, &mut binds);
        self.worker_run
            .push_condition("worker_run_id", &mut conditions, &mut binds);

        let mut sql = String::from("SELECT * FROM elements");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY rowid");
        (sql, binds)
    }
}

/// Transcription selection supported by the cache
#[derive(Debug, Clone)]
pub struct TranscriptionQuery {
    pub element_id: Uuid,
    /// Include transcriptions on every descendant of `element_id`
    pub recursive: bool,
    /// Restrict to transcriptions whose element has this type
    pub element_type: Option<String>,
    pub worker_version: WorkerVersionFilter,
    pub worker_run: WorkerRunFilter,
}

impl TranscriptionQuery {
    pub fn on(element_id: Uuid) -> Self {
        Self {
            element_id,
            recursive: false,
            element_type: None,
            worker_version: WorkerVersionFilter::Any,
            worker_run: WorkerRunFilter::Any,
        }
    }

    pub fn recursive(mut self) -> Self {
        self.recursive = true;
        self
    }

    pub fn with_element_type(mut self, element_type: impl Into<String>) -> Self {
        self.element_type = Some(element_type.into());
        self
    }

    pub fn with_worker_version(mut self, filter: WorkerVersionFilter) -> Self {
        self.worker_version = filter;
        self
    }

    pub fn with_worker_run(mut self, filter: WorkerRunFilter) -> Self {
        self.worker_run = filter;
        self
    }

    fn to_sql(&self) -> (String, Vec<String>) {
        let mut conditions = Vec::new();
        let mut binds = Vec::new();
        let mut sql = String::new();

        if self.recursive {
            sql.push_str(DESCENDANTS_CTE);
            binds.push(self.element_id.to_string());
            binds.push(MAX_TREE_DEPTH.to_string());
            sql.push_str(
                " SELECT t.* FROM descendants d \
                 JOIN transcriptions t ON t.element_id = d.id \
                 JOIN elements e ON e.id = t.element_id",
            );
        } else {
            sql.push_str(
                "SELECT t.* FROM transcriptions t JOIN elements e ON e.id = t.element_id",
            );
            conditions.push("t.element_id = ?".to_string());
            binds.push(self.element_id.to_string());
        }

        if let Some(element_type) = &self.element_type {
            conditions.push("e.type = ?".to_string());
            binds.push(element_type.clone());
        }
        self.worker_version
            .push_condition("t.worker_version_id", &mut conditions, &mut binds);
        self.worker_run
            .push_condition("t.worker_run_id", &mut conditions, &mut binds);

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        if self.recursive {
            sql.push_str(" ORDER BY d.depth, t.element_id, t.rowid");
        } else {
            sql.push_str(" ORDER BY t.rowid");
        }
        (sql, binds)
    }
}

/// Breadth-first closure over `parent_id`, root included at depth 0.
/// Binds: root id, depth bound.
const DESCENDANTS_CTE: &str = "WITH RECURSIVE descendants(id, depth) AS ( \
     SELECT ?, 0 \
     UNION ALL \
     SELECT e.id, d.depth + 1 FROM elements e \
     JOIN descendants d ON e.parent_id = d.id \
     WHERE d.depth < CAST(? AS INTEGER) \
     )";

/// Lazily run `sql` and map each row through `TryFrom`
fn cursor<R, T>(pool: SqlitePool, sql: String, binds: Vec<String>) -> BoxStream<'static, Result<T>>
where
    R: for<'r> FromRow<'r, SqliteRow> + Send + Unpin + 'static,
    T: TryFrom<R, Error = Error> + Send + 'static,
{
    Box::pin(try_stream! {
        let mut query = sqlx::query_as::<_, R>(&sql);
        for value in &binds {
            query = query.bind(value);
        }
        let mut rows = query.fetch(&pool);
        while let Some(row) = rows.try_next().await? {
            yield T::try_from(row)?;
        }
    })
}

impl CacheStore {
    /// Lazy cursor over elements matching `query`
    pub fn elements(&self, query: &ElementQuery) -> BoxStream<'static, Result<CachedElement>> {
        let (sql, binds) = query.to_sql();
        cursor::<ElementRow, CachedElement>(self.pool.clone(), sql, binds)
    }

    /// Lazy cursor over transcriptions matching `query`
    ///
    /// For recursive queries the tree depth under the root is checked first;
    /// a cycle in `parent_id` fails here rather than mid-iteration.
    pub async fn transcriptions(
        &self,
        query: &TranscriptionQuery,
    ) -> Result<BoxStream<'static, Result<CachedTranscription>>> {
        if query.recursive {
            self.check_tree_depth(query.element_id).await?;
        }
        let (sql, binds) = query.to_sql();
        Ok(cursor::<TranscriptionRow, CachedTranscription>(
            self.pool.clone(),
            sql,
            binds,
        ))
    }

    async fn check_tree_depth(&self, root: Uuid) -> Result<()> {
        let sql = format!("{DESCENDANTS_CTE} SELECT COALESCE(MAX(depth), 0) FROM descendants");
        let depth: i64 = sqlx::query_scalar(&sql)
            .bind(root.to_string())
            .bind(MAX_TREE_DEPTH.to_string())
            .fetch_one(&self.pool)
            .await?;

        if depth >= i64::from(MAX_TREE_DEPTH) {
            return Err(Error::RecursionLimit {
                root,
                max_depth: MAX_TREE_DEPTH,
            });
        }
        Ok(())
    }

    /// Whether any element was seeded as task input
    pub async fn has_initial_elements(&self) -> Result<bool> {
        Ok(
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM elements WHERE initial = 1)")
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// Load one element by id
    pub async fn element(&self, id: Uuid) -> Result<Option<CachedElement>> {
        sqlx::query_as::<_, ElementRow>("SELECT * FROM elements WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(CachedElement::try_from)
            .transpose()
    }

    /// Load one image by id
    pub async fn image(&self, id: Uuid) -> Result<Option<CachedImage>> {
        sqlx::query_as::<_, ImageRow>("SELECT * FROM images WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(CachedImage::try_from)
            .transpose()
    }

    /// Classifications attached to an element
    pub async fn classifications_for(&self, element_id: Uuid) -> Result<Vec<CachedClassification>> {
        sqlx::query_as::<_, ClassificationRow>(
            "SELECT * FROM classifications WHERE element_id = ? ORDER BY rowid",
        )
        .bind(element_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CachedClassification::try_from)
        .collect()
    }

    /// Entity links attached to a transcription
    pub async fn transcription_entities_for(
        &self,
        transcription_id: Uuid,
    ) -> Result<Vec<CachedTranscriptionEntity>> {
        sqlx::query_as::<_, TranscriptionEntityRow>(
            "SELECT * FROM transcription_entities WHERE transcription_id = ? ORDER BY \"offset\"",
        )
        .bind(transcription_id.to_string())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CachedTranscriptionEntity::try_from)
        .collect()
    }
}
