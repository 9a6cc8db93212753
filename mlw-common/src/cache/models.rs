//! Cached rows mirrored from the remote annotation graph
//!
//! Each model has a `*Row` twin deriving `sqlx::FromRow` that holds the raw
//! SQLite representation (UUIDs as hyphenated TEXT, JSON as TEXT, booleans as
//! INTEGER). Conversion back to the model validates ids and embedded JSON.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Ordered list of `[x, y]` points, at least three
pub type Polygon = Vec<[f64; 2]>;

/// Text orientation accepted on transcriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextOrientation {
    #[default]
    HorizontalLr,
    HorizontalRl,
    VerticalLr,
    VerticalRl,
}

impl TextOrientation {
    pub const ALL: [TextOrientation; 4] = [
        TextOrientation::HorizontalLr,
        TextOrientation::HorizontalRl,
        TextOrientation::VerticalLr,
        TextOrientation::VerticalRl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TextOrientation::HorizontalLr => "horizontal-lr",
            TextOrientation::HorizontalRl => "horizontal-rl",
            TextOrientation::VerticalLr => "vertical-lr",
            TextOrientation::VerticalRl => "vertical-rl",
        }
    }
}

impl fmt::Display for TextOrientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextOrientation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        TextOrientation::ALL
            .into_iter()
            .find(|o| o.as_str() == s)
            .ok_or_else(|| format!("Invalid text orientation: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedImage {
    pub id: Uuid,
    pub width: i64,
    pub height: i64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedElement {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub element_type: String,
    pub image_id: Option<Uuid>,
    pub polygon: Option<Polygon>,
    pub rotation_angle: i64,
    pub mirrored: bool,
    pub initial: bool,
    pub worker_version_id: Option<Uuid>,
    pub worker_run_id: Option<Uuid>,
    pub confidence: Option<f64>,
}

impl CachedElement {
    /// Element with every optional column unset
    pub fn new(id: Uuid, element_type: impl Into<String>) -> Self {
        Self {
            id,
            parent_id: None,
            element_type: element_type.into(),
            image_id: None,
            polygon: None,
            rotation_angle: 0,
            mirrored: false,
            initial: false,
            worker_version_id: None,
            worker_run_id: None,
            confidence: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTranscription {
    pub id: Uuid,
    pub element_id: Uuid,
    pub text: String,
    pub confidence: f64,
    pub orientation: TextOrientation,
    pub worker_version_id: Option<Uuid>,
    pub worker_run_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedClassification {
    pub id: Uuid,
    pub element_id: Uuid,
    pub class_name: String,
    pub confidence: f64,
    pub state: String,
    pub worker_run_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedEntity {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub validated: bool,
    pub metas: Option<serde_json::Value>,
    pub worker_run_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedTranscriptionEntity {
    pub transcription_id: Uuid,
    pub entity_id: Uuid,
    pub offset: i64,
    pub length: i64,
    pub worker_run_id: Option<Uuid>,
    pub confidence: Option<f64>,
}

// ============================================================================
// Raw rows
// ============================================================================

fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::InvalidRow(format!("{column} = {value:?}: {e}")))
}

fn parse_opt_uuid(column: &str, value: Option<String>) -> Result<Option<Uuid>> {
    value.map(|v| parse_uuid(column, &v)).transpose()
}

#[derive(Debug, sqlx::FromRow)]
pub struct ImageRow {
    pub id: String,
    pub width: i64,
    pub height: i64,
    pub url: String,
}

impl TryFrom<ImageRow> for CachedImage {
    type Error = Error;

    fn try_from(row: ImageRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid("images.id", &row.id)?,
            width: row.width,
            height: row.height,
            url: row.url,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ElementRow {
    pub id: String,
    pub parent_id: Option<String>,
    #[sqlx(rename = "type")]
    pub element_type: String,
    pub image_id: Option<String>,
    pub polygon: Option<String>,
    pub rotation_angle: i64,
    pub mirrored: bool,
    pub initial: bool,
    pub worker_version_id: Option<String>,
    pub worker_run_id: Option<String>,
    pub confidence: Option<f64>,
}

impl TryFrom<ElementRow> for CachedElement {
    type Error = Error;

    fn try_from(row: ElementRow) -> Result<Self> {
        let polygon = row
            .polygon
            .as_deref()
            .map(serde_json::from_str::<Polygon>)
            .transpose()?;

        Ok(Self {
            id: parse_uuid("elements.id", &row.id)?,
            parent_id: parse_opt_uuid("elements.parent_id", row.parent_id)?,
            element_type: row.element_type,
            image_id: parse_opt_uuid("elements.image_id", row.image_id)?,
            polygon,
            rotation_angle: row.rotation_angle,
            mirrored: row.mirrored,
            initial: row.initial,
            worker_version_id: parse_opt_uuid("elements.worker_version_id", row.worker_version_id)?,
            worker_run_id: parse_opt_uuid("elements.worker_run_id", row.worker_run_id)?,
            confidence: row.confidence,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TranscriptionRow {
    pub id: String,
    pub element_id: String,
    pub text: String,
    pub confidence: f64,
    pub orientation: String,
    pub worker_version_id: Option<String>,
    pub worker_run_id: Option<String>,
}

impl TryFrom<TranscriptionRow> for CachedTranscription {
    type Error = Error;

    fn try_from(row: TranscriptionRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid("transcriptions.id", &row.id)?,
            element_id: parse_uuid("transcriptions.element_id", &row.element_id)?,
            text: row.text,
            confidence: row.confidence,
            orientation: row.orientation.parse().map_err(Error::InvalidRow)?,
            worker_version_id: parse_opt_uuid(
                "transcriptions.worker_version_id",
                row.worker_version_id,
            )?,
            worker_run_id: parse_opt_uuid("transcriptions.worker_run_id", row.worker_run_id)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct ClassificationRow {
    pub id: String,
    pub element_id: String,
    pub class_name: String,
    pub confidence: f64,
    pub state: String,
    pub worker_run_id: Option<String>,
}

impl TryFrom<ClassificationRow> for CachedClassification {
    type Error = Error;

    fn try_from(row: ClassificationRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid("classifications.id", &row.id)?,
            element_id: parse_uuid("classifications.element_id", &row.element_id)?,
            class_name: row.class_name,
            confidence: row.confidence,
            state: row.state,
            worker_run_id: parse_opt_uuid("classifications.worker_run_id", row.worker_run_id)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct EntityRow {
    pub id: String,
    #[sqlx(rename = "type")]
    pub entity_type: String,
    pub name: String,
    pub validated: bool,
    pub metas: Option<String>,
    pub worker_run_id: Option<String>,
}

impl TryFrom<EntityRow> for CachedEntity {
    type Error = Error;

    fn try_from(row: EntityRow) -> Result<Self> {
        Ok(Self {
            id: parse_uuid("entities.id", &row.id)?,
            entity_type: row.entity_type,
            name: row.name,
            validated: row.validated,
            metas: row.metas.as_deref().map(serde_json::from_str).transpose()?,
            worker_run_id: parse_opt_uuid("entities.worker_run_id", row.worker_run_id)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct TranscriptionEntityRow {
    pub transcription_id: String,
    pub entity_id: String,
    pub offset: i64,
    pub length: i64,
    pub worker_run_id: Option<String>,
    pub confidence: Option<f64>,
}

impl TryFrom<TranscriptionEntityRow> for CachedTranscriptionEntity {
    type Error = Error;

    fn try_from(row: TranscriptionEntityRow) -> Result<Self> {
        Ok(Self {
            transcription_id: parse_uuid(
                "transcription_entities.transcription_id",
                &row.transcription_id,
            )?,
            entity_id: parse_uuid("transcription_entities.entity_id", &row.entity_id)?,
            offset: row.offset,
            length: row.length,
            worker_run_id: parse_opt_uuid(
                "transcription_entities.worker_run_id",
                row.worker_run_id,
            )?,
            confidence: row.confidence,
        })
    }
}
