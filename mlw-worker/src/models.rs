//! Element and annotation models exchanged with the remote
//!
//! Elements reach the worker either from the remote API or from the local
//! cache. Both are normalized into [`Element`], which is what publishers and
//! the per-element callback work with.

use crate::error::{Result, WorkerError};
use mlw_common::cache::{CachedElement, CachedImage, CachedTranscription};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use mlw_common::cache::{Polygon, TextOrientation};

/// IIIF image backing an element zone
pub type Image = CachedImage;

/// Element zone as returned by the remote
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Zone {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub polygon: Polygon,
    pub image: Image,
}

/// Element as returned by `RetrieveElement` and list endpoints
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteElement {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub element_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub zone: Option<Zone>,
    #[serde(default)]
    pub rotation_angle: i64,
    #[serde(default)]
    pub mirrored: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "worker_version")]
    pub worker_version_id: Option<Uuid>,
    #[serde(default)]
    pub worker_run_id: Option<Uuid>,
}

/// Where an [`Element`] was loaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementSource {
    Remote,
    Cache,
}

/// Document element handed to the per-element callback
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Element {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub element_type: String,
    pub name: Option<String>,
    pub parent_id: Option<Uuid>,
    pub image: Option<Image>,
    pub polygon: Option<Polygon>,
    pub rotation_angle: i64,
    pub mirrored: bool,
    pub confidence: Option<f64>,
    pub worker_version_id: Option<Uuid>,
    pub worker_run_id: Option<Uuid>,
    pub initial: bool,
    pub source: ElementSource,
}

impl Element {
    pub fn from_remote(remote: RemoteElement, parent_id: Option<Uuid>) -> Self {
        let (image, polygon) = match remote.zone {
            Some(zone) => (Some(zone.image), Some(zone.polygon)),
            None => (None, None),
        };
        Self {
            id: remote.id,
            element_type: remote.element_type,
            name: remote.name,
            parent_id,
            image,
            polygon,
            rotation_angle: remote.rotation_angle,
            mirrored: remote.mirrored,
            confidence: remote.confidence,
            worker_version_id: remote.worker_version_id,
            worker_run_id: remote.worker_run_id,
            initial: false,
            source: ElementSource::Remote,
        }
    }

    /// Rebuild an element from its cache row; `image` is the row behind `image_id`
    pub fn from_cached(cached: CachedElement, image: Option<Image>) -> Self {
        Self {
            id: cached.id,
            element_type: cached.element_type,
            name: None,
            parent_id: cached.parent_id,
            image,
            polygon: cached.polygon,
            rotation_angle: cached.rotation_angle,
            mirrored: cached.mirrored,
            confidence: cached.confidence,
            worker_version_id: cached.worker_version_id,
            worker_run_id: cached.worker_run_id,
            initial: cached.initial,
            source: ElementSource::Cache,
        }
    }

    /// Cache row mirroring this element
    pub fn to_cached(&self) -> CachedElement {
        CachedElement {
            id: self.id,
            parent_id: self.parent_id,
            element_type: self.element_type.clone(),
            image_id: self.image.as_ref().map(|i| i.id),
            polygon: self.polygon.clone(),
            rotation_angle: self.rotation_angle,
            mirrored: self.mirrored,
            initial: self.initial,
            worker_version_id: self.worker_version_id,
            worker_run_id: self.worker_run_id,
            confidence: self.confidence,
        }
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == ElementSource::Cache
    }

    pub fn require_image(&self) -> Result<&Image> {
        self.image.as_ref().ok_or(WorkerError::MissingImage(self.id))
    }

    pub fn require_polygon(&self) -> Result<&Polygon> {
        self.polygon
            .as_ref()
            .ok_or(WorkerError::MissingPolygon(self.id))
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {} ({})", self.element_type, name, self.id),
            None => write!(f, "{} ({})", self.element_type, self.id),
        }
    }
}

/// Entry of an `--elements-list` file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ElementDescriptor {
    pub id: Uuid,
    #[serde(rename = "type", default)]
    pub element_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ElementRef {
    id: Uuid,
}

/// Transcription as returned by list endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTranscription {
    pub id: Uuid,
    pub text: String,
    pub confidence: f64,
    #[serde(default)]
    pub orientation: TextOrientation,
    #[serde(default)]
    element: Option<ElementRef>,
    #[serde(default, alias = "worker_version")]
    pub worker_version_id: Option<Uuid>,
    #[serde(default)]
    pub worker_run_id: Option<Uuid>,
}

impl RemoteTranscription {
    /// Normalize into the cache shape; `element_id` is used when the payload
    /// doesn't embed its element
    pub fn into_transcription(self, element_id: Uuid) -> CachedTranscription {
        CachedTranscription {
            id: self.id,
            element_id: self.element.map(|e| e.id).unwrap_or(element_id),
            text: self.text,
            confidence: self.confidence,
            orientation: self.orientation,
            worker_version_id: self.worker_version_id,
            worker_run_id: self.worker_run_id,
        }
    }
}

/// Entity as returned by `ListCorpusEntities`
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteEntity {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    #[serde(default)]
    pub metas: Option<serde_json::Value>,
    #[serde(default)]
    pub validated: bool,
}

/// Identifier returned by create endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct Created {
    pub id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote_page() -> RemoteElement {
        serde_json::from_value(json!({
            "id": "12341234-1234-1234-1234-123412341234",
            "type": "page",
            "name": "1r",
            "zone": {
                "polygon": [[0, 0], [0, 100], [100, 100], [100, 0]],
                "image": {
                    "id": "aaaaaaaa-1234-1234-1234-123412341234",
                    "width": 100,
                    "height": 100,
                    "url": "http://iiif/img",
                    "s3_url": null
                }
            },
            "worker_version": null
        }))
        .unwrap()
    }

    #[test]
    fn test_remote_element_flattens_zone() {
        let element = Element::from_remote(remote_page(), None);
        assert_eq!(element.element_type, "page");
        assert_eq!(element.image.as_ref().map(|i| i.width), Some(100));
        assert_eq!(element.polygon.as_ref().map(Vec::len), Some(4));
        assert_eq!(element.source, ElementSource::Remote);
        assert!(element.require_polygon().is_ok());
    }

    #[test]
    fn test_cache_round_trip_keeps_columns() {
        let mut element = Element::from_remote(remote_page(), Some(Uuid::new_v4()));
        element.initial = true;
        let cached = element.to_cached();
        assert_eq!(cached.image_id, element.image.as_ref().map(|i| i.id));
        assert!(cached.initial);

        let back = Element::from_cached(cached, element.image.clone());
        assert_eq!(back.id, element.id);
        assert_eq!(back.parent_id, element.parent_id);
        assert!(back.is_from_cache());
    }

    #[test]
    fn test_missing_zone_reported() {
        let element = Element::from_cached(CachedElement::new(Uuid::new_v4(), "page"), None);
        assert!(matches!(element.require_image(), Err(WorkerError::MissingImage(id)) if id == element.id));
        assert!(matches!(element.require_polygon(), Err(WorkerError::MissingPolygon(_))));
    }

    #[test]
    fn test_remote_transcription_falls_back_to_queried_element() {
        let element_id = Uuid::new_v4();
        let remote: RemoteTranscription = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "text": "hello",
            "confidence": 0.5,
        }))
        .unwrap();
        let transcription = remote.into_transcription(element_id);
        assert_eq!(transcription.element_id, element_id);
        assert_eq!(transcription.orientation, TextOrientation::HorizontalLr);
    }
}
