//! Test Helper Utilities
//!
//! Shared fixtures for cache tests

#![allow(dead_code)]

use mlw_common::cache::{CachedElement, CachedImage, CachedTranscription, TextOrientation};
use mlw_common::{CacheStore, OpenMode};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use uuid::Uuid;

/// Create a fresh cache inside a temporary directory
///
/// Returns (TempDir, CacheStore) - TempDir must be kept alive for duration of test
pub async fn create_test_cache() -> (TempDir, CacheStore) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db.sqlite");
    let store = CacheStore::open(&path, OpenMode::CreateIfMissing)
        .await
        .unwrap();
    (temp_dir, store)
}

/// Create, fill and close a cache at `dir/<name>/db.sqlite`, returning its path
pub async fn create_parent_cache(
    dir: &Path,
    name: &str,
    images: &[CachedImage],
    elements: &[CachedElement],
    transcriptions: &[CachedTranscription],
) -> PathBuf {
    let path = dir.join(name).join("db.sqlite");
    let store = CacheStore::open(&path, OpenMode::CreateIfMissing)
        .await
        .unwrap();
    store.insert(images).await.unwrap();
    store.insert(elements).await.unwrap();
    store.insert(transcriptions).await.unwrap();
    store.close().await.unwrap();
    path
}

pub fn image() -> CachedImage {
    CachedImage {
        id: Uuid::new_v4(),
        width: 800,
        height: 600,
        url: "http://iiif.example.com/image".to_string(),
    }
}

pub fn element(element_type: &str, parent_id: Option<Uuid>) -> CachedElement {
    CachedElement {
        parent_id,
        ..CachedElement::new(Uuid::new_v4(), element_type)
    }
}

pub fn transcription(element_id: Uuid, text: &str) -> CachedTranscription {
    CachedTranscription {
        id: Uuid::new_v4(),
        element_id,
        text: text.to_string(),
        confidence: 0.9,
        orientation: TextOrientation::HorizontalLr,
        worker_version_id: None,
        worker_run_id: None,
    }
}
