//! Publisher integration tests
//!
//! Publishers run against a scripted transport and a real cache file.

mod helpers;

use futures::TryStreamExt;
use helpers::*;
use mlw_common::cache::{CacheTable, CachedElement};
use mlw_worker::publishers::classifications::DUPLICATE_CLASSIFICATION;
use mlw_worker::publishers::{
    ChildrenFilter, EntityMention, MetaType, NewClassification, NewElement, NewElementTranscription,
    NewEntity, NewMetadata, NewTranscription, NewTranscriptionEntity, TranscriptionEntities,
    TranscriptionFilter,
};
use mlw_worker::WorkerError;
use reqwest::Method;
use serde_json::json;
use uuid::Uuid;

fn child(parent_id: Uuid, element_type: &str) -> CachedElement {
    CachedElement {
        parent_id: Some(parent_id),
        ..CachedElement::new(Uuid::new_v4(), element_type)
    }
}

#[tokio::test]
async fn test_read_only_mode_sends_nothing() {
    let t = test_publishers(true, true).await;
    let page = page();

    let element = t
        .publishers
        .elements
        .create_sub_element(&page, NewElement::new("line", "1", square(10.0)))
        .await
        .unwrap();
    assert_eq!(element, None);

    let transcription = t
        .publishers
        .transcriptions
        .create_transcription(&page, "hello", 0.9)
        .await
        .unwrap();
    assert_eq!(transcription, None);

    let classification = t
        .publishers
        .classifications
        .create_classification(&page, NewClassification::new("cat", 0.8))
        .await
        .unwrap();
    assert_eq!(classification, None);

    let entity = t
        .publishers
        .entities
        .create_entity(&page, NewEntity::new("Paris", "location"))
        .await
        .unwrap();
    assert_eq!(entity, None);

    let metadata = t
        .publishers
        .metadata
        .create_metadata(&page, NewMetadata::new(MetaType::Text, "folio", "1r"))
        .await
        .unwrap();
    assert_eq!(metadata, None);

    let linked = t
        .publishers
        .elements
        .create_element_parent(&page, &helpers::page())
        .await
        .unwrap();
    assert!(!linked);

    assert!(t.transport.calls().is_empty());
    let cache = t.cache.as_ref().unwrap();
    assert_eq!(cache.count(CacheTable::Elements).await.unwrap(), 0);
    assert_eq!(cache.count(CacheTable::Transcriptions).await.unwrap(), 0);
    assert_eq!(t.reporter.lock().await.transcription_count(), 0);
}

#[tokio::test]
async fn test_validation_runs_before_read_only_check() {
    let t = test_publishers(false, true).await;
    let page = page();

    let result = t
        .publishers
        .transcriptions
        .create_transcription(&page, "hello", 1.5)
        .await;
    assert!(matches!(result, Err(WorkerError::Validation(_))));

    let result = t
        .publishers
        .elements
        .create_sub_element(&page, NewElement::new("line", "1", vec![[0.0, 0.0], [1.0, 1.0]]))
        .await;
    assert!(matches!(result, Err(WorkerError::Validation(_))));
}

#[tokio::test]
async fn test_sub_element_requires_parent_polygon() {
    let t = test_publishers(false, false).await;
    let mut page = page();
    page.polygon = None;

    let result = t
        .publishers
        .elements
        .create_sub_element(&page, NewElement::new("line", "1", square(10.0)))
        .await;
    assert!(matches!(result, Err(WorkerError::MissingPolygon(id)) if id == page.id));
    assert!(t.transport.calls().is_empty());
}

#[tokio::test]
async fn test_created_element_is_mirrored_in_cache() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();
    cache_element(cache, &page).await;

    let created_id = Uuid::new_v4();
    t.transport
        .reply(Method::POST, "api/v1/elements/create/", 201, json!({ "id": created_id }));

    let id = t
        .publishers
        .elements
        .create_sub_element(
            &page,
            NewElement::new("line", "1", square(10.0)).with_confidence(0.5),
        )
        .await
        .unwrap();
    assert_eq!(id, Some(created_id));

    let request = &t.transport.calls_to(Method::POST, "api/v1/elements/create/")[0];
    let body = request.body.as_ref().unwrap();
    assert_eq!(body["parent"], json!(page.id));
    assert_eq!(body["image"], json!(page.image.as_ref().unwrap().id));
    assert_eq!(body["worker_run_id"], json!(t.identity.worker_run_id));

    let cached = cache.element(created_id).await.unwrap().unwrap();
    assert_eq!(cached.parent_id, Some(page.id));
    assert_eq!(cached.image_id, Some(page.image.as_ref().unwrap().id));
    assert_eq!(cached.worker_run_id, t.identity.worker_run_id);
    assert!(!cached.initial);
    assert_eq!(cached.confidence, Some(0.5));

    let reporter = t.reporter.lock().await;
    assert_eq!(reporter.element(page.id).unwrap().elements["line"], 1);
}

#[tokio::test]
async fn test_bulk_elements_upsert_parent_image() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();

    // Parent row without its image in the cache
    cache
        .insert_one(&CachedElement::new(page.id, "page"))
        .await
        .unwrap();

    let ids = [Uuid::new_v4(), Uuid::new_v4()];
    t.transport.reply(
        Method::POST,
        &format!("api/v1/element/{}/children/bulk/", page.id),
        201,
        json!([{ "id": ids[0] }, { "id": ids[1] }]),
    );

    let created = t
        .publishers
        .elements
        .create_elements(
            &page,
            vec![
                NewElement::new("line", "1", square(10.0)),
                NewElement::new("line", "2", square(20.0)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(created, Some(ids.to_vec()));

    let image_id = page.image.as_ref().unwrap().id;
    assert!(cache.image(image_id).await.unwrap().is_some());
    for id in ids {
        let row = cache.element(id).await.unwrap().unwrap();
        assert_eq!(row.image_id, Some(image_id));
        assert_eq!(row.element_type, "line");
    }
    assert_eq!(
        t.reporter.lock().await.element(page.id).unwrap().elements["line"],
        2
    );
}

#[tokio::test]
async fn test_failed_remote_call_leaves_no_cache_row() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();
    cache_element(cache, &page).await;

    t.transport.reply(
        Method::POST,
        &format!("api/v1/element/{}/transcription/", page.id),
        400,
        json!({ "text": ["This field may not be blank."] }),
    );

    let result = t
        .publishers
        .transcriptions
        .create_transcription(&page, "hello", 0.9)
        .await;
    match result {
        Err(WorkerError::Api(e)) => assert_eq!(e.status(), Some(400)),
        other => panic!("expected an API error, got {other:?}"),
    }

    assert_eq!(cache.count(CacheTable::Transcriptions).await.unwrap(), 0);
    assert_eq!(t.reporter.lock().await.transcription_count(), 0);
}

#[tokio::test]
async fn test_transcription_retried_after_server_error() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();
    cache_element(cache, &page).await;

    let path = format!("api/v1/element/{}/transcription/", page.id);
    let created_id = Uuid::new_v4();
    t.transport.reply(Method::POST, &path, 502, json!(null));
    t.transport.reply(Method::POST, &path, 201, json!({ "id": created_id }));

    let created = t
        .publishers
        .transcriptions
        .create_transcription(&page, "hello", 0.9)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.id, created_id);
    assert_eq!(t.transport.calls_to(Method::POST, &path).len(), 2);
    assert_eq!(cache.count(CacheTable::Transcriptions).await.unwrap(), 1);
    assert_eq!(t.reporter.lock().await.transcription_count(), 1);
}

#[tokio::test]
async fn test_duplicate_classification_is_a_warning() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();
    cache_element(cache, &page).await;

    let corpus_id = t.identity.corpus_id.unwrap();
    let class_id = Uuid::new_v4();
    t.transport.reply(
        Method::GET,
        &format!("api/v1/corpus/{corpus_id}/classes/"),
        200,
        page_of(vec![json!({ "id": class_id, "name": "cat" })], None),
    );
    let first_id = Uuid::new_v4();
    t.transport.reply(
        Method::POST,
        "api/v1/classifications/",
        201,
        json!({ "id": first_id, "state": "pending" }),
    );
    t.transport.reply(
        Method::POST,
        "api/v1/classifications/",
        400,
        json!({ "non_field_errors": [DUPLICATE_CLASSIFICATION] }),
    );

    let first = t
        .publishers
        .classifications
        .create_classification(&page, NewClassification::new("cat", 0.8))
        .await
        .unwrap();
    assert_eq!(first.map(|c| c.id), Some(first_id));

    let second = t
        .publishers
        .classifications
        .create_classification(&page, NewClassification::new("cat", 0.8))
        .await
        .unwrap();
    assert_eq!(second, None);

    let posted = t.transport.calls_to(Method::POST, "api/v1/classifications/");
    assert_eq!(posted.len(), 2);
    assert_eq!(posted[0].body.as_ref().unwrap()["ml_class"], json!(class_id));

    assert_eq!(t.reporter.lock().await.classification_count(), 1);
    assert_eq!(cache.classifications_for(page.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_ml_class_is_created_once() {
    let t = test_publishers(false, false).await;
    let page = page();
    let corpus_id = t.identity.corpus_id.unwrap();
    let classes_path = format!("api/v1/corpus/{corpus_id}/classes/");

    t.transport
        .reply(Method::GET, &classes_path, 200, page_of(vec![], None));
    let class_id = Uuid::new_v4();
    t.transport.reply(
        Method::POST,
        &classes_path,
        201,
        json!({ "id": class_id, "name": "dog" }),
    );
    t.transport.reply(
        Method::POST,
        "api/v1/classification/bulk/",
        201,
        json!({ "classifications": [{ "id": Uuid::new_v4() }, { "id": Uuid::new_v4() }] }),
    );

    let created = t
        .publishers
        .classifications
        .create_classifications(
            &page,
            vec![
                NewClassification::new("dog", 0.7),
                NewClassification::new("dog", 0.9).high_confidence(),
            ],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.len(), 2);
    assert!(created.iter().all(|c| c.state == "pending"));

    assert_eq!(t.transport.calls_to(Method::GET, &classes_path).len(), 1);
    assert_eq!(t.transport.calls_to(Method::POST, &classes_path).len(), 1);
    let bulk = &t.transport.calls_to(Method::POST, "api/v1/classification/bulk/")[0];
    let body = bulk.body.as_ref().unwrap();
    assert_eq!(body["parent"], json!(page.id));
    assert_eq!(body["classifications"][1]["ml_class"], json!(class_id));
    assert_eq!(body["classifications"][1]["high_confidence"], json!(true));
    assert_eq!(t.reporter.lock().await.classification_count(), 2);
}

#[tokio::test]
async fn test_cache_children_listing() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let root = page();
    cache_element(cache, &root).await;

    let line_1 = child(root.id, "line");
    let line_2 = child(root.id, "line");
    let word = child(root.id, "word");
    cache
        .insert(&[line_1.clone(), line_2.clone(), word])
        .await
        .unwrap();

    let lines: Vec<Uuid> = t
        .publishers
        .elements
        .list_element_children(&root, &ChildrenFilter::of_type("line"))
        .unwrap()
        .map_ok(|e| e.id)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(lines.len(), 2);
    assert!(lines.contains(&line_1.id));
    assert!(lines.contains(&line_2.id));

    let named = ChildrenFilter {
        name: Some("foo".to_string()),
        ..ChildrenFilter::of_type("line")
    };
    let result = t.publishers.elements.list_element_children(&root, &named);
    assert!(matches!(result, Err(WorkerError::UnsupportedFilter(_))));

    assert!(t.transport.calls().is_empty());
}

#[tokio::test]
async fn test_remote_children_listing_follows_pages() {
    let t = test_publishers(false, false).await;
    let root = page();
    let path = format!("api/v1/elements/{}/children/", root.id);
    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];

    t.transport.reply(
        Method::GET,
        &path,
        200,
        page_of(
            vec![remote_element(ids[0], "line"), remote_element(ids[1], "line")],
            Some("http://remote/next"),
        ),
    );
    t.transport.reply(
        Method::GET,
        &path,
        200,
        page_of(vec![remote_element(ids[2], "line")], None),
    );

    let children: Vec<_> = t
        .publishers
        .elements
        .list_element_children(&root, &ChildrenFilter::of_type("line"))
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(children.iter().map(|e| e.id).collect::<Vec<_>>(), ids.to_vec());
    assert!(children.iter().all(|e| e.parent_id == Some(root.id)));
    assert!(children.iter().all(|e| e.image.is_some()));

    let calls = t.transport.calls_to(Method::GET, &path);
    assert_eq!(calls.len(), 2);
    assert!(calls[0].query.contains(&("type".to_string(), "line".to_string())));
    assert!(calls[1].query.contains(&("page".to_string(), "2".to_string())));
}

#[tokio::test]
async fn test_recursive_transcriptions_from_cache() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let root = page();
    cache_element(cache, &root).await;

    let line = child(root.id, "line");
    let word = child(line.id, "word");
    let other_page = CachedElement::new(Uuid::new_v4(), "page");
    cache
        .insert(&[line.clone(), word.clone(), other_page.clone()])
        .await
        .unwrap();

    for (element_id, text) in [
        (root.id, "page text"),
        (line.id, "line text"),
        (word.id, "word"),
        (other_page.id, "elsewhere"),
    ] {
        cache
            .insert_one(&mlw_common::cache::CachedTranscription {
                id: Uuid::new_v4(),
                element_id,
                text: text.to_string(),
                confidence: 1.0,
                orientation: Default::default(),
                worker_version_id: None,
                worker_run_id: None,
            })
            .await
            .unwrap();
    }

    let mut texts: Vec<String> = t
        .publishers
        .transcriptions
        .list_transcriptions(&root, &TranscriptionFilter::recursive())
        .await
        .unwrap()
        .map_ok(|tr| tr.text)
        .try_collect()
        .await
        .unwrap();
    texts.sort();
    assert_eq!(texts, vec!["line text", "page text", "word"]);

    let words: Vec<String> = t
        .publishers
        .transcriptions
        .list_transcriptions(
            &root,
            &TranscriptionFilter {
                element_type: Some("word".to_string()),
                ..TranscriptionFilter::recursive()
            },
        )
        .await
        .unwrap()
        .map_ok(|tr| tr.text)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(words, vec!["word"]);
}

#[tokio::test]
async fn test_element_transcriptions_mirror_new_sub_elements() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();
    cache_element(cache, &page).await;

    let line_id = Uuid::new_v4();
    let existing_line = child(page.id, "line");
    cache.insert_one(&existing_line).await.unwrap();

    t.transport.reply(
        Method::POST,
        &format!("api/v1/element/{}/transcriptions/bulk/", page.id),
        201,
        json!([
            { "id": Uuid::new_v4(), "element_id": line_id, "created": true },
            { "id": Uuid::new_v4(), "element_id": existing_line.id, "created": false },
        ]),
    );

    let created = t
        .publishers
        .transcriptions
        .create_element_transcriptions(
            &page,
            "line",
            vec![
                NewElementTranscription {
                    polygon: square(10.0),
                    transcription: NewTranscription::new("first", 0.9),
                    element_confidence: Some(0.8),
                },
                NewElementTranscription {
                    polygon: square(20.0),
                    transcription: NewTranscription::new("second", 0.7),
                    element_confidence: None,
                },
            ],
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(created.len(), 2);

    let line = cache.element(line_id).await.unwrap().unwrap();
    assert_eq!(line.parent_id, Some(page.id));
    assert_eq!(line.confidence, Some(0.8));
    assert_eq!(cache.count(CacheTable::Elements).await.unwrap(), 3);
    assert_eq!(cache.count(CacheTable::Transcriptions).await.unwrap(), 2);

    let reporter = t.reporter.lock().await;
    let report = reporter.element(page.id).unwrap();
    assert_eq!(report.elements["line"], 1);
    assert_eq!(report.transcriptions, 2);
}

#[tokio::test]
async fn test_entities_and_mentions_are_mirrored() {
    let t = test_publishers(true, false).await;
    let cache = t.cache.as_ref().unwrap();
    let page = page();
    cache_element(cache, &page).await;

    let transcription_id = Uuid::new_v4();
    t.transport.reply(
        Method::POST,
        &format!("api/v1/element/{}/transcription/", page.id),
        201,
        json!({ "id": transcription_id }),
    );
    t.publishers
        .transcriptions
        .create_transcription(&page, "Paris and Lyon", 1.0)
        .await
        .unwrap();

    let paris = Uuid::new_v4();
    t.transport
        .reply(Method::POST, "api/v1/entity/", 201, json!({ "id": paris }));
    let entity = t
        .publishers
        .entities
        .create_entity(&page, NewEntity::new("Paris", "location"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entity.id, paris);

    t.transport.reply(
        Method::POST,
        &format!("api/v1/transcription/{transcription_id}/entity/"),
        201,
        json!({ "entity": paris, "offset": 0, "length": 5 }),
    );
    t.publishers
        .entities
        .create_transcription_entity(
            &page,
            NewTranscriptionEntity {
                transcription_id,
                entity_id: paris,
                offset: 0,
                length: 5,
                confidence: None,
            },
        )
        .await
        .unwrap();

    let lyon = Uuid::new_v4();
    t.transport.reply(
        Method::POST,
        &format!("api/v1/transcription/{transcription_id}/entities/bulk/"),
        201,
        json!({ "entities": [{ "transcription_entity_id": Uuid::new_v4(), "entity_id": lyon }] }),
    );
    t.publishers
        .entities
        .create_transcription_entities(
            &page,
            TranscriptionEntities {
                transcription_id,
                mentions: vec![EntityMention {
                    name: "Lyon".to_string(),
                    entity_type: "location".to_string(),
                    offset: 10,
                    length: 4,
                    confidence: Some(0.9),
                }],
            },
        )
        .await
        .unwrap();

    assert_eq!(cache.count(CacheTable::Entities).await.unwrap(), 2);
    let links = cache.transcription_entities_for(transcription_id).await.unwrap();
    assert_eq!(
        links.iter().map(|l| l.entity_id).collect::<Vec<_>>(),
        vec![paris, lyon]
    );

    let reporter = t.reporter.lock().await;
    let report = reporter.element(page.id).unwrap();
    assert_eq!(report.entities.len(), 2);
    assert_eq!(report.transcription_entities.len(), 2);
}

#[tokio::test]
async fn test_metadata_published_and_reported() {
    let t = test_publishers(true, false).await;
    let page = page();
    let path = format!("api/v1/element/{}/metadata/", page.id);
    let meta_id = Uuid::new_v4();
    t.transport.reply(Method::POST, &path, 201, json!({ "id": meta_id }));

    let created = t
        .publishers
        .metadata
        .create_metadata(&page, NewMetadata::new(MetaType::Numeric, "lines", "12"))
        .await
        .unwrap();
    assert_eq!(created, Some(meta_id));

    let body = t.transport.calls_to(Method::POST, &path)[0].body.clone().unwrap();
    assert_eq!(body["type"], json!("numeric"));
    assert_eq!(body["value"], json!("12"));

    let invalid = t
        .publishers
        .metadata
        .create_metadata(&page, NewMetadata::new(MetaType::Numeric, "lines", "many"))
        .await;
    assert!(matches!(invalid, Err(WorkerError::Validation(_))));
    assert_eq!(t.transport.calls().len(), 1);

    let reporter = t.reporter.lock().await;
    let report = reporter.element(page.id).unwrap();
    assert_eq!(report.metadata.len(), 1);
    assert_eq!(report.metadata[0].meta_type, "numeric");
}
