mod common;

use bridge_traits::storage::{RemoteEntry, RemoteStore};
use common::{Failure, MemoryStore, RAW, UNSORTED};
use core_pipeline::{Discovery, PipelineError, Predicate};
use std::sync::Arc;

fn prefixes() -> Predicate {
    Predicate::NamePrefix(vec!["raw_".to_string(), "IMG".to_string()])
}

#[tokio::test]
async fn test_prefix_filter_selects_matching_files_only() {
    let store = MemoryStore::new();
    store.add_file("_raw/raw_photo1.jpg", b"a");
    store.add_file("_raw/IMG_0001.png", b"b");
    store.add_file("_raw/notes.txt", b"c");
    store.add_file("_raw/xraw_photo.jpg", b"d");
    store.add_dir("_raw/raw_folder");

    let discovery = Discovery::new(store.clone());
    let items = discovery.discover(RAW, &prefixes()).await.unwrap();

    let names: Vec<_> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["IMG_0001.png", "raw_photo1.jpg"]);
    assert!(items.iter().all(|i| !i.is_directory && i.tags.is_empty()));
    // Prefix discovery never asks for tags
    assert_eq!(store.count_calls("get_tags"), 0);
}

#[tokio::test]
async fn test_tag_filter_keeps_tagged_entries() {
    let store = MemoryStore::new();
    let tagged = store.add_file("_unsorted/a.png", b"a");
    store.add_file("_unsorted/b.png", b"b");
    let tagged_dir = store.add_dir("_unsorted/album");
    store.tag(&tagged, "7", "ai:cats");
    store.tag(&tagged, "8", "ai:pets");
    store.tag(&tagged_dir, "9", "ai:dogs");

    let items = Discovery::new(store.clone())
        .discover(UNSORTED, &Predicate::HasTags)
        .await
        .unwrap();

    let paths: Vec<_> = items.iter().map(|i| i.path.as_str()).collect();
    assert_eq!(paths, vec!["_unsorted/album", "_unsorted/a.png"]);
    assert_eq!(items[1].tags.len(), 2);
    assert_eq!(items[1].tags[0].display_name, "ai:cats");
    assert_eq!(store.count_calls("get_tags"), 3);
}

#[tokio::test]
async fn test_malformed_entries_are_skipped() {
    let store = MemoryStore::new();
    store.add_file("_raw/raw_ok.jpg", b"a");
    store.add_entry(
        RAW,
        RemoteEntry {
            path: Some("_raw/raw_no_id.jpg".to_string()),
            name: Some("raw_no_id.jpg".to_string()),
            is_directory: Some(false),
            id: None,
            raw: "<d:response>no fileid</d:response>".to_string(),
        },
    );
    store.add_entry(
        RAW,
        RemoteEntry {
            raw: "<d:response/>".to_string(),
            ..Default::default()
        },
    );

    let items = Discovery::new(store.clone())
        .discover(RAW, &prefixes())
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].path, "_raw/raw_ok.jpg");
}

#[tokio::test]
async fn test_failed_tag_read_skips_only_that_item() {
    let store = MemoryStore::new();
    let first = store.add_file("_unsorted/a.png", b"a");
    let second = store.add_file("_unsorted/b.png", b"b");
    store.tag(&first, "7", "ai:cats");
    store.tag(&second, "7", "ai:cats");
    store.fail("get_tags", Failure::Server, 1);

    let items = Discovery::new(store.clone())
        .discover(UNSORTED, &Predicate::HasTags)
        .await
        .unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, second);
}

#[tokio::test]
async fn test_listing_failure_is_returned() {
    let store = MemoryStore::new();
    let discovery = Discovery::new(store.clone() as Arc<dyn RemoteStore>);

    let result = discovery.discover("missing", &prefixes()).await;
    assert!(matches!(result, Err(PipelineError::Bridge(ref e)) if e.is_not_found()));
}
