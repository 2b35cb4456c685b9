//! End-to-End Storage and Persistence Tests
//!
//! Drives the blob store and the runtime through the full object life cycle:
//! store, inspect, fetch, invoke, delete.

use axo_mobility::{ActiveObject, Kwargs};
use axo_runtime::Runtime;
use axo_storage::{checksum, LocalStorageService, StorageService, Tags};
use axo_types::{ErrorKind, MetadataInit, MetadataX};
use serde_json::json;
use tests_integration::{runtime_config, test_types, Counter};

/// Test: The `b1/k1` scenario
///
/// A blob stored under b1/k1 reports its size and checksum, reads back
/// unchanged and is gone after deletion.
#[test]
fn test_store_get_metadata_delete() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = LocalStorageService::open(dir.path(), "producer-1").expect("open store");

    let key = storage
        .put("b1", "k1", b"hello", &Tags::new(), 0)
        .expect("put");
    assert_eq!(key, "k1");

    let metadata = storage.get_metadata("b1", "k1").expect("metadata");
    assert_eq!(metadata.size, 5);
    assert_eq!(metadata.checksum, checksum(b"hello"));
    assert_eq!(metadata.producer_id, "producer-1");
    assert_eq!(metadata.bucket_id, "b1");

    assert_eq!(storage.get("b1", "k1", 0).expect("get"), b"hello");

    assert!(storage.delete("b1", "k1").expect("delete"));
    let err = storage.get("b1", "k1", 0).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert!(!storage.delete("b1", "k1").expect("second delete"));
}

/// Test: Disabled blobs read as missing
#[test]
fn test_disabled_blob_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = LocalStorageService::open(dir.path(), "producer-1").expect("open store");
    storage.put("b1", "k1", b"hello", &Tags::new(), 0).expect("put");

    storage.disable("b1", "k1").expect("disable");
    assert_eq!(storage.get("b1", "k1", 0).unwrap_err().kind, ErrorKind::NotFound);
}

/// Test: Object survives a persist/restore cycle with state and behavior
#[test]
fn test_persist_restore_invoke() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = Runtime::local(runtime_config(dir.path()), test_types().expect("types"))
        .expect("runtime");
    let metadata = MetadataX::new(
        MetadataInit::default()
            .key("counter-1")
            .bucket_id("objects")
            .class_name("Counter"),
    )
    .expect("metadata");

    let mut counter = Counter::new("visits");
    counter.count = 41;
    let stored = runtime.persistify(&counter, &metadata).expect("persistify");
    assert_eq!(stored.source.key(), "counter-1_source");
    assert_eq!(stored.attrs.key(), "counter-1_attrs");

    let mut restored = runtime
        .get_active_object("objects", "counter-1")
        .expect("restore");
    assert_eq!(restored.type_name(), "Counter");
    assert!(restored.method_names().contains(&"increment".to_string()));

    let local = restored
        .call("increment", &[], &Kwargs::new())
        .expect("local call");
    assert_eq!(local, json!(42));

    let described = runtime
        .call(restored.as_mut(), &metadata, "describe", &[], &Kwargs::new())
        .expect("remote call");
    assert_eq!(described, json!("visits=42"));

    runtime
        .delete_active_object("objects", "counter-1")
        .expect("delete");
    let err = runtime
        .delete_active_object("objects", "counter-1")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

/// Test: A rewritten attribute blob restores with the new state
#[test]
fn test_rewritten_attributes_restore_new_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = Runtime::local(runtime_config(dir.path()), test_types().expect("types"))
        .expect("runtime");
    let metadata = MetadataX::new(MetadataInit::default().key("c").bucket_id("objects"))
        .expect("metadata");
    runtime
        .persistify(&Counter::new("x"), &metadata)
        .expect("persistify");

    let service = runtime.storage().service().clone();
    let original = service.get_metadata("objects", "c_attrs").expect("metadata");
    service
        .put("objects", "c_attrs", br#"{"count":9,"label":"x"}"#, &original.tags, 0)
        .expect("overwrite");

    let restored = runtime.get_active_object("objects", "c").expect("restore");
    assert_eq!(restored.attributes().expect("attributes")["count"], json!(9));
}
