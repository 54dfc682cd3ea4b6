use std::collections::BTreeMap;

use firestore_query_core::firestore::model::Timestamp;
use firestore_query_core::firestore::ErrorOrigin;
use firestore_query_core::firestore::remote::map_error_payload;
use firestore_query_core::firestore::value::FirestoreValue;
use serde_json::json;

#[test]
fn sentinels_serialize_to_tagged_objects() {
    assert_eq!(
        FirestoreValue::server_timestamp().to_json(),
        json!({ "__fieldValue__": "serverTimestamp" })
    );
    assert_eq!(
        FirestoreValue::numeric_increment(5).to_json(),
        json!({ "__fieldValue__": "increment", "value": 5 })
    );
    assert_eq!(
        FirestoreValue::array_union(vec!["a".into(), "b".into()]).to_json(),
        json!({ "__fieldValue__": "arrayUnion", "elements": ["a", "b"] })
    );
    assert_eq!(
        FirestoreValue::array_remove(vec![1.into()]).to_json(),
        json!({ "__fieldValue__": "arrayRemove", "elements": [1] })
    );
    assert_eq!(
        FirestoreValue::delete_field().to_json(),
        json!({ "__fieldValue__": "delete" })
    );
}

#[test]
fn documents_keep_declared_field_names() {
    let document = FirestoreValue::from(BTreeMap::from([
        ("displayName".to_string(), FirestoreValue::from("Ada")),
        ("joined".to_string(), FirestoreValue::from(Timestamp::new(0, 0))),
    ]));
    assert_eq!(
        document.to_json(),
        json!({ "displayName": "Ada", "joined": "1970-01-01T00:00:00Z" })
    );
}

#[test]
fn tagged_objects_are_write_only() {
    let err = FirestoreValue::from_json(json!({ "__fieldValue__": "delete" })).unwrap_err();
    assert_eq!(err.code_str(), "firestore/invalid-argument");
}

#[test]
fn backend_errors_keep_their_code() {
    let err = map_error_payload(r#"{"error":{"status":"PERMISSION_DENIED","message":"nope"}}"#);
    assert_eq!(err.code_str(), "firestore/permission-denied");
    assert_eq!(err.to_string(), "nope (firestore/permission-denied)");
}

#[test]
fn backend_rejections_are_told_apart_from_caller_faults() {
    let err = map_error_payload(
        r#"{"error":{"status":"FAILED_PRECONDITION","message":"The query requires an index"}}"#,
    );
    assert_eq!(err.code_str(), "firestore/failed-precondition");
    assert_eq!(err.origin(), ErrorOrigin::Backend);
    assert!(!err.is_caller_error());

    let err = map_error_payload(r#"{"error":{"status":"CANCELLED","message":"gone"}}"#);
    assert!(!err.is_cancelled());
}
