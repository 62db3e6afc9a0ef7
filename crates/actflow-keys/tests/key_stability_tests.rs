//! Integration tests for key stability
//!
//! Keys built from the same logical input must not depend on map insertion
//! order, and every rejected input carries a stable invalid-argument code.

use std::collections::{BTreeMap, HashMap};

use actflow_core::aferror::{get_af_error, ErrorKind};
use actflow_core::InvalidArgumentCode;
use actflow_keys::{
    make_idempotency_key, stable_hash, stable_stringify, IdempotencyKeyOptions, KeyFactory,
    ResourceSpec,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

proptest! {
    #[test]
    fn prop_insertion_order_does_not_change_key(
        entries in prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..12)
    ) {
        let forward: Map<String, Value> = entries
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        let reversed: HashMap<String, i64> = entries
            .iter()
            .rev()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        let options = IdempotencyKeyOptions::new().with_namespace("orders");
        let a = make_idempotency_key(&[Value::Object(forward)], &options).unwrap();
        let b = make_idempotency_key(&[reversed], &options).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_stable_hash_is_forty_hex(text in ".*", n in any::<u64>()) {
        let hash = stable_hash(&(text, n)).unwrap();
        prop_assert_eq!(hash.len(), 40);
        prop_assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}

#[test]
fn test_struct_and_map_with_same_fields_stringify_alike() {
    #[derive(serde::Serialize)]
    struct Draft {
        title: &'static str,
        tags: Vec<&'static str>,
    }

    let map = BTreeMap::from([("tags", json!(["a", "b"])), ("title", json!("hello"))]);
    assert_eq!(
        stable_stringify(&Draft {
            title: "hello",
            tags: vec!["a", "b"],
        })
        .unwrap(),
        stable_stringify(&map).unwrap()
    );
}

#[test]
fn test_key_errors_classify_as_internal_with_code() {
    let keys = KeyFactory::new().with_resource("post", ResourceSpec::new("post").with_params(["id"]));

    let err = keys.tag("post", &json!({})).unwrap_err();
    assert_eq!(err.invalid_argument_code(), Some(InvalidArgumentCode::KeyMissingParam));

    let af = get_af_error(&err);
    assert_eq!(af.kind(), ErrorKind::Internal);
    assert_eq!(af.code(), Some("KEY_MISSING_PARAM"));
    assert!(!af.is_retryable());
}

#[test]
fn test_registry_key_from_factory_and_idempotency_key() {
    let keys = KeyFactory::from_value(json!({
        "comment": { "key": "comment", "params": ["postId", "page"] }
    }))
    .unwrap();

    let tag = keys.tag("comment", &json!({ "page": 2, "postId": "p-9" })).unwrap();
    assert_eq!(tag, "comment:p-9:2");

    let idem = make_idempotency_key(
        &(tag.as_str(), json!({ "body": "hi" })),
        &IdempotencyKeyOptions::new(),
    )
    .unwrap();
    let again = make_idempotency_key(
        &(tag.as_str(), json!({ "body": "hi" })),
        &IdempotencyKeyOptions::new(),
    )
    .unwrap();
    assert_eq!(idem, again);
}
