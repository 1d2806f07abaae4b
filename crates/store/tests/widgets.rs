#![forbid(unsafe_code)]

mod common;

use common::*;
use kstor_core::{DeleteOptions, ListOptions, Preconditions, RequestScope, StoreError};
use kstor_store::{Deleted, Store, StoreOptions};

fn cluster() -> RequestScope { RequestScope::cluster() }

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn label_selectors_and_bulk_delete_scenario() {
    let store = widget_store(memory());
    store.create(&cluster(), widget("a", &[("team", "x")])).await.unwrap();

    let x = store.list(&cluster(), &ListOptions::default().labels("team=x")).await.unwrap();
    assert_eq!(names(&x.items), vec!["a"]);
    let y = store.list(&cluster(), &ListOptions::default().labels("team=y")).await.unwrap();
    assert!(y.items.is_empty());

    let outcome = store.delete_collection(&cluster(), &ListOptions::default()).await.unwrap();
    assert_eq!(outcome.succeeded().count(), 1);
    assert_eq!(outcome.failed().count(), 0);
    let after = store.list(&cluster(), &ListOptions::default()).await.unwrap();
    assert!(after.items.is_empty());
}

#[tokio::test]
async fn create_then_get_round_trips_with_bookkeeping() {
    let store = widget_store(memory());
    let created = store.create(&cluster(), widget("a", &[("team", "x")])).await.unwrap();
    assert!(created.metadata.uid.is_some());
    assert!(created.metadata.creation_timestamp.is_some());
    assert_eq!(created.metadata.resource_version.as_deref(), Some("1"));
    assert_eq!(created.spec.color, "grey");

    let got = store.get(&cluster(), "a").await.unwrap();
    assert_eq!(got, created);
}

#[tokio::test]
async fn duplicate_create_is_already_exists() {
    let store = widget_store(memory());
    store.create(&cluster(), widget("a", &[])).await.unwrap();
    let err = store.create(&cluster(), widget("a", &[])).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { ref resource, ref name } if resource == "widgets.example.io" && name == "a"), "{}", err);
}

#[tokio::test]
async fn invalid_names_are_rejected_before_the_engine() {
    let store = widget_store(memory());
    for bad in ["", "..", "a/b", "50%"] {
        let err = store.create(&cluster(), widget(bad, &[])).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)), "{:?}: {}", bad, err);
    }
    assert!(matches!(store.get(&cluster(), "a/b").await, Err(StoreError::InvalidKey(_))));
}

#[tokio::test]
async fn validation_failures_abort_create_and_delete() {
    let store = widget_store(memory());
    let mut w = widget("ghost", &[]);
    w.spec.color = "invisible".into();
    let err = store.create(&cluster(), w).await.unwrap_err();
    match err {
        StoreError::ValidationFailed { errors, .. } => assert_eq!(errors[0].field, "spec.color"),
        other => panic!("unexpected {}", other),
    }
    assert!(store.get(&cluster(), "ghost").await.unwrap_err().is_not_found());

    store.create(&cluster(), widget("keep", &[("protected", "yes")])).await.unwrap();
    let err = store.delete(&cluster(), "keep", &DeleteOptions::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::ValidationFailed { .. }));
    assert!(store.get(&cluster(), "keep").await.is_ok());
}

#[tokio::test]
async fn stale_update_conflicts_and_is_not_retried() {
    let store = widget_store(memory());
    let v1 = store.create(&cluster(), widget("a", &[])).await.unwrap();

    let mut first = v1.clone();
    first.spec.color = "red".into();
    let v2 = store.update(&cluster(), "a", first).await.unwrap();
    assert_eq!(v2.metadata.resource_version.as_deref(), Some("2"));
    assert_eq!(v2.metadata.uid, v1.metadata.uid);
    assert_eq!(v2.metadata.creation_timestamp, v1.metadata.creation_timestamp);

    let mut stale = v1.clone();
    stale.spec.color = "blue".into();
    let err = store.update(&cluster(), "a", stale).await.unwrap_err();
    assert!(err.is_conflict(), "{}", err);
    assert_eq!(store.get(&cluster(), "a").await.unwrap().spec.color, "red");
}

#[tokio::test]
async fn update_without_version_uses_current_when_allowed() {
    let store = widget_store(memory());
    store.create(&cluster(), widget("a", &[])).await.unwrap();
    let mut w = widget("a", &[("team", "x")]);
    w.spec.color = "blue".into();
    let updated = store.update(&cluster(), "a", w).await.unwrap();
    assert_eq!(updated.metadata.resource_version.as_deref(), Some("2"));

    let strict = Store::new(WidgetStrategy::default(), store.storage().clone(), widget_options());
    let err = strict.update(&cluster(), "a", widget("a", &[])).await.unwrap_err();
    assert!(matches!(err, StoreError::ValidationFailed { .. }), "{}", err);
}

#[tokio::test]
async fn update_of_missing_object() {
    let store = widget_store(memory());
    assert!(store.update(&cluster(), "nope", widget("nope", &[])).await.unwrap_err().is_not_found());

    let upsert = Store::new(
        WidgetStrategy { create_on_update: true, unconditional_update: true },
        store.storage().clone(),
        widget_options(),
    );
    let created = upsert.update(&cluster(), "nope", widget("nope", &[])).await.unwrap();
    assert!(created.metadata.uid.is_some());
    assert!(store.get(&cluster(), "nope").await.is_ok());
}

#[tokio::test]
async fn update_rejects_name_mismatch() {
    let store = widget_store(memory());
    store.create(&cluster(), widget("a", &[])).await.unwrap();
    let err = store.update(&cluster(), "a", widget("b", &[])).await.unwrap_err();
    match err {
        StoreError::ValidationFailed { errors, .. } => assert_eq!(errors[0].field, "metadata.name"),
        other => panic!("unexpected {}", other),
    }
}

#[tokio::test]
async fn second_delete_is_not_found() {
    let store = widget_store(memory());
    store.create(&cluster(), widget("a", &[])).await.unwrap();
    let first = store.delete(&cluster(), "a", &DeleteOptions::default()).await.unwrap();
    assert_eq!(first, Deleted::Status { name: "a".into() });
    let err = store.delete(&cluster(), "a", &DeleteOptions::default()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "widgets.example.io \"a\" not found");
}

#[tokio::test]
async fn delete_can_return_the_removed_object() {
    let storage = memory();
    let store = Store::new(
        WidgetStrategy::default(),
        storage,
        StoreOptions::new(kstor_core::QualifiedResource::of::<Widget>(), "widgets").return_deleted_object(true),
    );
    let created = store.create(&cluster(), widget("a", &[("team", "x")])).await.unwrap();
    match store.delete(&cluster(), "a", &DeleteOptions::default()).await.unwrap() {
        Deleted::Object(w) => {
            assert_eq!(w.metadata.uid, created.metadata.uid);
            assert_eq!(w.metadata.labels, created.metadata.labels);
        }
        other => panic!("expected object, got {:?}", other),
    }
}

#[tokio::test]
async fn delete_preconditions_guard_uid_and_version() {
    let store = widget_store(memory());
    let created = store.create(&cluster(), widget("a", &[])).await.unwrap();

    let wrong_uid = DeleteOptions { preconditions: Some(Preconditions { uid: Some("other".into()), resource_version: None }) };
    assert!(store.delete(&cluster(), "a", &wrong_uid).await.unwrap_err().is_conflict());
    let wrong_rv = DeleteOptions { preconditions: Some(Preconditions { uid: None, resource_version: Some("99".into()) }) };
    assert!(store.delete(&cluster(), "a", &wrong_rv).await.unwrap_err().is_conflict());

    let exact = DeleteOptions {
        preconditions: Some(Preconditions { uid: created.metadata.uid.clone(), resource_version: created.metadata.resource_version.clone() }),
    };
    assert!(store.delete(&cluster(), "a", &exact).await.is_ok());
}

#[tokio::test]
async fn list_pages_with_continue_tokens() {
    let store = widget_store(memory());
    for n in ["a", "b", "c", "d", "e"] {
        store.create(&cluster(), widget(n, &[])).await.unwrap();
    }
    let mut seen = Vec::new();
    let mut opts = ListOptions::default().limit(2);
    loop {
        let page = store.list(&cluster(), &opts).await.unwrap();
        assert!(page.items.len() <= 2);
        seen.extend(names(&page.items));
        match page.continue_token {
            Some(t) => opts = ListOptions::default().limit(2).continue_from(t),
            None => break,
        }
    }
    assert_eq!(seen, vec!["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn field_selectors_cover_kind_fields_labels_and_single_name() {
    let store = widget_store(memory());
    let mut red = widget("r", &[("team", "x")]);
    red.spec.color = "red".into();
    store.create(&cluster(), red).await.unwrap();
    store.create(&cluster(), widget("g", &[("team", "y")])).await.unwrap();

    let by_color = store.list(&cluster(), &ListOptions::default().fields("spec.color=red")).await.unwrap();
    assert_eq!(names(&by_color.items), vec!["r"]);
    let by_label = store.list(&cluster(), &ListOptions::default().fields("metadata.labels.team=y")).await.unwrap();
    assert_eq!(names(&by_label.items), vec!["g"]);
    let not_red = store.list(&cluster(), &ListOptions::default().fields("spec.color!=red")).await.unwrap();
    assert_eq!(names(&not_red.items), vec!["g"]);

    let single = store.list(&cluster(), &ListOptions::default().fields("metadata.name=g")).await.unwrap();
    assert_eq!(names(&single.items), vec!["g"]);
    assert!(single.resource_version >= 2);
    let single_miss = store.list(&cluster(), &ListOptions::default().fields("metadata.name=g").labels("team=x")).await.unwrap();
    assert!(single_miss.items.is_empty());
    let absent = store.list(&cluster(), &ListOptions::default().fields("metadata.name=zzz")).await.unwrap();
    assert!(absent.items.is_empty());

    let bad = store.list(&cluster(), &ListOptions::default().labels("team in x")).await;
    assert!(matches!(bad, Err(StoreError::InvalidSelector(_))));
}

#[tokio::test]
async fn fv_get_reads_fields_and_tolerates_foreign_payloads() {
    let store = widget_store(memory());
    let raw = serde_json::json!({
        "metadata": { "name": "a", "labels": { "team": "x" } },
        "spec": { "color": "red" }
    });
    assert_eq!(store.fv_get("metadata.name", &raw).as_deref(), Some("a"));
    assert_eq!(store.fv_get("spec.color", &raw).as_deref(), Some("red"));
    assert_eq!(store.fv_get("metadata.labels.team", &raw).as_deref(), Some("x"));
    assert_eq!(store.fv_get("status.phase", &raw), None);
    assert_eq!(store.fv_get("metadata.name", &serde_json::json!({ "metadata": 7 })), None);
}

#[tokio::test]
async fn selectable_fields_are_total_and_include_labels() {
    use kstor_store::Strategy;
    let s = WidgetStrategy::default();
    let fields = s.selectable_fields(&Widget::default());
    assert_eq!(fields.get("metadata.name").map(String::as_str), Some(""));
    let fields = s.selectable_fields(&widget("a", &[("team", "x"), ("tier", "db")]));
    assert_eq!(fields.get("metadata.labels.team").map(String::as_str), Some("x"));
    assert_eq!(fields.get("metadata.labels.tier").map(String::as_str), Some("db"));
}
