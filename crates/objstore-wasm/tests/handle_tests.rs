//! Browser tests for the callback API
//!
//! Run with `wasm-pack test --headless --firefox crates/objstore-wasm`.

#![cfg(target_arch = "wasm32")]

use futures::channel::mpsc;
use futures::StreamExt;
use js_sys::{Function, Reflect, JSON};
use objstore_indexeddb::IndexedDbEngine;
use objstore_wasm::StoreHandle;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

/// JS callback that forwards its argument into a channel
fn callback() -> (Function, mpsc::UnboundedReceiver<JsValue>) {
    let (sender, receiver) = mpsc::unbounded();
    let closure = Closure::<dyn FnMut(JsValue)>::new(move |value: JsValue| {
        let _ = sender.unbounded_send(value);
    });
    (closure.into_js_value().unchecked_into(), receiver)
}

/// JS callback taking `(value, key)`
fn callback2() -> (Function, mpsc::UnboundedReceiver<(JsValue, JsValue)>) {
    let (sender, receiver) = mpsc::unbounded();
    let closure = Closure::<dyn FnMut(JsValue, JsValue)>::new(move |value: JsValue, key: JsValue| {
        let _ = sender.unbounded_send((value, key));
    });
    (closure.into_js_value().unchecked_into(), receiver)
}

/// Let pending event-loop work run
async fn settle() {
    let promise = js_sys::Promise::new(&mut |resolve, _reject| {
        let set_timeout: Function = Reflect::get(&js_sys::global(), &"setTimeout".into())
            .unwrap()
            .unchecked_into();
        set_timeout
            .call2(&JsValue::NULL, &resolve, &JsValue::from(50))
            .unwrap();
    });
    JsFuture::from(promise).await.unwrap();
}

fn field(value: &JsValue, name: &str) -> JsValue {
    Reflect::get(value, &name.into()).unwrap()
}

fn error_message(value: JsValue) -> String {
    value.unchecked_into::<js_sys::Error>().message().into()
}

/// Open a fresh database with a people store and a unique email index
async fn open_fresh(db_name: &str) -> StoreHandle {
    objstore_core::delete_database(&IndexedDbEngine, db_name)
        .await
        .unwrap();

    let handle = StoreHandle::new();
    let indexes = JSON::parse(r#"[{"name": "email", "constraint": {"unique": true}}]"#).unwrap();
    let (ready, mut ready_rx) = callback();
    let (on_error, _) = callback();
    handle.open(
        Some(db_name.to_string()),
        Some(1),
        Some("people".to_string()),
        None,
        indexes,
        Some(ready),
        Some(on_error),
    );
    ready_rx.next().await.unwrap();
    handle
}

async fn set(handle: &StoreHandle, record: &str, key: JsValue) -> JsValue {
    let (done, mut done_rx) = callback();
    handle.set(
        "people".to_string(),
        JSON::parse(record).unwrap(),
        key,
        Some(done),
        None,
    );
    done_rx.next().await.unwrap()
}

#[wasm_bindgen_test]
async fn test_open_missing_parameters_calls_nothing() {
    let handle = StoreHandle::new();
    let (ready, mut ready_rx) = callback();
    let (on_error, mut error_rx) = callback();

    handle.open(
        None,
        Some(1),
        Some("people".to_string()),
        None,
        JsValue::UNDEFINED,
        Some(ready.clone()),
        Some(on_error.clone()),
    );
    handle.open(
        Some("objstore-handle-missing".to_string()),
        Some(0),
        Some("people".to_string()),
        None,
        JsValue::UNDEFINED,
        Some(ready),
        Some(on_error),
    );
    settle().await;

    assert!(ready_rx.try_next().is_err());
    assert!(error_rx.try_next().is_err());
}

#[wasm_bindgen_test]
async fn test_calls_before_open_report_closed() {
    let handle = StoreHandle::new();
    let (found, mut found_rx) = callback();
    let (on_error, mut error_rx) = callback();

    handle.get(
        "people".to_string(),
        JsValue::from(1),
        Some(found),
        Some(on_error),
    );

    let err = error_rx.next().await.unwrap();
    assert!(error_message(err).contains("call open() first"));
    assert!(found_rx.try_next().is_err());
}

#[wasm_bindgen_test]
async fn test_get_all_passes_value_then_key() {
    let handle = open_fresh("objstore-handle-get-all").await;
    set(&handle, r#"{"name": "b"}"#, JsValue::from(2)).await;
    set(&handle, r#"{"name": "a"}"#, JsValue::from(1)).await;

    let (on_each, each_rx) = callback2();
    handle.get_all("people".to_string(), on_each, None);
    let seen: Vec<(JsValue, JsValue)> = each_rx.take(2).collect().await;

    let names: Vec<String> = seen
        .iter()
        .map(|(value, _)| field(value, "name").as_string().unwrap())
        .collect();
    let keys: Vec<f64> = seen.iter().map(|(_, key)| key.as_f64().unwrap()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(keys, vec![1.0, 2.0]);
    handle.close();
}

#[wasm_bindgen_test]
async fn test_put_in_place_and_returned() {
    let handle = open_fresh("objstore-handle-put").await;
    let key = set(&handle, r#"{"visits": 0}"#, JsValue::UNDEFINED).await;

    // Mutating the argument and returning nothing
    let (updated, mut updated_rx) = callback();
    handle.put(
        "people".to_string(),
        key.clone(),
        Function::new_with_args("r", "r.visits = r.visits + 1;"),
        Some(updated),
        None,
    );
    let record = updated_rx.next().await.unwrap();
    assert_eq!(field(&record, "visits").as_f64(), Some(1.0));

    // Returning a replacement record
    let (updated, mut updated_rx) = callback();
    handle.put(
        "people".to_string(),
        key.clone(),
        Function::new_with_args("r", "return { visits: 10, replaced: true };"),
        Some(updated),
        None,
    );
    let record = updated_rx.next().await.unwrap();
    assert_eq!(field(&record, "visits").as_f64(), Some(10.0));
    assert_eq!(field(&record, "replaced").as_bool(), Some(true));

    let (found, mut found_rx) = callback();
    handle.get("people".to_string(), key, Some(found), None);
    let stored = found_rx.next().await.unwrap();
    assert_eq!(field(&stored, "visits").as_f64(), Some(10.0));
    handle.close();
}

#[wasm_bindgen_test]
async fn test_put_throwing_update_writes_nothing() {
    let handle = open_fresh("objstore-handle-put-throws").await;
    let key = set(&handle, r#"{"visits": 0}"#, JsValue::UNDEFINED).await;

    let (updated, mut updated_rx) = callback();
    let (on_error, mut error_rx) = callback();
    handle.put(
        "people".to_string(),
        key.clone(),
        Function::new_with_args("r", "r.visits = 99; throw new Error('nope');"),
        Some(updated),
        Some(on_error),
    );
    let err = error_rx.next().await.unwrap();
    assert!(error_message(err).contains("update function threw"));
    assert!(updated_rx.try_next().is_err());

    let (found, mut found_rx) = callback();
    handle.get("people".to_string(), key, Some(found), None);
    let stored = found_rx.next().await.unwrap();
    assert_eq!(field(&stored, "visits").as_f64(), Some(0.0));
    handle.close();
}
