//! Browser WASM bindings using wasm-bindgen and IndexedDB storage
//!
//! Exposes the callback-style object store API to JavaScript:
//!
//! ```js
//! import init, { StoreHandle, initLogging, isSupported } from "objstore-wasm";
//!
//! await init();
//! initLogging();
//! const db = new StoreHandle();
//! db.open("app", 1, "people", null, [{ name: "email", unique: true }], () => {
//!     db.set("people", { name: "Ada", email: "ada@x" }, undefined, (key) => {
//!         db.get("people", key, (person) => console.log(person));
//!     });
//! });
//! ```
//!
//! Every call schedules one transaction and returns immediately; results
//! arrive through the callbacks. Errors go to the optional `onError`
//! callback, or are only logged when none is given. Nothing throws.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Function;
use objstore_core::{IndexSpec, Key, StoreClient, StoreError, StoreResult, StoreSpec};
use objstore_indexeddb::convert::{key_from_js, key_to_js, value_from_js, value_to_js};
use objstore_indexeddb::{IndexedDbConnection, IndexedDbEngine};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

type Client = StoreClient<IndexedDbConnection>;

/// Route tracing events to the browser console and panics to console.error.
#[wasm_bindgen(js_name = initLogging)]
pub fn init_logging() {
    console_error_panic_hook::set_once();
    let _ = tracing_wasm::try_set_as_global_default();
}

/// Whether this environment provides IndexedDB.
#[wasm_bindgen(js_name = isSupported)]
pub fn is_supported() -> bool {
    objstore_indexeddb::is_supported()
}

/// Index description accepted from JS.
///
/// Accepts both `{ name, unique, multiEntry, keyPath }` and the older
/// `{ name, constraint: { unique } }` shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsIndex {
    name: String,
    #[serde(default)]
    key_path: Option<String>,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    multi_entry: bool,
    #[serde(default)]
    constraint: Option<JsConstraint>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsConstraint {
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    multi_entry: bool,
}

impl From<JsIndex> for IndexSpec {
    fn from(index: JsIndex) -> Self {
        let constraint = index.constraint.unwrap_or_default();
        IndexSpec {
            name: index.name,
            key_path: index.key_path,
            unique: index.unique || constraint.unique,
            multi_entry: index.multi_entry || constraint.multi_entry,
        }
    }
}

fn parse_indexes(indexes: JsValue) -> StoreResult<Vec<IndexSpec>> {
    if indexes.is_undefined() || indexes.is_null() {
        return Ok(Vec::new());
    }
    let parsed: Vec<JsIndex> = serde_wasm_bindgen::from_value(indexes)
        .map_err(|e| StoreError::Serialization(format!("indexes: {}", e)))?;
    Ok(parsed.into_iter().map(IndexSpec::from).collect())
}

fn optional_key(key: &JsValue) -> StoreResult<Option<Key>> {
    if key.is_undefined() || key.is_null() {
        return Ok(None);
    }
    key_from_js(key).map(Some)
}

/// Deliver an error to the caller's callback, or log it.
fn report(on_error: Option<&Function>, err: &StoreError) {
    match on_error {
        Some(callback) => {
            let js_err = js_sys::Error::new(&err.to_string());
            let _ = callback.call1(&JsValue::NULL, &js_err);
        }
        None => error!(error = %err, "objstore operation failed"),
    }
}

fn call1(callback: Option<&Function>, arg: &JsValue) {
    if let Some(callback) = callback {
        if let Err(err) = callback.call1(&JsValue::NULL, arg) {
            error!(?err, "objstore callback threw");
        }
    }
}

/// Handle to one open database.
///
/// Each handle owns its own connection; there is no global state.
#[wasm_bindgen]
#[derive(Default)]
pub struct StoreHandle {
    client: Rc<RefCell<Option<Rc<Client>>>>,
}

#[wasm_bindgen]
impl StoreHandle {
    #[wasm_bindgen(constructor)]
    pub fn new() -> StoreHandle {
        Self::default()
    }

    /// Open `dbName` at `version`, creating `store` and its indexes during
    /// the upgrade if they are missing. Calls `onReady()` once connected.
    ///
    /// Missing `dbName`, `version` or `store` is logged and nothing happens.
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        &self,
        db_name: Option<String>,
        version: Option<u32>,
        store: Option<String>,
        key_path: Option<String>,
        indexes: JsValue,
        on_ready: Option<Function>,
        on_error: Option<Function>,
    ) {
        let db_name = db_name.filter(|s| !s.is_empty());
        let version = version.filter(|v| *v > 0);
        let store = store.filter(|s| !s.is_empty());
        let (Some(db_name), Some(version), Some(store)) = (db_name, version, store) else {
            error!("Please specify dbName, version, store: usage open(dbName, version, store)");
            return;
        };

        let indexes = match parse_indexes(indexes) {
            Ok(indexes) => indexes,
            Err(err) => return report(on_error.as_ref(), &err),
        };
        let mut spec = StoreSpec::new(store);
        spec.key_path = key_path.filter(|p| !p.is_empty());
        spec.indexes = indexes;

        let slot = self.client.clone();
        spawn_local(async move {
            match StoreClient::open_store(&IndexedDbEngine, &db_name, version, spec).await {
                Ok(client) => {
                    if let Some(previous) = slot.borrow_mut().replace(Rc::new(client)) {
                        previous.close();
                    }
                    if let Some(callback) = on_ready {
                        if let Err(err) = callback.call0(&JsValue::NULL) {
                            error!(?err, "objstore onReady threw");
                        }
                    }
                }
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Insert `record`; never overwrites. Calls `onDone(key)`.
    pub fn set(
        &self,
        store: String,
        record: JsValue,
        key: JsValue,
        on_done: Option<Function>,
        on_error: Option<Function>,
    ) {
        let Some(client) = self.connected(on_error.as_ref()) else {
            return;
        };
        let prepared = value_from_js(record).and_then(|record| Ok((record, optional_key(&key)?)));
        let (record, key) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => return report(on_error.as_ref(), &err),
        };

        spawn_local(async move {
            match client.set(&store, record, key).await {
                Ok(key) => call1(on_done.as_ref(), &key_to_js(&key)),
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Point lookup. Calls `onFound(record)`, with `undefined` if absent.
    pub fn get(
        &self,
        store: String,
        key: JsValue,
        on_found: Option<Function>,
        on_error: Option<Function>,
    ) {
        let Some(client) = self.connected(on_error.as_ref()) else {
            return;
        };
        let key = match key_from_js(&key) {
            Ok(key) => key,
            Err(err) => return report(on_error.as_ref(), &err),
        };

        spawn_local(async move {
            match client.get(&store, key).await {
                Ok(found) => deliver(found, on_found.as_ref(), on_error.as_ref()),
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Cursor over all records in key order. Calls `onEach(record, key)` once
    /// per record.
    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self, store: String, on_each: Function, on_error: Option<Function>) {
        let Some(client) = self.connected(on_error.as_ref()) else {
            return;
        };

        spawn_local(async move {
            let visited = client
                .for_each(&store, |record| match value_to_js(&record.value) {
                    Ok(value) => {
                        if let Err(err) = on_each.call2(&JsValue::NULL, &value, &key_to_js(&record.key)) {
                            error!(?err, "objstore onEach threw");
                        }
                    }
                    Err(err) => report(on_error.as_ref(), &err),
                })
                .await;
            match visited {
                Ok(visited) => debug!(store = %store, visited, "getAll done"),
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Look up the first record whose `property` index equals `value`.
    /// Calls `onFound(record)`, with `undefined` if none matches.
    #[wasm_bindgen(js_name = getByProperty)]
    pub fn get_by_property(
        &self,
        store: String,
        property: String,
        value: JsValue,
        on_found: Option<Function>,
        on_error: Option<Function>,
    ) {
        let Some(client) = self.connected(on_error.as_ref()) else {
            return;
        };
        let value = match key_from_js(&value) {
            Ok(value) => value,
            Err(err) => return report(on_error.as_ref(), &err),
        };

        spawn_local(async move {
            match client.get_by_property(&store, &property, value).await {
                Ok(found) => deliver(found, on_found.as_ref(), on_error.as_ref()),
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Read-modify-write. `updateFn(record)` may mutate the record in place
    /// or return a replacement. Calls `onUpdated(record)` after the write.
    /// If `updateFn` throws, nothing is written and `onError` is called.
    pub fn put(
        &self,
        store: String,
        key: JsValue,
        update_fn: Function,
        on_updated: Option<Function>,
        on_error: Option<Function>,
    ) {
        let Some(client) = self.connected(on_error.as_ref()) else {
            return;
        };
        let key = match key_from_js(&key) {
            Ok(key) => key,
            Err(err) => return report(on_error.as_ref(), &err),
        };

        spawn_local(async move {
            let result = client
                .try_put(&store, key, |record| {
                    *record = apply_js_update(&update_fn, record)?;
                    Ok(())
                })
                .await;
            match result {
                Ok(written) => deliver(Some(written), on_updated.as_ref(), on_error.as_ref()),
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Remove a record. Calls `onDeleted(removed)` with whether it existed.
    pub fn delete(
        &self,
        store: String,
        key: JsValue,
        on_deleted: Option<Function>,
        on_error: Option<Function>,
    ) {
        let Some(client) = self.connected(on_error.as_ref()) else {
            return;
        };
        let key = match key_from_js(&key) {
            Ok(key) => key,
            Err(err) => return report(on_error.as_ref(), &err),
        };

        spawn_local(async move {
            match client.delete(&store, key).await {
                Ok(removed) => call1(on_deleted.as_ref(), &JsValue::from_bool(removed)),
                Err(err) => report(on_error.as_ref(), &err),
            }
        });
    }

    /// Close the connection. The handle can be opened again.
    pub fn close(&self) {
        if let Some(client) = self.client.borrow_mut().take() {
            client.close();
        }
    }

    fn connected(&self, on_error: Option<&Function>) -> Option<Rc<Client>> {
        let client = self.client.borrow().clone();
        if client.is_none() {
            report(
                on_error,
                &StoreError::Closed("database not open; call open() first".into()),
            );
        }
        client
    }
}

/// Pass a record (or `undefined`) to a callback.
fn deliver(found: Option<Value>, callback: Option<&Function>, on_error: Option<&Function>) {
    match found.as_ref().map(value_to_js).transpose() {
        Ok(value) => call1(callback, &value.unwrap_or(JsValue::UNDEFINED)),
        Err(err) => report(on_error, &err),
    }
}

/// Run a JS update function against a record.
fn apply_js_update(update_fn: &Function, record: &Value) -> StoreResult<Value> {
    let js_record = value_to_js(record)?;
    let returned = update_fn
        .call1(&JsValue::NULL, &js_record)
        .map_err(|e| StoreError::Data(format!("update function threw: {:?}", e)))?;
    let updated = if returned.is_undefined() {
        js_record
    } else {
        returned
    };
    value_from_js(updated)
}
