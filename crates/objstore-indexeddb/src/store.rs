//! IndexedDB host engine implementing the objstore `Engine` and `Connection`
//! traits.
//!
//! Each call opens exactly one IDB transaction, awaits its requests and then
//! awaits the transaction's `complete` event, so a resolved future means the
//! write is committed.

use async_trait::async_trait;
use futures::StreamExt;
use objstore_core::schema::extract;
use objstore_core::{
    Connection, Engine, Key, RecordStream, StoreError, StoreResult, UpgradeFn,
};
use serde_json::Value;
use tracing::{debug, info};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{IdbDatabase, IdbObjectStore, IdbTransaction, IdbTransactionMode};

use crate::convert::{key_from_js, key_to_js, value_from_js, value_to_js};
use crate::cursor::CursorStream;
use crate::error::IndexedDbError;
use crate::idb;

/// IndexedDB engine for browser WASM.
///
/// Databases live in the origin's IndexedDB; the engine itself holds no
/// state.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedDbEngine;

impl IndexedDbEngine {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl Engine for IndexedDbEngine {
    type Connection = IndexedDbConnection;

    async fn open(
        &self,
        name: &str,
        version: u32,
        upgrade: UpgradeFn,
    ) -> StoreResult<IndexedDbConnection> {
        if name.is_empty() {
            return Err(StoreError::MissingParameter("name"));
        }
        if version == 0 {
            return Err(StoreError::MissingParameter("version"));
        }
        let db = idb::open_database(name, version, upgrade).await?;
        Ok(IndexedDbConnection::new(db, name))
    }

    async fn delete_database(&self, name: &str) -> StoreResult<()> {
        idb::delete_database(name).await.map_err(StoreError::from)
    }
}

/// Open IndexedDB database.
///
/// Closes itself when another context requests a version change, so the
/// other side's upgrade is not blocked; later calls fail with
/// `StoreError::Closed`.
pub struct IndexedDbConnection {
    db: IdbDatabase,
    name: String,
    _on_version_change: Closure<dyn FnMut(web_sys::IdbVersionChangeEvent)>,
}

impl IndexedDbConnection {
    fn new(db: IdbDatabase, name: &str) -> Self {
        let db_for_close = db.clone();
        let db_name = name.to_string();
        let on_version_change = Closure::wrap(Box::new(move |_event: web_sys::IdbVersionChangeEvent| {
            info!(database = %db_name, "IndexedDB version change requested elsewhere, closing");
            db_for_close.close();
        }) as Box<dyn FnMut(web_sys::IdbVersionChangeEvent)>);
        db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));

        Self {
            db,
            name: name.to_string(),
            _on_version_change: on_version_change,
        }
    }

    /// Get a reference to the underlying database handle
    pub fn database(&self) -> &IdbDatabase {
        &self.db
    }

    fn begin(
        &self,
        store: &str,
        mode: IdbTransactionMode,
    ) -> StoreResult<(IdbTransaction, IdbObjectStore)> {
        idb::begin_transaction(&self.db, store, mode).map_err(|err| store_error(store, err))
    }
}

/// Map errors raised while addressing a store, where `NotFoundError` means
/// the store does not exist.
fn store_error(store: &str, err: IndexedDbError) -> StoreError {
    match err.dom_name() {
        Some("NotFoundError") => StoreError::StoreNotFound(store.to_string()),
        _ => err.into(),
    }
}

fn js_error(err: JsValue) -> StoreError {
    IndexedDbError::from(err).into()
}

#[async_trait(?Send)]
impl Connection for IndexedDbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn store_names(&self) -> StoreResult<Vec<String>> {
        Ok(idb::dom_strings(&self.db.object_store_names()))
    }

    async fn index_names(&self, store: &str) -> StoreResult<Vec<String>> {
        let (_tx, object_store) = self.begin(store, IdbTransactionMode::Readonly)?;
        Ok(idb::dom_strings(&object_store.index_names()))
    }

    async fn add(&self, store: &str, value: Value, key: Option<Key>) -> StoreResult<Key> {
        let js_val = value_to_js(&value)?;
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readwrite)?;

        let req = match &key {
            Some(key) => object_store.add_with_key(&js_val, &key_to_js(key)),
            None => object_store.add(&js_val),
        }
        .map_err(js_error)?;

        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        let key = key_from_js(&result)?;
        debug!(store, %key, "IDB add");
        Ok(key)
    }

    async fn get(&self, store: &str, key: &Key) -> StoreResult<Option<Value>> {
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readonly)?;

        let req = object_store.get(&key_to_js(key)).map_err(js_error)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        if result.is_undefined() {
            return Ok(None);
        }
        value_from_js(result).map(Some)
    }

    async fn get_by_index(
        &self,
        store: &str,
        index: &str,
        value: &Key,
    ) -> StoreResult<Option<Value>> {
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readonly)?;

        let idx = object_store
            .index(index)
            .map_err(|_| StoreError::IndexNotFound {
                store: store.to_string(),
                index: index.to_string(),
            })?;
        let req = idx.get(&key_to_js(value)).map_err(js_error)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        if result.is_undefined() {
            return Ok(None);
        }
        value_from_js(result).map(Some)
    }

    async fn update(
        &self,
        store: &str,
        key: &Key,
        update: &mut dyn for<'v> FnMut(&'v mut Value) -> StoreResult<()>,
    ) -> StoreResult<Option<Value>> {
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readwrite)?;
        let key_js = key_to_js(key);

        let req = object_store.get(&key_js).map_err(js_error)?;
        let current = idb::await_request(&req).await?;
        if current.is_undefined() {
            idb::await_transaction(&tx).await?;
            return Ok(None);
        }

        let mut value = value_from_js(current)?;
        if let Err(err) = update(&mut value) {
            let _ = tx.abort();
            return Err(err);
        }

        // In-line keys must survive the update, otherwise put() would write
        // a second record under the new key
        let key_path = object_store.key_path().map_err(js_error)?.as_string();
        if let Some(path) = &key_path {
            let new_key = extract(&value, path).and_then(Key::from_value);
            if new_key.as_ref() != Some(key) {
                let _ = tx.abort();
                return Err(StoreError::Data(format!(
                    "update changed the in-line key at {:?}",
                    path
                )));
            }
        }

        let js_val = value_to_js(&value)?;
        let req = match key_path {
            Some(_) => object_store.put(&js_val),
            None => object_store.put_with_key(&js_val, &key_js),
        }
        .map_err(js_error)?;
        idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        Ok(Some(value))
    }

    async fn delete(&self, store: &str, key: &Key) -> StoreResult<bool> {
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readwrite)?;
        let key_js = key_to_js(key);

        let req = object_store.count_with_key(&key_js).map_err(js_error)?;
        let existed = idb::await_request(&req).await?.as_f64().unwrap_or(0.0) > 0.0;

        if existed {
            let req = object_store.delete(&key_js).map_err(js_error)?;
            idb::await_request(&req).await?;
        }
        idb::await_transaction(&tx).await?;

        Ok(existed)
    }

    async fn count(&self, store: &str) -> StoreResult<usize> {
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readonly)?;

        let req = object_store.count().map_err(js_error)?;
        let result = idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        Ok(result.as_f64().unwrap_or(0.0) as usize)
    }

    async fn clear(&self, store: &str) -> StoreResult<()> {
        let (tx, object_store) = self.begin(store, IdbTransactionMode::Readwrite)?;

        let req = object_store.clear().map_err(js_error)?;
        idb::await_request(&req).await?;
        idb::await_transaction(&tx).await?;

        Ok(())
    }

    fn cursor(&self, store: &str) -> StoreResult<RecordStream<'_>> {
        let (_tx, object_store) = self.begin(store, IdbTransactionMode::Readonly)?;
        let req = object_store.open_cursor().map_err(js_error)?;
        Ok(CursorStream::new(req).boxed_local())
    }

    fn close(&self) {
        self.db.set_onversionchange(None);
        self.db.close();
    }
}
