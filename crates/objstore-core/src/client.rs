//! StoreClient: the client-facing handle over a host engine connection
//!
//! Every operation is one transaction on the host engine. Failures are
//! returned as `StoreError` and logged; nothing panics.

use std::cell::Cell;
use std::rc::Rc;

use futures::StreamExt;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::engine::{Connection, Engine, Record, RecordStream, SchemaUpgrade, UpgradeFn};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::logging::prefix;
use crate::schema::{DatabaseSchema, StoreSpec};

/// Handle to an open database.
///
/// Replaces process-wide connection state: callers hold the handle and pass
/// it where storage is needed.
pub struct StoreClient<C> {
    conn: C,
    upgraded_from: Option<u32>,
}

impl<C: Connection> StoreClient<C> {
    /// Open a database, creating any store in `schema` that is missing.
    ///
    /// Stores are only created while the engine runs a version upgrade, so
    /// re-opening with the same version never touches the schema.
    pub async fn open<E>(engine: &E, schema: DatabaseSchema) -> StoreResult<Self>
    where
        E: Engine<Connection = C>,
    {
        if let Err(err) = schema.validate() {
            error!(error = %err, "{} cannot open database", prefix::DB);
            return Err(err);
        }

        let upgraded = Rc::new(Cell::new(None));
        let upgrade: UpgradeFn = {
            let upgraded = upgraded.clone();
            let stores = schema.stores.clone();
            Box::new(move |tx: &mut dyn SchemaUpgrade| -> StoreResult<()> {
                upgraded.set(Some(tx.old_version()));
                create_missing_stores(tx, &stores)
            })
        };

        let conn = engine
            .open(&schema.name, schema.version, upgrade)
            .await
            .map_err(|err| {
                error!(
                    database = %schema.name,
                    version = schema.version,
                    error = %err,
                    "{} failed to open database",
                    prefix::DB
                );
                err
            })?;

        info!(
            database = %schema.name,
            version = schema.version,
            "{} database open",
            prefix::OPEN
        );

        Ok(Self {
            conn,
            upgraded_from: upgraded.get(),
        })
    }

    /// Open a database with a single store.
    pub async fn open_store<E>(
        engine: &E,
        name: &str,
        version: u32,
        store: StoreSpec,
    ) -> StoreResult<Self>
    where
        E: Engine<Connection = C>,
    {
        Self::open(engine, DatabaseSchema::new(name, version).store(store)).await
    }

    pub fn name(&self) -> &str {
        self.conn.name()
    }

    pub fn version(&self) -> u32 {
        self.conn.version()
    }

    /// Version the database was upgraded from while opening this handle, or
    /// `None` if no upgrade ran.
    pub fn upgraded_from(&self) -> Option<u32> {
        self.upgraded_from
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn store_names(&self) -> StoreResult<Vec<String>> {
        self.conn.store_names()
    }

    pub async fn index_names(&self, store: &str) -> StoreResult<Vec<String>> {
        require("store", store)?;
        logged("index_names", store, self.conn.index_names(store).await)
    }

    /// Insert a new record. Never overwrites: an existing key fails with
    /// `StoreError::Constraint`. Returns the supplied or generated key.
    pub async fn set(&self, store: &str, record: Value, key: Option<Key>) -> StoreResult<Key> {
        require("store", store)?;
        let result = self.conn.add(store, record, key).await;
        if let Ok(key) = &result {
            debug!(store, %key, "{} set", prefix::STORE);
        }
        logged("set", store, result)
    }

    /// Serialize and insert a typed record.
    pub async fn set_as<T: Serialize>(
        &self,
        store: &str,
        record: &T,
        key: Option<Key>,
    ) -> StoreResult<Key> {
        let value = serde_json::to_value(record)?;
        self.set(store, value, key).await
    }

    /// Point lookup. `Ok(None)` if the key is absent.
    pub async fn get(&self, store: &str, key: impl Into<Key>) -> StoreResult<Option<Value>> {
        require("store", store)?;
        let key = key.into();
        logged("get", store, self.conn.get(store, &key).await)
    }

    /// Point lookup deserialized into `T`.
    pub async fn get_as<T: DeserializeOwned>(
        &self,
        store: &str,
        key: impl Into<Key>,
    ) -> StoreResult<Option<T>> {
        match self.get(store, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Cursor over every record of `store` in key order.
    ///
    /// Each call starts a fresh cursor; the stream ends when the store is
    /// exhausted.
    pub fn get_all(&self, store: &str) -> StoreResult<RecordStream<'_>> {
        require("store", store)?;
        logged("get_all", store, self.conn.cursor(store))
    }

    /// Drive a cursor over `store`, calling `on_each` once per record.
    /// Returns the number of records visited.
    pub async fn for_each(
        &self,
        store: &str,
        mut on_each: impl FnMut(Record),
    ) -> StoreResult<usize> {
        let mut cursor = self.get_all(store)?;
        let mut visited = 0;
        while let Some(record) = cursor.next().await {
            let record = logged("get_all", store, record)?;
            on_each(record);
            visited += 1;
        }
        debug!(store, visited, "{} cursor exhausted", prefix::STORE);
        Ok(visited)
    }

    /// Look up the first record whose `property` index equals `value`.
    ///
    /// The property must have an index on the store; otherwise this fails
    /// with `StoreError::IndexNotFound`.
    pub async fn get_by_property(
        &self,
        store: &str,
        property: &str,
        value: impl Into<Key>,
    ) -> StoreResult<Option<Value>> {
        require("store", store)?;
        require("property", property)?;
        let value = value.into();
        logged(
            "get_by_property",
            store,
            self.conn.get_by_index(store, property, &value).await,
        )
    }

    /// Read-modify-write: fetch the record at `key`, apply `update` once, and
    /// write the result back in the same transaction.
    ///
    /// Fails with `StoreError::NotFound` if there is no record at `key`.
    pub async fn put<F>(&self, store: &str, key: impl Into<Key>, update: F) -> StoreResult<Value>
    where
        F: FnOnce(&mut Value),
    {
        self.try_put(store, key, |value| {
            update(value);
            Ok(())
        })
        .await
    }

    /// Like [`put`](Self::put), but `update` may fail. A failed update aborts
    /// the transaction and nothing is written.
    pub async fn try_put<F>(&self, store: &str, key: impl Into<Key>, update: F) -> StoreResult<Value>
    where
        F: FnOnce(&mut Value) -> StoreResult<()>,
    {
        require("store", store)?;
        let key = key.into();
        let mut update = Some(update);
        let result = self
            .conn
            .update(store, &key, &mut |value: &mut Value| match update.take() {
                Some(update) => update(value),
                None => Ok(()),
            })
            .await
            .and_then(|written| written.ok_or_else(|| StoreError::NotFound(key.to_string())));
        if result.is_ok() {
            debug!(store, %key, "{} put", prefix::STORE);
        }
        logged("put", store, result)
    }

    /// Remove a record. Returns `true` if one was removed.
    pub async fn delete(&self, store: &str, key: impl Into<Key>) -> StoreResult<bool> {
        require("store", store)?;
        let key = key.into();
        let result = self.conn.delete(store, &key).await;
        if let Ok(removed) = result {
            debug!(store, %key, removed, "{} delete", prefix::STORE);
        }
        logged("delete", store, result)
    }

    pub async fn count(&self, store: &str) -> StoreResult<usize> {
        require("store", store)?;
        logged("count", store, self.conn.count(store).await)
    }

    /// Remove every record from a store.
    pub async fn clear(&self, store: &str) -> StoreResult<()> {
        require("store", store)?;
        logged("clear", store, self.conn.clear(store).await)
    }

    /// Close the connection. Later operations fail with `StoreError::Closed`.
    pub fn close(&self) {
        self.conn.close();
        info!(database = self.conn.name(), "{} database closed", prefix::CLOSE);
    }
}

/// Delete a database through `engine`.
pub async fn delete_database<E: Engine>(engine: &E, name: &str) -> StoreResult<()> {
    require("name", name)?;
    engine.delete_database(name).await.map_err(|err| {
        error!(database = name, error = %err, "{} failed to delete database", prefix::DB);
        err
    })?;
    info!(database = name, "{} database deleted", prefix::DB);
    Ok(())
}

fn create_missing_stores(tx: &mut dyn SchemaUpgrade, stores: &[StoreSpec]) -> StoreResult<()> {
    for spec in stores {
        if tx.has_store(&spec.name) {
            continue;
        }
        tx.create_store(spec)?;
        info!(
            store = %spec.name,
            indexes = spec.indexes.len(),
            from = tx.old_version(),
            to = tx.new_version(),
            "{} created object store",
            prefix::DB
        );
    }
    Ok(())
}

fn require(param: &'static str, value: &str) -> StoreResult<()> {
    if value.is_empty() {
        error!("{} missing required parameter: {}", prefix::DB, param);
        return Err(StoreError::MissingParameter(param));
    }
    Ok(())
}

/// Log a failed operation and pass the result through.
fn logged<T>(op: &'static str, store: &str, result: StoreResult<T>) -> StoreResult<T> {
    if let Err(err) = &result {
        match err {
            StoreError::Backend(_) | StoreError::Transaction(_) | StoreError::Closed(_) => {
                error!(op, store, error = %err, "{} operation failed", prefix::STORE)
            }
            _ => warn!(op, store, error = %err, "{} operation failed", prefix::STORE),
        }
    }
    result
}
