//! Host engine abstraction
//!
//! The client never stores data itself. It delegates to a host engine that
//! provides versioned databases, named object stores, secondary indexes,
//! cursors and per-call transactions. Implementations exist for:
//!
//! - **Memory**: in-process engine for native use and tests (`MemoryEngine`)
//! - **IndexedDB**: browser storage via web-sys (`objstore-indexeddb`, WASM only)
//!
//! The traits are `?Send` because IndexedDB handles are bound to the browser's
//! single thread.

use async_trait::async_trait;
use futures::stream::LocalBoxStream;
use serde_json::Value;

use crate::error::StoreResult;
use crate::key::Key;
use crate::schema::StoreSpec;

mod memory;

pub use memory::{MemoryConnection, MemoryEngine};

/// A record yielded by a cursor.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: Key,
    pub value: Value,
}

/// Lazy, forward-only sequence of records in key order.
pub type RecordStream<'a> = LocalBoxStream<'a, StoreResult<Record>>;

/// Schema changes allowed while a version upgrade is in progress.
pub trait SchemaUpgrade {
    /// Version before the upgrade; `0` for a database that did not exist.
    fn old_version(&self) -> u32;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    fn has_store(&self, name: &str) -> bool;

    /// Create an object store together with its indexes.
    fn create_store(&mut self, spec: &StoreSpec) -> StoreResult<()>;
}

/// Callback run by [`Engine::open`] when the requested version is newer than
/// the stored one. An error aborts the upgrade and the open.
pub type UpgradeFn = Box<dyn FnMut(&mut dyn SchemaUpgrade) -> StoreResult<()>>;

/// Versioned database factory.
#[async_trait(?Send)]
pub trait Engine {
    type Connection: Connection;

    /// Open (or create) a database.
    ///
    /// - `version` lower than the stored version: `StoreError::Version`
    /// - same version: no upgrade
    /// - higher version: runs `upgrade` atomically before connecting
    async fn open(&self, name: &str, version: u32, upgrade: UpgradeFn)
        -> StoreResult<Self::Connection>;

    /// Delete a database and all its stores.
    async fn delete_database(&self, name: &str) -> StoreResult<()>;
}

/// An open database. Every call runs in its own transaction.
#[async_trait(?Send)]
pub trait Connection {
    fn name(&self) -> &str;

    fn version(&self) -> u32;

    /// Names of all object stores, sorted.
    fn store_names(&self) -> StoreResult<Vec<String>>;

    /// Names of the indexes on a store, sorted.
    async fn index_names(&self, store: &str) -> StoreResult<Vec<String>>;

    /// Insert a record. Fails with `StoreError::Constraint` if the key exists.
    /// Returns the effective key.
    async fn add(&self, store: &str, value: Value, key: Option<Key>) -> StoreResult<Key>;

    /// Point lookup by primary key.
    async fn get(&self, store: &str, key: &Key) -> StoreResult<Option<Value>>;

    /// First record (by primary key) whose index key equals `value`.
    async fn get_by_index(&self, store: &str, index: &str, value: &Key)
        -> StoreResult<Option<Value>>;

    /// Read-modify-write in one transaction. Returns the written record, or
    /// `None` without calling `update` if the key is absent. If `update`
    /// fails the transaction is aborted and its error returned.
    async fn update(
        &self,
        store: &str,
        key: &Key,
        update: &mut dyn for<'v> FnMut(&'v mut Value) -> StoreResult<()>,
    ) -> StoreResult<Option<Value>>;

    /// Remove a record. Returns `true` if it existed.
    async fn delete(&self, store: &str, key: &Key) -> StoreResult<bool>;

    async fn count(&self, store: &str) -> StoreResult<usize>;

    async fn clear(&self, store: &str) -> StoreResult<()>;

    /// Open a cursor over every record of a store.
    fn cursor(&self, store: &str) -> StoreResult<RecordStream<'_>>;

    fn close(&self);
}
