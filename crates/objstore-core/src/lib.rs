//! objstore core
//!
//! A thin client over an embedded, versioned key-value object store. The
//! client owns no data model and no persistence format: durability, indexing,
//! transactions and cursors belong to the host engine behind the
//! [`engine::Engine`] and [`engine::Connection`] traits.
//!
//! - [`StoreClient`] - open a database and run get/set/getAll/getByProperty/put/delete
//! - [`MemoryEngine`] - in-process host engine (native use and tests)
//! - [`DatabaseSchema`] - stores, key strategies and indexes, loadable from JSON
//!
//! # Example
//!
//! ```rust
//! use futures::executor::block_on;
//! use objstore_core::{IndexSpec, MemoryEngine, StoreClient, StoreSpec};
//! use serde_json::json;
//!
//! block_on(async {
//!     let engine = MemoryEngine::new();
//!     let spec = StoreSpec::new("people").index(IndexSpec::new("email").unique());
//!     let client = StoreClient::open_store(&engine, "app", 1, spec).await.unwrap();
//!
//!     let key = client
//!         .set("people", json!({"name": "Ada", "email": "ada@example.com"}), None)
//!         .await
//!         .unwrap();
//!
//!     let found = client
//!         .get_by_property("people", "email", "ada@example.com")
//!         .await
//!         .unwrap();
//!     assert_eq!(found, client.get("people", key).await.unwrap());
//! });
//! ```

pub mod client;
pub mod engine;
pub mod error;
pub mod key;
pub mod logging;
pub mod schema;

// Re-export main types at crate root
pub use client::{delete_database, StoreClient};
pub use engine::{
    Connection, Engine, MemoryConnection, MemoryEngine, Record, RecordStream, SchemaUpgrade,
    UpgradeFn,
};
pub use error::{StoreError, StoreResult};
pub use key::Key;
pub use schema::{DatabaseSchema, IndexSpec, StoreSpec};
