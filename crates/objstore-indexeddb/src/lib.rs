//! IndexedDB host engine for objstore (browser WASM)
//!
//! This crate implements the `objstore-core` engine traits on top of the
//! browser's IndexedDB, so a `StoreClient` runs unchanged in the browser.
//!
//! IndexedDB already provides everything the client needs: versioned
//! databases with `upgradeneeded`, object stores with key paths and key
//! generators, unique and multiEntry indexes, and cursors. This crate only
//! wires its callbacks into Rust futures and maps its `DOMException`s onto
//! `StoreError`.
//!
//! # Example
//!
//! ```rust,ignore
//! use objstore_core::{IndexSpec, StoreClient, StoreSpec};
//! use objstore_indexeddb::IndexedDbEngine;
//! use serde_json::json;
//!
//! let spec = StoreSpec::new("notes").index(IndexSpec::new("title"));
//! let client = StoreClient::open_store(&IndexedDbEngine, "app", 1, spec).await?;
//!
//! let key = client.set("notes", json!({"title": "hello"}), None).await?;
//! let note = client.get("notes", key).await?;
//! assert!(note.is_some());
//! ```

pub mod convert;
pub mod cursor;
pub mod error;
pub mod idb;
pub mod store;

pub use error::{IndexedDbError, Result};
pub use idb::is_supported;
pub use store::{IndexedDbConnection, IndexedDbEngine};
