//! Error types for the IndexedDB engine

use objstore_core::StoreError;
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};

/// Result type for IndexedDB operations
pub type Result<T> = std::result::Result<T, IndexedDbError>;

/// Errors that can occur during IndexedDB operations
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// A `DOMException` raised by IndexedDB (`ConstraintError`, `DataError`, ...)
    #[error("IndexedDB {name}: {message}")]
    Dom { name: String, message: String },

    /// Transaction error without a DOM exception attached
    #[error("IndexedDB transaction error: {0}")]
    Transaction(String),

    /// Request error without a DOM exception attached
    #[error("IndexedDB request error: {0}")]
    Request(String),

    /// Value conversion between Rust and JS failed
    #[error("JS conversion error: {0}")]
    Conversion(String),
}

impl IndexedDbError {
    /// DOM exception name, if this error carries one.
    pub fn dom_name(&self) -> Option<&str> {
        match self {
            IndexedDbError::Dom { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl From<JsValue> for IndexedDbError {
    fn from(val: JsValue) -> Self {
        if let Some(exception) = val.dyn_ref::<web_sys::DomException>() {
            return IndexedDbError::Dom {
                name: exception.name(),
                message: exception.message(),
            };
        }
        let msg = js_sys::JSON::stringify(&val)
            .map(String::from)
            .unwrap_or_else(|_| format!("{:?}", val));
        IndexedDbError::Request(msg)
    }
}

impl From<serde_wasm_bindgen::Error> for IndexedDbError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        IndexedDbError::Conversion(err.to_string())
    }
}

/// Convert IndexedDbError to StoreError for the engine traits
impl From<IndexedDbError> for StoreError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::Dom { name, message } => match name.as_str() {
                "ConstraintError" => StoreError::Constraint(message),
                "DataError" | "DataCloneError" => StoreError::Data(message),
                "AbortError" | "TransactionInactiveError" => StoreError::Transaction(message),
                "InvalidStateError" => StoreError::Closed(message),
                _ => StoreError::Backend(format!("IndexedDB {}: {}", name, message)),
            },
            IndexedDbError::NotAvailable(msg) => {
                StoreError::Backend(format!("IndexedDB not available: {}", msg))
            }
            IndexedDbError::Transaction(msg) => StoreError::Transaction(msg),
            IndexedDbError::Request(msg) => {
                StoreError::Backend(format!("IndexedDB request: {}", msg))
            }
            IndexedDbError::Conversion(msg) => StoreError::Serialization(msg),
        }
    }
}
