//! Key and record conversion between Rust and JS
//!
//! Records cross the boundary as plain JS objects (not `Map`s) so that
//! IndexedDB key paths and indexes can see their properties.

use objstore_core::{Key, StoreError, StoreResult};
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::JsValue;

use crate::error::IndexedDbError;

/// Convert a key to a JS number or string.
pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Number(n) => JsValue::from_f64(*n),
        Key::String(s) => JsValue::from_str(s),
    }
}

/// Convert a JS key back. Dates, binary and array keys are not supported.
pub fn key_from_js(val: &JsValue) -> StoreResult<Key> {
    if let Some(n) = val.as_f64() {
        return Ok(Key::Number(n));
    }
    if let Some(s) = val.as_string() {
        return Ok(Key::String(s));
    }
    Err(StoreError::Data(format!("unsupported key type: {:?}", val)))
}

/// Convert a record to a plain JS value.
pub fn value_to_js(value: &Value) -> StoreResult<JsValue> {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|e| IndexedDbError::from(e).into())
}

/// Convert a JS value read from IndexedDB into a record.
pub fn value_from_js(val: JsValue) -> StoreResult<Value> {
    serde_wasm_bindgen::from_value(val).map_err(|e| IndexedDbError::from(e).into())
}
