//! Database schema: stores, key strategies and indexes
//!
//! A [`DatabaseSchema`] is the configuration a [`crate::StoreClient`] opens
//! with. It is plain serde data, so it can be written by hand or loaded from
//! JSON:
//!
//! ```rust
//! use objstore_core::DatabaseSchema;
//!
//! let schema = DatabaseSchema::from_json(r#"{
//!     "name": "notes",
//!     "version": 2,
//!     "stores": [
//!         { "name": "notes", "keyPath": "id", "autoIncrement": true,
//!           "indexes": [ { "name": "title", "unique": true },
//!                        { "name": "tags", "multiEntry": true } ] }
//!     ]
//! }"#).unwrap();
//! assert_eq!(schema.stores[0].indexes.len(), 2);
//! ```
//!
//! Key paths are dotted property paths (`"author.name"`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::key::Key;

/// Secondary index over one record field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    pub name: String,
    /// Property path; defaults to the index name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexSpec {
    /// Non-unique index over the property of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            unique: false,
            multi_entry: false,
        }
    }

    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }

    /// Effective key path of the index.
    pub fn path(&self) -> &str {
        self.key_path.as_deref().unwrap_or(&self.name)
    }

    /// Keys this index holds for `value`.
    ///
    /// Values that are not valid keys are not indexed. With `multi_entry`,
    /// each distinct element of an array gets its own entry.
    pub fn keys_for(&self, value: &Value) -> Vec<Key> {
        match extract(value, self.path()) {
            Some(Value::Array(items)) if self.multi_entry => {
                let mut keys: Vec<Key> = items.iter().filter_map(Key::from_value).collect();
                keys.sort();
                keys.dedup();
                keys
            }
            Some(v) => Key::from_value(v).into_iter().collect(),
            None => Vec::new(),
        }
    }
}

/// One object store and its key strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    pub name: String,
    /// In-line key path. `None` means keys are supplied per call or generated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default = "default_auto_increment")]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSpec>,
}

fn default_auto_increment() -> bool {
    true
}

impl StoreSpec {
    /// Store with out-of-line keys and a key generator.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_path: None,
            auto_increment: true,
            indexes: Vec::new(),
        }
    }

    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    pub fn auto_increment(mut self, enabled: bool) -> Self {
        self.auto_increment = enabled;
        self
    }

    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    /// Look up an index by name.
    pub fn find_index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Check names and key paths.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.is_empty() {
            return Err(StoreError::MissingParameter("store"));
        }
        if let Some(path) = &self.key_path {
            validate_path(path)?;
        }
        for (i, index) in self.indexes.iter().enumerate() {
            if index.name.is_empty() {
                return Err(StoreError::MissingParameter("index name"));
            }
            validate_path(index.path())?;
            if self.indexes[..i].iter().any(|other| other.name == index.name) {
                return Err(StoreError::Constraint(format!(
                    "duplicate index '{}' on store '{}'",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }
}

/// Named, versioned database with its stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSchema {
    pub name: String,
    pub version: u32,
    #[serde(default)]
    pub stores: Vec<StoreSpec>,
}

impl DatabaseSchema {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            stores: Vec::new(),
        }
    }

    pub fn store(mut self, store: StoreSpec) -> Self {
        self.stores.push(store);
        self
    }

    /// Parse a schema from JSON and validate it.
    pub fn from_json(json: &str) -> StoreResult<Self> {
        let schema: DatabaseSchema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Check the database name, version and every store.
    pub fn validate(&self) -> StoreResult<()> {
        if self.name.is_empty() {
            return Err(StoreError::MissingParameter("name"));
        }
        if self.version == 0 {
            return Err(StoreError::MissingParameter("version"));
        }
        for (i, store) in self.stores.iter().enumerate() {
            store.validate()?;
            if self.stores[..i].iter().any(|other| other.name == store.name) {
                return Err(StoreError::Constraint(format!(
                    "duplicate store '{}'",
                    store.name
                )));
            }
        }
        Ok(())
    }
}

fn validate_path(path: &str) -> StoreResult<()> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(StoreError::Data(format!("invalid key path: {:?}", path)));
    }
    Ok(())
}

/// Resolve a dotted key path inside a record.
pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Write `key` into a record at a dotted key path, creating intermediate
/// objects as needed.
pub fn inject(value: &mut Value, path: &str, key: &Key) -> StoreResult<()> {
    let mut segments = path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            StoreError::Data(format!("cannot inject key at {:?}: not an object", path))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_value());
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_extract_nested() {
        let record = json!({"author": {"name": "ada"}, "id": 1});
        assert_eq!(extract(&record, "author.name"), Some(&json!("ada")));
        assert_eq!(extract(&record, "id"), Some(&json!(1)));
        assert_eq!(extract(&record, "author.email"), None);
        assert_eq!(extract(&record, "id.x"), None);
    }

    #[test]
    fn test_inject_creates_parents() {
        let mut record = json!({"title": "t"});
        inject(&mut record, "meta.id", &Key::from(5)).unwrap();
        assert_eq!(record, json!({"title": "t", "meta": {"id": 5}}));
    }

    #[test]
    fn test_inject_into_scalar_fails() {
        let mut record = json!("plain");
        let result = inject(&mut record, "id", &Key::from(1));
        assert!(matches!(result, Err(StoreError::Data(_))));
    }

    #[test]
    fn test_multi_entry_keys() {
        let index = IndexSpec::new("tags").multi_entry();
        let record = json!({"tags": ["b", "a", "b", null]});
        assert_eq!(index.keys_for(&record), vec![Key::from("a"), Key::from("b")]);

        let plain = IndexSpec::new("tags");
        assert!(plain.keys_for(&record).is_empty());
    }

    #[test]
    fn test_schema_from_json_defaults() {
        let schema = DatabaseSchema::from_json(
            r#"{"name": "db", "version": 1, "stores": [{"name": "items", "indexes": [{"name": "sku", "unique": true}]}]}"#,
        )
        .unwrap();
        let store = &schema.stores[0];
        assert!(store.auto_increment);
        assert_eq!(store.key_path, None);
        assert_eq!(store.indexes[0].path(), "sku");
        assert!(store.indexes[0].unique);
        assert!(!store.indexes[0].multi_entry);
    }

    #[test]
    fn test_validate_rejects_missing_parameters() {
        assert_eq!(
            DatabaseSchema::new("", 1).validate(),
            Err(StoreError::MissingParameter("name"))
        );
        assert_eq!(
            DatabaseSchema::new("db", 0).validate(),
            Err(StoreError::MissingParameter("version"))
        );
        assert_eq!(
            DatabaseSchema::new("db", 1).store(StoreSpec::new("")).validate(),
            Err(StoreError::MissingParameter("store"))
        );
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let schema = DatabaseSchema::new("db", 1)
            .store(StoreSpec::new("a").index(IndexSpec::new("x")).index(IndexSpec::new("x")));
        assert!(matches!(schema.validate(), Err(StoreError::Constraint(_))));

        let schema = DatabaseSchema::new("db", 1)
            .store(StoreSpec::new("a"))
            .store(StoreSpec::new("a"));
        assert!(matches!(schema.validate(), Err(StoreError::Constraint(_))));
    }

    #[test]
    fn test_validate_rejects_bad_key_path() {
        let schema = DatabaseSchema::new("db", 1).store(StoreSpec::new("a").key_path("a..b"));
        assert!(matches!(schema.validate(), Err(StoreError::Data(_))));
    }
}
