//! In-memory host engine
//!
//! A BTreeMap-based engine for native use, development and testing.
//! Not durable: everything lives as long as the `MemoryEngine` value (and its
//! clones, which share state).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use crate::engine::{Connection, Engine, Record, RecordStream, SchemaUpgrade, UpgradeFn};
use crate::error::{StoreError, StoreResult};
use crate::key::Key;
use crate::schema::{extract, inject, StoreSpec};

type Databases = Arc<Mutex<HashMap<String, DatabaseState>>>;

/// In-memory engine.
///
/// Every connection operation takes the engine lock once, so each call is a
/// serialized transaction.
///
/// Each upgrade or re-creation gives the database a new generation.
/// Connections opened on an older generation fail with `StoreError::Closed`.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    databases: Databases,
    generations: Arc<AtomicU64>,
}

#[derive(Debug, Clone, Default)]
struct DatabaseState {
    version: u32,
    generation: u64,
    stores: BTreeMap<String, StoreState>,
}

/// Index name -> index key -> primary keys
type IndexEntries = BTreeMap<String, BTreeMap<Key, BTreeSet<Key>>>;

#[derive(Debug, Clone)]
struct StoreState {
    spec: StoreSpec,
    records: BTreeMap<Key, Value>,
    next_key: u64,
    indexes: IndexEntries,
}

impl MemoryEngine {
    /// Create an engine with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.databases.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored version of a database, if it exists.
    pub fn version_of(&self, name: &str) -> Option<u32> {
        self.databases.lock().get(name).map(|db| db.version)
    }
}

#[async_trait(?Send)]
impl Engine for MemoryEngine {
    type Connection = MemoryConnection;

    async fn open(
        &self,
        name: &str,
        version: u32,
        mut upgrade: UpgradeFn,
    ) -> StoreResult<MemoryConnection> {
        if name.is_empty() {
            return Err(StoreError::MissingParameter("name"));
        }
        if version == 0 {
            return Err(StoreError::MissingParameter("version"));
        }

        let mut databases = self.databases.lock();
        let current = databases.get(name).map(|db| db.version).unwrap_or(0);

        if version < current {
            return Err(StoreError::Version {
                requested: version,
                current,
            });
        }

        if version > current {
            // Stage the upgrade on a copy so a failure commits nothing
            let mut staged = databases.get(name).cloned().unwrap_or_default();
            let mut tx = MemoryUpgrade {
                old_version: current,
                new_version: version,
                db: &mut staged,
            };
            upgrade(&mut tx)?;
            staged.version = version;
            staged.generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
            databases.insert(name.to_string(), staged);
            debug!(database = name, from = current, to = version, "memory database upgraded");
        }

        let generation = databases.get(name).map(|db| db.generation).unwrap_or_default();
        Ok(MemoryConnection {
            databases: self.databases.clone(),
            name: name.to_string(),
            version,
            generation,
            closed: AtomicBool::new(false),
        })
    }

    async fn delete_database(&self, name: &str) -> StoreResult<()> {
        if self.databases.lock().remove(name).is_some() {
            debug!(database = name, "memory database deleted");
        }
        Ok(())
    }
}

struct MemoryUpgrade<'a> {
    old_version: u32,
    new_version: u32,
    db: &'a mut DatabaseState,
}

impl SchemaUpgrade for MemoryUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn has_store(&self, name: &str) -> bool {
        self.db.stores.contains_key(name)
    }

    fn create_store(&mut self, spec: &StoreSpec) -> StoreResult<()> {
        spec.validate()?;
        if self.has_store(&spec.name) {
            return Err(StoreError::Constraint(format!(
                "store '{}' already exists",
                spec.name
            )));
        }
        self.db
            .stores
            .insert(spec.name.clone(), StoreState::new(spec.clone()));
        Ok(())
    }
}

impl StoreState {
    fn new(spec: StoreSpec) -> Self {
        let indexes = spec
            .indexes
            .iter()
            .map(|index| (index.name.clone(), BTreeMap::new()))
            .collect();
        Self {
            spec,
            records: BTreeMap::new(),
            next_key: 1,
            indexes,
        }
    }

    /// Insert a new record. The key generator is left untouched on failure.
    fn insert(&mut self, value: Value, key: Option<Key>) -> StoreResult<Key> {
        let saved = self.next_key;
        let result = self.try_insert(value, key);
        if result.is_err() {
            self.next_key = saved;
        }
        result
    }

    fn try_insert(&mut self, mut value: Value, key: Option<Key>) -> StoreResult<Key> {
        let key = self.resolve_key(&mut value, key)?;
        if self.records.contains_key(&key) {
            return Err(StoreError::Constraint(format!(
                "key {} already exists in store '{}'",
                key, self.spec.name
            )));
        }
        self.check_unique(&key, &value)?;
        self.index_record(&key, &value);
        self.records.insert(key.clone(), value);
        Ok(key)
    }

    fn resolve_key(&mut self, value: &mut Value, key: Option<Key>) -> StoreResult<Key> {
        match (self.spec.key_path.clone(), key) {
            (Some(_), Some(_)) => Err(StoreError::Data(format!(
                "store '{}' uses an in-line key path; an explicit key cannot be supplied",
                self.spec.name
            ))),
            (Some(path), None) => match extract(value, &path) {
                Some(found) => {
                    let key = Key::from_value(found).ok_or_else(|| {
                        StoreError::Data(format!("value at key path {:?} is not a valid key", path))
                    })?;
                    self.bump_generator(&key);
                    Ok(key)
                }
                None if self.spec.auto_increment => {
                    let key = self.generate_key();
                    inject(value, &path, &key)?;
                    Ok(key)
                }
                None => Err(StoreError::Data(format!(
                    "record has no key at key path {:?}",
                    path
                ))),
            },
            (None, Some(key)) => {
                valid_key(&key)?;
                self.bump_generator(&key);
                Ok(key)
            }
            (None, None) if self.spec.auto_increment => Ok(self.generate_key()),
            (None, None) => Err(StoreError::Data(format!(
                "store '{}' has no key path or key generator; a key is required",
                self.spec.name
            ))),
        }
    }

    fn generate_key(&mut self) -> Key {
        let key = Key::Number(self.next_key as f64);
        self.next_key += 1;
        key
    }

    fn bump_generator(&mut self, key: &Key) {
        if !self.spec.auto_increment {
            return;
        }
        if let Some(n) = key.as_number() {
            if n >= self.next_key as f64 {
                self.next_key = (n.floor() as u64).saturating_add(1);
            }
        }
    }

    fn check_unique(&self, key: &Key, value: &Value) -> StoreResult<()> {
        for index in self.spec.indexes.iter().filter(|i| i.unique) {
            let Some(entries) = self.indexes.get(&index.name) else {
                continue;
            };
            for index_key in index.keys_for(value) {
                let taken = entries
                    .get(&index_key)
                    .is_some_and(|owners| owners.iter().any(|owner| owner != key));
                if taken {
                    return Err(StoreError::Constraint(format!(
                        "unique index '{}' already contains {}",
                        index.name, index_key
                    )));
                }
            }
        }
        Ok(())
    }

    fn index_record(&mut self, key: &Key, value: &Value) {
        for index in &self.spec.indexes {
            let entries = self.indexes.entry(index.name.clone()).or_default();
            for index_key in index.keys_for(value) {
                entries.entry(index_key).or_default().insert(key.clone());
            }
        }
    }

    fn unindex_record(&mut self, key: &Key, value: &Value) {
        for index in &self.spec.indexes {
            let Some(entries) = self.indexes.get_mut(&index.name) else {
                continue;
            };
            for index_key in index.keys_for(value) {
                if let Some(owners) = entries.get_mut(&index_key) {
                    owners.remove(key);
                    if owners.is_empty() {
                        entries.remove(&index_key);
                    }
                }
            }
        }
    }

    fn update(
        &mut self,
        key: &Key,
        update: &mut dyn FnMut(&mut Value) -> StoreResult<()>,
    ) -> StoreResult<Option<Value>> {
        let Some(old) = self.records.get(key).cloned() else {
            return Ok(None);
        };

        let mut new = old.clone();
        update(&mut new)?;

        if let Some(path) = &self.spec.key_path {
            let new_key = extract(&new, path).and_then(Key::from_value);
            if new_key.as_ref() != Some(key) {
                return Err(StoreError::Data(format!(
                    "update changed the in-line key at {:?}",
                    path
                )));
            }
        }

        self.check_unique(key, &new)?;
        self.unindex_record(key, &old);
        self.index_record(key, &new);
        self.records.insert(key.clone(), new.clone());
        Ok(Some(new))
    }

    fn remove(&mut self, key: &Key) -> bool {
        match self.records.remove(key) {
            Some(old) => {
                self.unindex_record(key, &old);
                true
            }
            None => false,
        }
    }

    fn get_by_index(&self, index: &str, value: &Key) -> StoreResult<Option<Value>> {
        if self.spec.find_index(index).is_none() {
            return Err(StoreError::IndexNotFound {
                store: self.spec.name.clone(),
                index: index.to_string(),
            });
        }
        Ok(self
            .indexes
            .get(index)
            .and_then(|entries| entries.get(value))
            .and_then(|owners| owners.iter().next())
            .and_then(|owner| self.records.get(owner))
            .cloned())
    }

    /// First record with a key strictly greater than `last`.
    fn next_after(&self, last: Option<&Key>) -> Option<Record> {
        let next = match last {
            None => self.records.iter().next(),
            Some(last) => self
                .records
                .range((Bound::Excluded(last), Bound::Unbounded))
                .next(),
        };
        next.map(|(key, value)| Record {
            key: key.clone(),
            value: value.clone(),
        })
    }
}

/// Connection to a database held by a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemoryConnection {
    databases: Databases,
    name: String,
    version: u32,
    generation: u64,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Run `f` against the database this connection was opened on, under the
    /// engine lock.
    fn with_database<T>(
        &self,
        f: impl FnOnce(&mut DatabaseState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed(self.name.clone()));
        }
        let mut databases = self.databases.lock();
        let db = databases
            .get_mut(&self.name)
            .ok_or_else(|| StoreError::Closed(format!("database '{}' was deleted", self.name)))?;
        if db.generation != self.generation {
            self.closed.store(true, Ordering::SeqCst);
            return Err(StoreError::Closed(format!(
                "database '{}' was replaced (now version {})",
                self.name, db.version
            )));
        }
        f(db)
    }

    /// Run `f` against one store under the engine lock.
    fn with_store<T>(
        &self,
        store: &str,
        f: impl FnOnce(&mut StoreState) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.with_database(|db| {
            let state = db
                .stores
                .get_mut(store)
                .ok_or_else(|| StoreError::StoreNotFound(store.to_string()))?;
            f(state)
        })
    }
}

/// Lookups reject keys IndexedDB would refuse.
fn valid_key(key: &Key) -> StoreResult<&Key> {
    if key.is_valid() {
        Ok(key)
    } else {
        Err(StoreError::Data(format!("{} is not a valid key", key)))
    }
}

#[async_trait(?Send)]
impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn store_names(&self) -> StoreResult<Vec<String>> {
        self.with_database(|db| Ok(db.stores.keys().cloned().collect()))
    }

    async fn index_names(&self, store: &str) -> StoreResult<Vec<String>> {
        self.with_store(store, |state| {
            let mut names: Vec<String> =
                state.spec.indexes.iter().map(|i| i.name.clone()).collect();
            names.sort();
            Ok(names)
        })
    }

    async fn add(&self, store: &str, value: Value, key: Option<Key>) -> StoreResult<Key> {
        self.with_store(store, |state| state.insert(value, key))
    }

    async fn get(&self, store: &str, key: &Key) -> StoreResult<Option<Value>> {
        let key = valid_key(key)?;
        self.with_store(store, |state| Ok(state.records.get(key).cloned()))
    }

    async fn get_by_index(
        &self,
        store: &str,
        index: &str,
        value: &Key,
    ) -> StoreResult<Option<Value>> {
        let value = valid_key(value)?;
        self.with_store(store, |state| state.get_by_index(index, value))
    }

    async fn update(
        &self,
        store: &str,
        key: &Key,
        update: &mut dyn for<'v> FnMut(&'v mut Value) -> StoreResult<()>,
    ) -> StoreResult<Option<Value>> {
        let key = valid_key(key)?;
        self.with_store(store, |state| state.update(key, update))
    }

    async fn delete(&self, store: &str, key: &Key) -> StoreResult<bool> {
        let key = valid_key(key)?;
        self.with_store(store, |state| Ok(state.remove(key)))
    }

    async fn count(&self, store: &str) -> StoreResult<usize> {
        self.with_store(store, |state| Ok(state.records.len()))
    }

    async fn clear(&self, store: &str) -> StoreResult<()> {
        self.with_store(store, |state| {
            state.records.clear();
            for entries in state.indexes.values_mut() {
                entries.clear();
            }
            Ok(())
        })
    }

    fn cursor(&self, store: &str) -> StoreResult<RecordStream<'_>> {
        self.with_store(store, |_| Ok(()))?;

        let this = self;
        let store = store.to_string();
        let records = stream::unfold(Some(None), move |last: Option<Option<Key>>| {
            let store = store.clone();
            async move {
                let last = last?;
                match this.with_store(&store, |state| Ok(state.next_after(last.as_ref()))) {
                    Ok(Some(record)) => {
                        let key = record.key.clone();
                        Some((Ok(record), Some(Some(key))))
                    }
                    Ok(None) => None,
                    Err(err) => Some((Err(err), None)),
                }
            }
        });
        Ok(records.boxed_local())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
