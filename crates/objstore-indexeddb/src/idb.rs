//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::Promise;
use objstore_core::{SchemaUpgrade, StoreError, StoreResult, StoreSpec, UpgradeFn};
use tracing::warn;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbDatabase, IdbFactory, IdbObjectStore, IdbOpenDbRequest, IdbRequest, IdbTransaction,
    IdbTransactionMode, IdbVersionChangeEvent,
};

use crate::error::{IndexedDbError, Result};

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Type alias for upgrade closure to reduce complexity
type UpgradeClosure = Rc<RefCell<Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>>>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Whether the global scope exposes IndexedDB.
pub fn is_supported() -> bool {
    idb_factory().is_ok()
}

/// Convert an IdbRequest into a JS Promise that resolves with the request's
/// result and rejects with its `DOMException`.
fn request_to_promise(req: &IdbRequest) -> Promise {
    let req_success = req.clone();
    let req_error = req.clone();

    Promise::new(&mut move |resolve, reject| {
        // Store closures in Rc<RefCell> to manage their lifetime without leaking
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req_success.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req_error.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let err = req_e
                .error()
                .ok()
                .flatten()
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("unknown IDB error"));
            let _ = reject.call1(&JsValue::UNDEFINED, &err);
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req_success.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req_error.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        // Keep both closures alive until one fires
        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Convert an IdbTransaction completion into a JS Promise. Rejects on error
/// and on abort.
fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx = tx.clone();

    Promise::new(&mut move |resolve, reject| {
        type ClosureSet = (EventClosure, EventClosure, EventClosure);
        let closures: Rc<RefCell<Option<ClosureSet>>> = Rc::new(RefCell::new(None));

        let closures_for_complete = closures.clone();
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            *closures_for_complete.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let failure = |label: &'static str| {
            let tx_e = tx.clone();
            let reject = reject.clone();
            let closures = closures.clone();
            Closure::wrap(Box::new(move |_event: web_sys::Event| {
                let err = tx_e
                    .error()
                    .map(JsValue::from)
                    .unwrap_or_else(|| JsValue::from_str(label));
                let _ = reject.call1(&JsValue::UNDEFINED, &err);
                *closures.borrow_mut() = None;
            }) as Box<dyn FnMut(web_sys::Event)>)
        };
        let on_error = failure("transaction error");
        let on_abort = failure("transaction aborted");

        tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_complete, on_error, on_abort));
    })
}

/// Schema changes applied inside an `upgradeneeded` handler.
struct IdbUpgrade {
    db: IdbDatabase,
    old_version: u32,
    new_version: u32,
}

impl SchemaUpgrade for IdbUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn has_store(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_store(&mut self, spec: &StoreSpec) -> StoreResult<()> {
        spec.validate()?;
        if self.has_store(&spec.name) {
            return Err(StoreError::Constraint(format!(
                "store '{}' already exists",
                spec.name
            )));
        }

        let params = web_sys::IdbObjectStoreParameters::new();
        if let Some(key_path) = &spec.key_path {
            set_param(&params, "keyPath", &JsValue::from_str(key_path))?;
        }
        set_param(&params, "autoIncrement", &JsValue::from_bool(spec.auto_increment))?;

        let store = self
            .db
            .create_object_store_with_optional_parameters(&spec.name, &params)
            .map_err(|e| StoreError::from(IndexedDbError::from(e)))?;

        for index in &spec.indexes {
            let index_params = web_sys::IdbIndexParameters::new();
            set_param(&index_params, "unique", &JsValue::from_bool(index.unique))?;
            set_param(&index_params, "multiEntry", &JsValue::from_bool(index.multi_entry))?;
            store
                .create_index_with_str_and_optional_parameters(
                    &index.name,
                    index.path(),
                    &index_params,
                )
                .map_err(|e| StoreError::from(IndexedDbError::from(e)))?;
        }
        Ok(())
    }
}

fn set_param(params: &JsValue, key: &str, val: &JsValue) -> StoreResult<()> {
    js_sys::Reflect::set(params, &key.into(), val)
        .map_err(|_| StoreError::Backend(format!("failed to set parameter: {}", key)))?;
    Ok(())
}

/// Run the caller's upgrade inside `upgradeneeded`.
fn run_upgrade(event: &IdbVersionChangeEvent, upgrade: &mut UpgradeFn) -> StoreResult<()> {
    let req: IdbOpenDbRequest = event
        .target()
        .ok_or_else(|| StoreError::Backend("upgrade event has no target".into()))?
        .unchecked_into();
    let db: IdbDatabase = req
        .result()
        .map_err(|e| StoreError::from(IndexedDbError::from(e)))?
        .unchecked_into();

    let mut tx = IdbUpgrade {
        db,
        old_version: event.old_version() as u32,
        new_version: event.new_version().unwrap_or_default() as u32,
    };
    upgrade(&mut tx)
}

/// Open (or create) a database, running `upgrade` when `version` is newer
/// than the stored one.
///
/// A failed upgrade aborts the version change transaction, so nothing is
/// committed, and its error is returned.
pub async fn open_database(
    db_name: &str,
    version: u32,
    mut upgrade: UpgradeFn,
) -> StoreResult<IdbDatabase> {
    let factory = idb_factory()?;

    let open_req: IdbOpenDbRequest = factory
        .open_with_u32(db_name, version)
        .map_err(IndexedDbError::from)?;

    let failure: Rc<RefCell<Option<StoreError>>> = Rc::new(RefCell::new(None));

    // Store upgrade closure to manage its lifetime without leaking
    let upgrade_closure: UpgradeClosure = Rc::new(RefCell::new(None));
    let upgrade_closure_for_drop = upgrade_closure.clone();

    let failure_for_upgrade = failure.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        if let Err(err) = run_upgrade(&event, &mut upgrade) {
            warn!(error = %err, "IndexedDB upgrade failed, aborting");
            let req: Option<IdbOpenDbRequest> = event.target().map(|t| t.unchecked_into());
            if let Some(tx) = req.and_then(|r| r.transaction()) {
                let _ = tx.abort();
            }
            *failure_for_upgrade.borrow_mut() = Some(err);
        }
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    *upgrade_closure.borrow_mut() = Some(on_upgrade);

    let open_promise = request_to_promise(open_req.unchecked_ref());
    let result = wasm_bindgen_futures::JsFuture::from(open_promise).await;

    // Clean up upgrade closure now that open is complete
    open_req.set_onupgradeneeded(None);
    *upgrade_closure_for_drop.borrow_mut() = None;

    let result = match result {
        Ok(result) => result,
        Err(err) => {
            if let Some(upgrade_err) = failure.borrow_mut().take() {
                return Err(upgrade_err);
            }
            let err = IndexedDbError::from(err);
            if err.dom_name() == Some("VersionError") {
                let current = current_version(db_name).await.unwrap_or(0);
                return Err(StoreError::Version {
                    requested: version,
                    current,
                });
            }
            return Err(err.into());
        }
    };

    result
        .dyn_into::<IdbDatabase>()
        .map_err(|_| StoreError::Backend("open result is not IdbDatabase".into()))
}

/// Stored version of a database, read by opening it without a version.
async fn current_version(db_name: &str) -> Result<u32> {
    let factory = idb_factory()?;
    let req = factory.open(db_name)?;
    let db: IdbDatabase = await_request(req.unchecked_ref()).await?.unchecked_into();
    let version = db.version() as u32;
    db.close();
    Ok(version)
}

/// Start a transaction on one object store.
pub fn begin_transaction(
    db: &IdbDatabase,
    store: &str,
    mode: IdbTransactionMode,
) -> Result<(IdbTransaction, IdbObjectStore)> {
    let tx = db.transaction_with_str_and_mode(store, mode)?;
    let object_store = tx.object_store(store)?;
    Ok((tx, object_store))
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    let promise = request_to_promise(req);
    wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(IndexedDbError::from)
}

/// Await an IdbTransaction to complete.
pub async fn await_transaction(tx: &IdbTransaction) -> Result<()> {
    let promise = transaction_to_promise(tx);
    wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(|e| match IndexedDbError::from(e) {
            IndexedDbError::Request(msg) => IndexedDbError::Transaction(msg),
            other => other,
        })?;
    Ok(())
}

/// Delete an IndexedDB database by name.
pub async fn delete_database(db_name: &str) -> Result<()> {
    let factory = idb_factory()?;
    let req = factory.delete_database(db_name)?;
    await_request(req.unchecked_ref()).await?;
    Ok(())
}

/// Collect a `DOMStringList` into a Vec.
pub fn dom_strings(list: &web_sys::DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}
