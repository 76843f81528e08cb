//! StoreClient tests against the in-memory engine

use objstore_core::{
    Connection, DatabaseSchema, IndexSpec, Key, MemoryConnection, MemoryEngine, StoreClient,
    StoreError, StoreSpec,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

type Client = StoreClient<MemoryConnection>;

fn people_spec() -> StoreSpec {
    StoreSpec::new("people")
        .index(IndexSpec::new("email").unique())
        .index(IndexSpec::new("city"))
}

/// Helper to open a client with the people store
async fn open_people(engine: &MemoryEngine) -> Client {
    let _ = objstore_core::logging::try_init_with_filter("debug");
    StoreClient::open_store(engine, "app", 1, people_spec())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_open_creates_stores_once() {
    let engine = MemoryEngine::new();

    let first = open_people(&engine).await;
    assert_eq!(first.upgraded_from(), Some(0));
    assert_eq!(first.store_names().unwrap(), vec!["people"]);
    assert_eq!(
        first.index_names("people").await.unwrap(),
        vec!["city", "email"]
    );

    // Same version: no upgrade, data untouched
    first.set("people", json!({"email": "a@x"}), None).await.unwrap();
    let again = open_people(&engine).await;
    assert_eq!(again.upgraded_from(), None);
    assert_eq!(again.count("people").await.unwrap(), 1);
}

#[tokio::test]
async fn test_new_store_needs_version_bump() {
    let engine = MemoryEngine::new();
    open_people(&engine).await;

    let schema = DatabaseSchema::new("app", 1)
        .store(people_spec())
        .store(StoreSpec::new("notes"));
    let same_version = StoreClient::open(&engine, schema.clone()).await.unwrap();
    assert_eq!(same_version.store_names().unwrap(), vec!["people"]);

    let bumped = StoreClient::open(
        &engine,
        DatabaseSchema {
            version: 2,
            ..schema
        },
    )
    .await
    .unwrap();
    assert_eq!(bumped.upgraded_from(), Some(1));
    assert_eq!(bumped.store_names().unwrap(), vec!["notes", "people"]);
}

#[tokio::test]
async fn test_open_lower_version_fails() {
    let engine = MemoryEngine::new();
    StoreClient::open_store(&engine, "app", 3, people_spec())
        .await
        .unwrap();

    let result = StoreClient::open_store(&engine, "app", 2, people_spec()).await;
    assert!(matches!(
        result.err(),
        Some(StoreError::Version {
            requested: 2,
            current: 3
        })
    ));
}

#[tokio::test]
async fn test_open_missing_parameters() {
    let engine = MemoryEngine::new();

    let no_name = StoreClient::open_store(&engine, "", 1, people_spec()).await;
    assert_eq!(no_name.err(), Some(StoreError::MissingParameter("name")));

    let no_version = StoreClient::open_store(&engine, "app", 0, people_spec()).await;
    assert_eq!(no_version.err(), Some(StoreError::MissingParameter("version")));

    let no_store = StoreClient::open_store(&engine, "app", 1, StoreSpec::new("")).await;
    assert_eq!(no_store.err(), Some(StoreError::MissingParameter("store")));

    assert!(engine.database_names().is_empty());
}

#[tokio::test]
async fn test_invalid_schema_leaves_database_untouched() {
    let engine = MemoryEngine::new();
    open_people(&engine).await;

    let broken = DatabaseSchema::new("app", 2)
        .store(StoreSpec::new("notes"))
        .store(StoreSpec::new("bad").key_path("a..b"));
    // Schema validation catches this before the engine is touched
    assert!(StoreClient::open(&engine, broken).await.is_err());
    assert_eq!(engine.version_of("app"), Some(1));
}

#[tokio::test]
async fn test_set_then_get() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    let record = json!({"name": "Ada", "email": "ada@x", "city": "London"});
    let key = client.set("people", record.clone(), None).await.unwrap();
    assert_eq!(key, Key::from(1));
    assert_eq!(client.get("people", key).await.unwrap(), Some(record));

    let explicit = json!({"name": "Bob", "email": "bob@x"});
    let key = client
        .set("people", explicit.clone(), Some(Key::from("bob")))
        .await
        .unwrap();
    assert_eq!(key, Key::from("bob"));
    assert_eq!(client.get("people", "bob").await.unwrap(), Some(explicit));
}

#[tokio::test]
async fn test_set_is_insert_only() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    client
        .set("people", json!({"name": "first"}), Some(Key::from(7)))
        .await
        .unwrap();
    let result = client
        .set("people", json!({"name": "second"}), Some(Key::from(7)))
        .await;

    assert!(matches!(result, Err(StoreError::Constraint(_))));
    assert_eq!(
        client.get("people", 7).await.unwrap(),
        Some(json!({"name": "first"}))
    );
}

#[tokio::test]
async fn test_unique_index_violation() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    client
        .set("people", json!({"email": "same@x"}), None)
        .await
        .unwrap();
    let result = client.set("people", json!({"email": "same@x"}), None).await;

    assert!(matches!(result, Err(StoreError::Constraint(_))));
    assert_eq!(client.count("people").await.unwrap(), 1);
}

#[tokio::test]
async fn test_get_missing_key_and_store() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    assert_eq!(client.get("people", 404).await.unwrap(), None);

    let result = client.get("nope", 1).await;
    assert_eq!(result, Err(StoreError::StoreNotFound("nope".to_string())));

    let result = client.get("", 1).await;
    assert_eq!(result, Err(StoreError::MissingParameter("store")));
}

#[tokio::test]
async fn test_get_all_visits_each_record_once_in_key_order() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    for (key, name) in [(3, "c"), (1, "a"), (2, "b")] {
        client
            .set("people", json!({ "name": name }), Some(Key::from(key)))
            .await
            .unwrap();
    }
    client
        .set("people", json!({"name": "z"}), Some(Key::from("z")))
        .await
        .unwrap();

    let mut seen = Vec::new();
    let visited = client
        .for_each("people", |record| seen.push(record.key))
        .await
        .unwrap();

    assert_eq!(visited, 4);
    assert_eq!(
        seen,
        vec![Key::from(1), Key::from(2), Key::from(3), Key::from("z")]
    );
}

#[tokio::test]
async fn test_get_all_restarts_per_call() {
    use futures::StreamExt;

    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    client.set("people", json!({"n": 1}), None).await.unwrap();
    client.set("people", json!({"n": 2}), None).await.unwrap();

    let first: Vec<Value> = client
        .get_all("people")
        .unwrap()
        .map(|r| r.unwrap().value)
        .collect()
        .await;
    let second: Vec<Value> = client
        .get_all("people")
        .unwrap()
        .map(|r| r.unwrap().value)
        .collect()
        .await;

    assert_eq!(first, vec![json!({"n": 1}), json!({"n": 2})]);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_get_all_empty_and_unknown_store() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    let visited = client.for_each("people", |_| panic!("empty")).await.unwrap();
    assert_eq!(visited, 0);

    assert!(matches!(
        client.get_all("ghost").err(),
        Some(StoreError::StoreNotFound(_))
    ));
}

#[tokio::test]
async fn test_get_by_property() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    client
        .set("people", json!({"name": "Ada", "city": "London"}), Some(Key::from(2)))
        .await
        .unwrap();
    client
        .set("people", json!({"name": "Alan", "city": "London"}), Some(Key::from(1)))
        .await
        .unwrap();

    // First match by primary key
    let found = client
        .get_by_property("people", "city", "London")
        .await
        .unwrap();
    assert_eq!(found, Some(json!({"name": "Alan", "city": "London"})));

    let missing = client
        .get_by_property("people", "city", "Paris")
        .await
        .unwrap();
    assert_eq!(missing, None);
}

#[tokio::test]
async fn test_get_by_unindexed_property_is_an_error() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    client
        .set("people", json!({"name": "Ada"}), None)
        .await
        .unwrap();

    let result = client.get_by_property("people", "name", "Ada").await;
    assert_eq!(
        result,
        Err(StoreError::IndexNotFound {
            store: "people".to_string(),
            index: "name".to_string(),
        })
    );

    let result = client.get_by_property("people", "", "Ada").await;
    assert_eq!(result, Err(StoreError::MissingParameter("property")));
}

#[tokio::test]
async fn test_put_applies_update_once() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    let key = client
        .set("people", json!({"name": "Ada", "visits": 0}), None)
        .await
        .unwrap();

    let mut calls = 0;
    let written = client
        .put("people", key.clone(), |record| {
            calls += 1;
            record["visits"] = json!(record["visits"].as_i64().unwrap() + 1);
        })
        .await
        .unwrap();

    assert_eq!(calls, 1);
    assert_eq!(written, json!({"name": "Ada", "visits": 1}));
    assert_eq!(client.get("people", key).await.unwrap(), Some(written));
}

#[tokio::test]
async fn test_put_missing_record() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    let mut called = false;
    let result = client.put("people", 99, |_| called = true).await;

    assert_eq!(result, Err(StoreError::NotFound("99".to_string())));
    assert!(!called);
}

#[tokio::test]
async fn test_put_keeps_unique_constraint() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    client
        .set("people", json!({"email": "a@x"}), Some(Key::from(1)))
        .await
        .unwrap();
    client
        .set("people", json!({"email": "b@x"}), Some(Key::from(2)))
        .await
        .unwrap();

    let result = client
        .put("people", 2, |record| record["email"] = json!("a@x"))
        .await;

    assert!(matches!(result, Err(StoreError::Constraint(_))));
    assert_eq!(
        client.get("people", 2).await.unwrap(),
        Some(json!({"email": "b@x"}))
    );
}

#[tokio::test]
async fn test_try_put_failure_writes_nothing() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    let key = client
        .set("people", json!({"email": "a@x", "visits": 0}), None)
        .await
        .unwrap();

    let result = client
        .try_put("people", key.clone(), |record| {
            record["email"] = json!("changed@x");
            Err(StoreError::Data("update function threw".to_string()))
        })
        .await;

    assert_eq!(
        result,
        Err(StoreError::Data("update function threw".to_string()))
    );
    assert_eq!(
        client.get("people", key).await.unwrap(),
        Some(json!({"email": "a@x", "visits": 0}))
    );
    assert_eq!(
        client.get_by_property("people", "email", "changed@x").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_upgrade_elsewhere_closes_handle() {
    let engine = MemoryEngine::new();
    let old = open_people(&engine).await;
    assert_eq!(old.connection().version(), 1);

    let schema = DatabaseSchema::new("app", 2)
        .store(people_spec())
        .store(StoreSpec::new("notes"));
    let new = StoreClient::open(&engine, schema).await.unwrap();
    assert_eq!(new.connection().version(), 2);

    let result = old.set("notes", json!("stale"), None).await;
    assert!(matches!(result, Err(StoreError::Closed(_))));
    assert_eq!(new.count("notes").await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_then_get() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    let key = client
        .set("people", json!({"name": "Ada"}), None)
        .await
        .unwrap();

    assert!(client.delete("people", key.clone()).await.unwrap());
    assert_eq!(client.get("people", key.clone()).await.unwrap(), None);
    assert!(!client.delete("people", key).await.unwrap());
}

#[tokio::test]
async fn test_clear() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    client
        .set("people", json!({"email": "a@x"}), None)
        .await
        .unwrap();

    client.clear("people").await.unwrap();
    assert_eq!(client.count("people").await.unwrap(), 0);
    assert_eq!(
        client.get_by_property("people", "email", "a@x").await.unwrap(),
        None
    );
}

#[tokio::test]
async fn test_key_path_store() {
    let engine = MemoryEngine::new();
    let spec = StoreSpec::new("notes")
        .key_path("meta.id")
        .index(IndexSpec::new("tag").key_path("meta.tags").multi_entry());
    let client = StoreClient::open_store(&engine, "notes", 1, spec)
        .await
        .unwrap();

    let key = client
        .set("notes", json!({"body": "hi", "meta": {"tags": ["a", "b"]}}), None)
        .await
        .unwrap();
    let stored = client.get("notes", key).await.unwrap().unwrap();
    assert_eq!(stored["meta"]["id"], json!(1));

    let by_tag = client.get_by_property("notes", "tag", "b").await.unwrap();
    assert_eq!(by_tag, Some(stored));
}

#[tokio::test]
async fn test_typed_records() {
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Person {
        name: String,
        email: String,
    }

    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;
    let ada = Person {
        name: "Ada".to_string(),
        email: "ada@x".to_string(),
    };

    let key = client.set_as("people", &ada, None).await.unwrap();
    let loaded: Option<Person> = client.get_as("people", key).await.unwrap();
    assert_eq!(loaded, Some(ada));
}

#[tokio::test]
async fn test_close_and_delete_database() {
    let engine = MemoryEngine::new();
    let client = open_people(&engine).await;

    client.close();
    assert!(matches!(
        client.get("people", 1).await,
        Err(StoreError::Closed(_))
    ));

    objstore_core::delete_database(&engine, "app").await.unwrap();
    assert_eq!(engine.version_of("app"), None);

    let reopened = open_people(&engine).await;
    assert_eq!(reopened.upgraded_from(), Some(0));
}
