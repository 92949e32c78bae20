//! Column-store adapter scenarios against the in-memory session.

use morphdb_codec::{GeoPoint, MapFormat, Value};
use morphdb_columnstore::{ColumnStoreConfig, ColumnStoreTable, CqlStatement, MemoryColumnStore};
use morphdb_core::{
    collect_all, CollectingObserver, Condition, CoreError, Modification, Query, RetryConfig,
    SortPart, Table, TableOptions,
};
use futures::StreamExt;
use morphdb_testkit::{init_tracing, sample_people, Person};
use std::sync::Arc;
use std::time::Duration;

const TABLE: &str = "app.person";

fn config(fan_out: usize) -> ColumnStoreConfig {
    ColumnStoreConfig::new("app")
        .with_fan_out_limit(fan_out)
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
}

async fn people(store: &Arc<MemoryColumnStore>, fan_out: usize) -> ColumnStoreTable<Person> {
    init_tracing();
    let options = TableOptions::new().with_index("name").with_index("tags");
    let table = ColumnStoreTable::new(store.clone(), config(fan_out), &options);
    table.ensure_schema().await.unwrap();
    table
}

fn person(id: &str) -> Person {
    let mut p = sample_people()[1].clone();
    p.id = id.to_string();
    p
}

fn ids(found: &[Person]) -> Vec<&str> {
    found.iter().map(|p| p.id.as_str()).collect()
}

#[tokio::test]
async fn disjunction_fan_out_respects_the_limit() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 10).await;
    let records: Vec<Person> = (0..60).map(|i| person(&format!("p{i:02}"))).collect();
    table.insert_many(records).await.unwrap();

    store.set_latency(Duration::from_millis(5));
    store.reset_max_in_flight();
    store.clear_log();
    let wanted = Condition::or((0..50).map(|i| Condition::field_eq("id", format!("p{i:02}"))));
    let found = collect_all(table.find(Query::new(wanted)).await.unwrap())
        .await
        .unwrap();

    assert_eq!(found.len(), 50);
    assert_eq!(store.executed().len(), 50);
    assert!(store.max_in_flight() <= 10, "max in flight {}", store.max_in_flight());
    assert!(store.max_in_flight() > 1);
}

#[tokio::test]
async fn records_stream_before_every_branch_finishes() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 1).await;
    let records: Vec<Person> = (0..20).map(|i| person(&format!("p{i:02}"))).collect();
    table.insert_many(records).await.unwrap();
    store.clear_log();

    let wanted = Condition::or((0..20).map(|i| Condition::field_eq("id", format!("p{i:02}"))));
    let mut found = table.find(Query::new(wanted)).await.unwrap();
    assert!(store.executed().is_empty());

    let first = found.next().await.unwrap().unwrap();
    assert!(first.id.starts_with('p'));
    assert!(store.executed().len() < 20, "ran {} selects", store.executed().len());

    let rest = collect_all(found).await.unwrap();
    assert_eq!(rest.len(), 19);
    assert_eq!(store.executed().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_of_one_id_admit_exactly_one() {
    for _ in 0..20 {
        let store = Arc::new(MemoryColumnStore::new());
        let table = Arc::new(people(&store, 10).await);
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let table = Arc::clone(&table);
                tokio::spawn(async move { table.insert_one(person("dup")).await })
            })
            .collect();

        let mut ok = 0;
        let mut duplicates = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(CoreError::DuplicateKey { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((ok, duplicates), (1, 1));
        assert_eq!(store.rows(TABLE).len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_key_changes_onto_one_id_keep_both_records() {
    for _ in 0..20 {
        let store = Arc::new(MemoryColumnStore::new());
        let table = Arc::new(people(&store, 10).await);
        table.insert_many(vec![person("a"), person("b")]).await.unwrap();

        let tasks: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|from| {
                let table = Arc::clone(&table);
                tokio::spawn(async move {
                    table
                        .update_one(Condition::field_eq("id", from), Modification::set("id", "c"))
                        .await
                })
            })
            .collect();

        let mut moved = Vec::new();
        let mut duplicates = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(change) => moved.push(change.old.unwrap().id),
                Err(CoreError::DuplicateKey { .. }) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!((moved.len(), duplicates), (1, 1));

        let stayed = if moved[0] == "a" { "b" } else { "a" };
        let rows = store.rows(TABLE);
        let keys: Vec<Option<&Value>> = rows.iter().map(|row| row.get("id")).collect();
        assert_eq!(keys, vec![Some(&Value::from(stayed)), Some(&Value::from("c"))]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn key_change_racing_an_update_keeps_the_update() {
    let base = person("old").age;
    for _ in 0..20 {
        let store = Arc::new(MemoryColumnStore::new());
        let table = Arc::new(people(&store, 10).await);
        table.insert_one(person("old")).await.unwrap();

        let mover = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .update_one(Condition::field_eq("id", "old"), Modification::set("id", "new"))
                    .await
            })
        };
        let ager = {
            let table = Arc::clone(&table);
            tokio::spawn(async move {
                table
                    .update_one(
                        Condition::field_eq("id", "old"),
                        Modification::on_field("age", Modification::Increment(1.into())),
                    )
                    .await
            })
        };

        let moved = mover.await.unwrap().unwrap();
        assert!(moved.new.is_some());
        let aged = ager.await.unwrap().unwrap().new.is_some();

        let found = collect_all(table.find(Query::all()).await.unwrap())
            .await
            .unwrap();
        assert_eq!(ids(&found), vec!["new"]);
        let expected = if aged { base + 1 } else { base };
        assert_eq!(found[0].age, expected);
    }
}

#[tokio::test]
async fn failed_key_change_leaves_exactly_the_old_row() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 10).await;
    table.insert_one(person("old")).await.unwrap();
    let change_key = || table.update_one(Condition::field_eq("id", "old"), Modification::set("id", "new"));

    // Claiming the new key fails.
    store.fail_next_of("insert");
    assert!(change_key().await.unwrap_err().is_retryable());
    let rows = store.rows(TABLE);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Text("old".into())));

    // Deleting the old row fails after the claim; the claim is withdrawn.
    store.fail_next_of("delete");
    assert!(change_key().await.unwrap_err().is_retryable());
    let rows = store.rows(TABLE);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Text("old".into())));

    // The caller re-reads and tries again.
    let change = change_key().await.unwrap();
    assert_eq!(change.new.map(|p| p.id), Some("new".to_string()));
    let rows = store.rows(TABLE);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("id"), Some(&Value::Text("new".into())));
}

#[tokio::test]
async fn key_change_onto_an_existing_key_is_a_duplicate() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 10).await;
    table.insert_many(vec![person("a"), person("b")]).await.unwrap();

    let err = table
        .update_one(Condition::field_eq("id", "a"), Modification::set("id", "b"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DuplicateKey { .. }));
    assert_eq!(store.rows(TABLE).len(), 2);
}

#[tokio::test]
async fn full_scans_are_reported_before_they_run() {
    let store = Arc::new(MemoryColumnStore::new());
    let observer = CollectingObserver::new();
    let table = people(&store, 10).await.with_observer(observer.clone());
    table.insert_many(sample_people()).await.unwrap();

    let older = Condition::on_field("age", Condition::GreaterThan(30.into()));
    let found = collect_all(table.find(Query::new(older.clone())).await.unwrap())
        .await
        .unwrap();
    assert_eq!(ids(&found), vec!["p1", "p3"]);
    let scans = observer.full_scans();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].unindexed_fields, vec!["age"]);
    assert!(scans[0].statement.ends_with("ALLOW FILTERING"));

    table.find_one(Condition::field_eq("name", "Ada")).await.unwrap();
    assert_eq!(observer.full_scans().len(), 1);

    // The analysis is delivered even when the statement then fails.
    observer.clear();
    store.fail_next(10);
    let records = table.find(Query::new(older)).await.unwrap();
    assert_eq!(observer.full_scans().len(), 1);
    assert!(collect_all(records).await.is_err());
}

#[tokio::test]
async fn list_membership_uses_the_index() {
    let store = Arc::new(MemoryColumnStore::new());
    let observer = CollectingObserver::new();
    let table = people(&store, 10).await.with_observer(observer.clone());
    table.insert_many(sample_people()).await.unwrap();

    let vip = Condition::on_field(
        "tags",
        Condition::ListAnyElements(Box::new(Condition::Equal("vip".into()))),
    );
    let found = collect_all(table.find(Query::new(vip)).await.unwrap())
        .await
        .unwrap();
    assert_eq!(ids(&found), vec!["p1", "p3"]);
    assert!(observer.full_scans().is_empty());
}

#[tokio::test]
async fn geo_queries_prefilter_on_geohash_cells() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 10).await;
    table.insert_many(sample_people()).await.unwrap();
    store.clear_log();

    let near_oslo = Condition::on_field(
        "location",
        Condition::within_km(GeoPoint::new(59.915, 10.755), 5.0),
    );
    let query = Query::new(near_oslo).order_by(SortPart::desc("age"));
    let found = collect_all(table.find(query).await.unwrap()).await.unwrap();
    assert_eq!(ids(&found), vec!["p3", "p2"]);

    let selects = store.executed();
    assert!(!selects.is_empty());
    assert!(selects.iter().all(|s| s.to_string().contains("location__geohash LIKE ?")));
}

#[tokio::test]
async fn conditional_updates_and_deletes() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 10).await;
    table.insert_many(sample_people()).await.unwrap();

    let bumped = table
        .update_many(
            Condition::on_field("age", Condition::LessThan(30.into())),
            Modification::on_field("age", Modification::Increment(1.into())),
        )
        .await
        .unwrap();
    assert_eq!(bumped, 2);

    let upserted = table
        .upsert_one(
            Condition::field_eq("id", "p9"),
            Modification::set("age", 1),
            person("p9"),
        )
        .await
        .unwrap();
    assert!(upserted.old.is_none());
    assert_eq!(table.count(Condition::Always).await.unwrap(), 5);

    let removed = table
        .delete_one(Condition::field_eq("name", "Dee"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(removed.age, 30);
    assert!(table.delete_one(Condition::field_eq("name", "Dee")).await.unwrap().is_none());

    let conditional_writes = store
        .executed()
        .into_iter()
        .filter(|s| matches!(s, CqlStatement::Update { .. } | CqlStatement::Delete { .. }))
        .filter(CqlStatement::is_conditional)
        .count();
    assert_eq!(conditional_writes, 3);
}

#[tokio::test]
async fn rows_from_other_schema_versions_decode() {
    let store = Arc::new(MemoryColumnStore::new());
    let table = people(&store, 10).await;
    let format = MapFormat::native();

    let mut newer = format.encode_record(&person("newer")).unwrap();
    newer.insert("loyalty_tier", Value::Text("gold".into()));
    store.put_raw(TABLE, newer).unwrap();

    let mut older = format.encode_record(&person("older")).unwrap();
    older.remove("age");
    store.put_raw(TABLE, older).unwrap();

    let mut broken = format.encode_record(&person("broken")).unwrap();
    broken.remove("name");
    store.put_raw(TABLE, broken).unwrap();

    let newer = table.find_one(Condition::field_eq("id", "newer")).await.unwrap();
    assert_eq!(newer, Some(person("newer")));

    let older = table.find_one(Condition::field_eq("id", "older")).await.unwrap().unwrap();
    assert_eq!(older.age, 0);

    let err = table
        .find_one(Condition::field_eq("id", "broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Codec(_)));
}
