use super::*;
use std::future::Future;
use std::time::Duration;

use fleetsync_core::FirebaseClient;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::sync::entities::{ExpenseRow, TicketRow, TruckRow};
use crate::sync::firebase_feed::FirebaseFeed;
use crate::sync::memory_feed::MemoryFeed;
use crate::sync::store::SqliteStore;

type MemoryEngine = SyncEngine<MemoryFeed, SqliteStore>;

async fn make_engine(root: Value) -> (Arc<MemoryEngine>, MemoryFeed) {
    let feed = MemoryFeed::with_root(root);
    let store = SqliteStore::in_memory().await.unwrap();
    let engine = SyncEngine::new(Arc::new(feed.clone()), Arc::new(store))
        .with_image_validator(ImageUrlValidator::with_timeout(Duration::from_secs(1)));
    (Arc::new(engine), feed)
}

async fn eventually<Fut>(mut check: impl FnMut() -> Fut)
where
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

async fn truck(engine: &MemoryEngine, id: &str) -> Option<TruckRow> {
    RecordStore::<TruckRow>::find_by_id(engine.store().as_ref(), id)
        .await
        .unwrap()
}

async fn ticket(engine: &MemoryEngine, id: &str) -> Option<TicketRow> {
    RecordStore::<TicketRow>::find_by_id(engine.store().as_ref(), id)
        .await
        .unwrap()
}

#[tokio::test]
async fn ticket_without_number_is_named_after_its_id() {
    let (engine, _feed) = make_engine(json!({
        "tickets": { "d1": { "t1": { "sync_status": "synced", "time": 1_000 } } }
    }))
    .await;

    let report = engine.sync_entity(&engine.configs().tickets).await.unwrap();

    assert_eq!(report.written, 1);
    let row = ticket(&engine, "t1").await.unwrap();
    assert_eq!(row.nom, "Ticket_t1");
    assert_eq!(row.doc_type, "ticket");
    assert_eq!(row.last_touched, 1_000);
    assert_eq!(engine.store().count("tickets").await.unwrap(), 1);
}

#[tokio::test]
async fn expense_without_amount_defaults_to_zero() {
    let (engine, _feed) = make_engine(json!({
        "expenses": { "d1": { "x1": { "sync_status": "synced", "type": "fuel" } } }
    }))
    .await;

    engine.sync_entity(&engine.configs().expenses).await.unwrap();

    let row = RecordStore::<ExpenseRow>::find_by_id(engine.store().as_ref(), "x1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.amount, 0.0);
    assert_eq!(row.expense_type, "fuel");
}

#[tokio::test]
async fn ineligible_items_produce_no_write() {
    let (engine, _feed) = make_engine(json!({
        "trucks": {
            "d1": {
                "c1": { "sync_status": "pending", "name": "Volvo", "type": "benne" },
                "c2": { "name": "Scania", "type": "plateau" }
            }
        }
    }))
    .await;

    let report = engine.sync_entity(&engine.configs().trucks).await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.skipped, 2);
    assert_eq!(engine.store().count("trucks").await.unwrap(), 0);
}

#[tokio::test]
async fn truck_without_name_is_rejected() {
    let (engine, _feed) = make_engine(json!({
        "trucks": { "d1": { "c1": { "sync_status": "synced", "name": "", "type": "X" } } }
    }))
    .await;

    let report = engine.sync_entity(&engine.configs().trucks).await.unwrap();

    assert_eq!(report.rejected, 1);
    assert_eq!(report.written, 0);
    assert!(truck(&engine, "c1").await.is_none());
}

#[tokio::test]
async fn only_strictly_newer_items_replace_rows() {
    let item = |name: &str, time: i64| {
        json!({ "sync_status": "synced", "name": name, "type": "benne", "time": time })
    };
    let (engine, feed) =
        make_engine(json!({ "trucks": { "d1": { "c1": item("Volvo", 1_000) } } })).await;
    engine.sync_entity(&engine.configs().trucks).await.unwrap();

    feed.set("trucks/d1/c1", &item("Scania", 1_000)).await.unwrap();
    let report = engine.sync_entity(&engine.configs().trucks).await.unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(truck(&engine, "c1").await.unwrap().name, "Volvo");

    feed.set("trucks/d1/c1", &item("Scania", 2_000)).await.unwrap();
    let report = engine.sync_entity(&engine.configs().trucks).await.unwrap();
    assert_eq!(report.written, 1);
    let row = truck(&engine, "c1").await.unwrap();
    assert_eq!(row.name, "Scania");
    assert_eq!(row.last_touched, 2_000);
}

#[tokio::test]
async fn repeated_pass_on_unchanged_input_writes_nothing() {
    let (engine, _feed) = make_engine(json!({
        "trucks": {
            "d1": { "c1": { "sync_status": "synced", "name": "Volvo", "type": "benne", "time": 10 } },
            "d2": { "c2": { "sync_status": "synced", "name": "MAN", "type": "benne", "time": 20 } }
        }
    }))
    .await;

    let first = engine.sync_entity(&engine.configs().trucks).await.unwrap();
    let second = engine.sync_entity(&engine.configs().trucks).await.unwrap();

    assert_eq!(first.written, 2);
    assert_eq!(second.written, 0);
    assert_eq!(second.skipped, 2);
}

#[tokio::test]
async fn full_pass_keeps_rows_missing_remotely() {
    let (engine, feed) = make_engine(json!({
        "trucks": { "d1": { "c1": { "sync_status": "synced", "name": "Volvo", "type": "benne", "time": 10 } } }
    }))
    .await;
    engine.sync_entity(&engine.configs().trucks).await.unwrap();

    feed.remove("trucks/d1/c1").await.unwrap();
    let report = engine.sync_entity(&engine.configs().trucks).await.unwrap();

    assert_eq!(report.fetched, 0);
    assert!(truck(&engine, "c1").await.is_some());
}

#[tokio::test]
async fn pass_reads_configured_path() {
    let (engine, _feed) = make_engine(json!({
        "fleet": { "users": { "d1": { "u1": { "sync_status": "synced", "email": "a@b.c" } } } }
    }))
    .await;
    let config = EntitySyncConfig::users().with_path("fleet/users");

    let report = engine.sync_entity(&config).await.unwrap();

    assert_eq!(report.kind, EntityKind::Users);
    assert_eq!(report.written, 1);
}

#[tokio::test]
async fn image_urls_are_checked_before_mirroring() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/ok.jpg"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/gone.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (engine, _feed) = make_engine(json!({
        "tickets": {
            "d1": {
                "t1": { "sync_status": "synced", "imageUrl": format!("{}/ok.jpg", server.uri()) },
                "t2": { "sync_status": "synced", "imageUrl": format!("{}/gone.jpg", server.uri()) }
            }
        }
    }))
    .await;

    let report = engine.sync_entity(&engine.configs().tickets).await.unwrap();

    assert_eq!(report.written, 2);
    assert_eq!(
        ticket(&engine, "t1").await.unwrap().file_url,
        Some(format!("{}/ok.jpg", server.uri()))
    );
    assert_eq!(ticket(&engine, "t2").await.unwrap().file_url, None);
}

#[tokio::test]
async fn concurrent_reconciles_of_one_item_write_once() {
    let (engine, _feed) = make_engine(Value::Null).await;
    let config = &engine.configs().trucks;
    let item = json!({ "sync_status": "synced", "name": "Volvo", "type": "benne", "time": 42 });

    let (a, b) = tokio::join!(
        engine.reconcile_item(config, "c1", item.clone()),
        engine.reconcile_item(config, "c1", item),
    );

    let mut outcomes = [a, b];
    outcomes.sort_by_key(|outcome| *outcome == ItemOutcome::Written);
    assert_eq!(outcomes, [ItemOutcome::Skipped, ItemOutcome::Written]);
}

#[tokio::test]
async fn non_object_items_are_rejected() {
    let (engine, _feed) = make_engine(json!({ "trucks": { "d1": { "c1": "oops" } } })).await;

    let report = engine.sync_entity(&engine.configs().trucks).await.unwrap();

    assert_eq!(report.rejected, 1);
}

#[tokio::test]
async fn payload_id_takes_precedence_over_key() {
    let (engine, _feed) = make_engine(Value::Null).await;
    let item = json!({ "id": "c9", "sync_status": "synced", "name": "Volvo", "type": "benne" });

    let outcome = engine.reconcile_item(&engine.configs().trucks, "c1", item).await;

    assert_eq!(outcome, ItemOutcome::Written);
    assert!(truck(&engine, "c9").await.is_some());
    assert!(truck(&engine, "c1").await.is_none());
}

#[tokio::test]
async fn write_failure_is_counted_and_spares_siblings() {
    let (engine, _feed) = make_engine(json!({
        "trucks": { "d1": {
            "c1": { "sync_status": "synced", "name": "  ", "type": "benne" },
            "c2": { "sync_status": "synced", "name": "Scania", "type": "benne" }
        } }
    }))
    .await;
    let unchecked = EntitySyncConfig {
        validate: None,
        validate_row: None,
        ..EntitySyncConfig::trucks()
    };

    let report = engine.sync_entity(&unchecked).await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 1);
    assert!(truck(&engine, "c1").await.is_none());
    assert_eq!(truck(&engine, "c2").await.unwrap().name, "Scania");
}

#[tokio::test]
async fn sync_all_runs_every_kind() {
    let (engine, _feed) = make_engine(json!({
        "tickets": { "d1": { "t1": { "sync_status": "synced" } } },
        "users": { "d1": { "u1": { "sync_status": "synced" } } }
    }))
    .await;

    let reports = engine.sync_all().await.unwrap();

    let kinds: Vec<_> = reports.iter().map(|report| report.kind).collect();
    assert_eq!(kinds, EntityKind::ALL);
    let written: usize = reports.iter().map(|report| report.written).sum();
    assert_eq!(written, 2);
}

#[tokio::test]
async fn fetch_failure_fails_the_run_but_not_other_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tickets.json"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/trucks.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "d1": { "c1": { "sync_status": "synced", "name": "Volvo", "type": "benne" } }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
        .mount(&server)
        .await;

    let feed = FirebaseFeed::new(FirebaseClient::new(&server.uri()).unwrap());
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let engine = SyncEngine::new(Arc::new(feed), Arc::clone(&store));

    let err = engine.sync_all().await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Fetch {
            kind: EntityKind::Tickets,
            ..
        }
    ));
    assert_eq!(store.count("trucks").await.unwrap(), 1);
}

#[tokio::test]
async fn live_changes_are_mirrored() {
    let (engine, feed) = make_engine(json!({
        "tickets": { "d1": { "t1": { "sync_status": "synced", "time": 1 } } }
    }))
    .await;
    let mut handle = engine.start_realtime_sync().await.unwrap();
    assert_eq!(handle.kinds(), EntityKind::ALL);

    eventually(|| async { ticket(&engine, "t1").await.is_some() }).await;

    feed.set(
        "tickets/d2/t2",
        &json!({ "sync_status": "synced", "ticketNum": "77", "time": 2 }),
    )
    .await
    .unwrap();
    eventually(|| async { ticket(&engine, "t2").await.is_some() }).await;
    assert_eq!(ticket(&engine, "t2").await.unwrap().nom, "Ticket_77");

    assert!(
        tokio::time::timeout(Duration::from_millis(50), handle.closed())
            .await
            .is_err()
    );
    handle.shutdown();
}

#[tokio::test]
async fn live_bucket_with_malformed_sibling_still_mirrors_valid_items() {
    let bucket = json!({
        "c1": { "sync_status": "synced", "name": "Volvo", "type": "benne", "time": 1 },
        "junk": "oops"
    });

    let (full, _feed) = make_engine(json!({ "trucks": { "d1": bucket.clone() } })).await;
    let report = full.sync_entity(&full.configs().trucks).await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.rejected, 1);

    let (engine, feed) = make_engine(Value::Null).await;
    let handle = engine.start_realtime_sync().await.unwrap();
    feed.set("trucks/d1", &bucket).await.unwrap();

    eventually(|| async { truck(&engine, "c1").await.is_some() }).await;
    assert!(truck(&engine, "junk").await.is_none());
    handle.shutdown();
}

#[tokio::test]
async fn live_item_without_bucket_is_not_mirrored() {
    let (engine, feed) = make_engine(Value::Null).await;
    let handle = engine.start_realtime_sync().await.unwrap();

    feed.set(
        "trucks/c1",
        &json!({ "sync_status": "synced", "name": "Volvo", "type": "benne" }),
    )
    .await
    .unwrap();
    feed.set(
        "trucks/d1/c2",
        &json!({ "sync_status": "synced", "name": "Scania", "type": "benne" }),
    )
    .await
    .unwrap();

    eventually(|| async { truck(&engine, "c2").await.is_some() }).await;
    assert!(truck(&engine, "c1").await.is_none());
    handle.shutdown();
}

#[tokio::test]
async fn live_removal_deletes_row_even_when_local_is_newer() {
    let (engine, feed) = make_engine(json!({
        "trucks": { "d1": { "c1": { "sync_status": "synced", "name": "Volvo", "type": "benne", "time": 1 } } }
    }))
    .await;
    let local = TruckRow {
        id: "c1".into(),
        name: "Volvo".into(),
        truck_type: "benne".into(),
        registration: None,
        sync_status: "synced".into(),
        last_touched: i64::MAX,
        created_at: 0,
        updated_at: 0,
    };
    engine.store().upsert(&local).await.unwrap();

    let handle = engine.start_realtime_sync().await.unwrap();
    feed.remove("trucks/d1/c1").await.unwrap();

    eventually(|| async { truck(&engine, "c1").await.is_none() }).await;
    handle.shutdown();
}

#[tokio::test]
async fn realtime_sync_starts_once() {
    let (engine, _feed) = make_engine(Value::Null).await;

    let _handle = engine.start_realtime_sync().await.unwrap();

    assert!(matches!(
        engine.start_realtime_sync().await,
        Err(EngineError::AlreadyStarted)
    ));
}

#[tokio::test]
async fn failed_subscription_can_be_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let feed = FirebaseFeed::new(FirebaseClient::new(&server.uri()).unwrap());
    let engine = Arc::new(SyncEngine::new(
        Arc::new(feed),
        Arc::new(SqliteStore::in_memory().await.unwrap()),
    ));

    for _ in 0..2 {
        let err = engine.start_realtime_sync().await.err().unwrap();
        assert_eq!(err.kind(), Some(EntityKind::Tickets));
    }
}

#[tokio::test]
async fn cancelled_feed_closes_the_realtime_handle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string("event: cancel\ndata: permission denied\n\n"),
        )
        .mount(&server)
        .await;
    let feed = FirebaseFeed::new(FirebaseClient::new(&server.uri()).unwrap());
    let engine = Arc::new(SyncEngine::new(
        Arc::new(feed),
        Arc::new(SqliteStore::in_memory().await.unwrap()),
    ));

    let mut handle = engine.start_realtime_sync().await.unwrap();
    let kind = tokio::time::timeout(Duration::from_secs(5), handle.closed())
        .await
        .expect("listener should exit once its feed is cancelled");

    assert!(EntityKind::ALL.contains(&kind));
    assert!(!handle.kinds().contains(&kind));
}

#[test]
fn bucket_items_split_one_bucket() {
    let bucket = json!({ "c1": { "name": "A" }, "junk": "oops" });
    let items = bucket_items(EntityKind::Trucks, "d1", bucket);
    let keys: Vec<_> = items.iter().map(|(key, _)| key.as_str()).collect();
    assert_eq!(keys, ["c1", "junk"]);

    assert!(bucket_items(EntityKind::Trucks, "d1", json!("oops")).is_empty());
    assert!(bucket_items(EntityKind::Trucks, "d1", Value::Null).is_empty());
}

#[test]
fn bucket_leaves_skip_malformed_buckets() {
    let tree = json!({ "d1": { "c1": {} }, "d2": 5 });
    let leaves = bucket_leaves(EntityKind::Trucks, tree);
    assert_eq!(leaves, vec![("c1".to_string(), json!({}))]);
    assert!(bucket_leaves(EntityKind::Trucks, Value::Null).is_empty());
}
