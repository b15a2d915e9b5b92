use super::*;

async fn make_store() -> SqliteStore {
    SqliteStore::in_memory().await.unwrap()
}

fn truck(id: &str, name: &str, last_touched: i64) -> TruckRow {
    TruckRow {
        id: id.into(),
        name: name.into(),
        truck_type: "benne".into(),
        registration: Some("AB-123-CD".into()),
        sync_status: "synced".into(),
        last_touched,
        created_at: last_touched,
        updated_at: last_touched,
    }
}

#[tokio::test]
async fn upsert_and_fetch_truck() {
    let store = make_store().await;
    let row = truck("c1", "Volvo", 10);

    store.upsert(&row).await.unwrap();
    let fetched = RecordStore::<TruckRow>::find_by_id(&store, "c1").await.unwrap();

    assert_eq!(fetched, Some(row));
}

#[tokio::test]
async fn upsert_replaces_existing_row() {
    let store = make_store().await;
    store.upsert(&truck("c1", "Volvo", 10)).await.unwrap();
    store.upsert(&truck("c1", "Scania", 20)).await.unwrap();

    let fetched = RecordStore::<TruckRow>::find_by_id(&store, "c1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.name, "Scania");
    assert_eq!(fetched.last_touched, 20);
    assert_eq!(store.count("trucks").await.unwrap(), 1);
}

#[tokio::test]
async fn blank_truck_name_violates_check_constraint() {
    let store = make_store().await;
    let err = store.upsert(&truck("c1", "  ", 10)).await.unwrap_err();
    assert!(matches!(err, StoreError::Sqlx(_)));
}

#[tokio::test]
async fn destroy_reports_whether_a_row_existed() {
    let store = make_store().await;
    store.upsert(&truck("c1", "Volvo", 10)).await.unwrap();

    assert!(RecordStore::<TruckRow>::destroy(&store, "c1").await.unwrap());
    assert!(!RecordStore::<TruckRow>::destroy(&store, "c1").await.unwrap());
    let fetched = RecordStore::<TruckRow>::find_by_id(&store, "c1").await.unwrap();
    assert!(fetched.is_none());
}

#[tokio::test]
async fn ticket_round_trips_nullable_columns() {
    let store = make_store().await;
    let row = TicketRow {
        id: "t1".into(),
        nom: "Ticket_t1".into(),
        doc_type: "pesee".into(),
        file_url: None,
        driver_id: Some("d1".into()),
        expiration_date: None,
        ticket_num: None,
        date_entree: Some(1_714_550_400_000),
        date_sortie: None,
        truck_id: None,
        product: Some("gravier".into()),
        net_weight: Some(12.5),
        extra_data: "{}".into(),
        sync_status: "synced".into(),
        last_touched: 1_714_521_600_000,
    };

    store.upsert(&row).await.unwrap();
    let fetched = RecordStore::<TicketRow>::find_by_id(&store, "t1").await.unwrap();

    assert_eq!(fetched, Some(row));
}

#[tokio::test]
async fn expense_and_user_rows_are_separate_tables() {
    let store = make_store().await;
    store
        .upsert(&ExpenseRow {
            id: "x1".into(),
            driver_id: Some("d1".into()),
            expense_type: "fuel".into(),
            entry_type: "expense".into(),
            date: Some("2024-05-01".into()),
            quantity: None,
            amount: 0.0,
            description: None,
            location: None,
            payment_method: None,
            image_url: None,
            sync_status: "synced".into(),
            last_touched: 1,
            admin_id: None,
        })
        .await
        .unwrap();

    let user = RecordStore::<UserRow>::find_by_id(&store, "x1").await.unwrap();
    assert!(user.is_none());
    assert_eq!(store.count("expenses").await.unwrap(), 1);
    assert_eq!(store.count("users").await.unwrap(), 0);
}

#[tokio::test]
async fn rows_written_elsewhere_without_touch_time_read_as_epoch() {
    let store = make_store().await;
    sqlx::query(
        "INSERT INTO mileage (id, sync_status, extra_data, last_touched) VALUES ('m1', 'synced', '{}', NULL)",
    )
    .execute(&store.pool)
    .await
    .unwrap();

    let row = RecordStore::<MileageRow>::find_by_id(&store, "m1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.last_touched, 0);
}

#[tokio::test]
async fn file_backed_store_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested/fleet.db");
    let url = format!("sqlite://{}", db_path.display());

    let store = SqliteStore::new(&url).await.unwrap();
    store.upsert(&truck("c1", "Volvo", 1)).await.unwrap();

    assert!(db_path.exists());
}
