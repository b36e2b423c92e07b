use super::*;
use shared::domain::FieldValue;

fn record_for(user_id: UserId) -> CommissionRecord {
    CommissionRecord {
        user_id,
        offer_id: None,
        category_name: "illustration".to_string(),
        type_name: "full-body".to_string(),
        subtype_name: None,
        base_price: 100.0,
        character_count: 1,
        extra_character_price: 0.0,
        usage_rights: UsageRights::Personal,
        allow_streaming: true,
        comm_specific_inputs: Vec::new(),
        addons: Vec::new(),
        reference_urls: Vec::new(),
        extra_info: None,
        status: CommissionStatus::Draft,
        total_price: 100.0,
        form_snapshot: None,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let suffix = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = std::env::temp_dir().join(format!("commission_storage_test_{suffix}"));
    let db_path = temp_root.join("nested").join("storage.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );

    std::fs::remove_dir_all(temp_root).expect("cleanup");
}

#[tokio::test]
async fn create_user_is_idempotent_per_username() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let first = storage.create_user("alice").await.expect("user");
    let second = storage.create_user("alice").await.expect("user again");
    assert_eq!(first, second);
}

#[tokio::test]
async fn username_prefers_display_name() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("alice").await.expect("user");

    assert_eq!(
        storage.username_for_user(user).await.expect("name"),
        Some("alice".to_string())
    );

    sqlx::query("UPDATE users SET display_name = 'Alice A.' WHERE id = ?")
        .bind(user.0)
        .execute(storage.pool())
        .await
        .expect("update");

    assert_eq!(
        storage.username_for_user(user).await.expect("name"),
        Some("Alice A.".to_string())
    );
}

#[tokio::test]
async fn offer_round_trips_with_templates() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let offer_id = storage
        .insert_offer(&NewOffer {
            category: PathChoice::named("illustration"),
            commission_type: PathChoice {
                name: "full-body".to_string(),
                price: Some(550.0),
                description: Some("full body render".to_string()),
            },
            subtype: None,
            base_price: 550.0,
            description: None,
            character_count: Some(CharacterPolicy {
                max: 3,
                price_per_extra: 50.0,
            }),
            comm_specific_inputs: vec![FieldTemplate {
                name: "pose notes".to_string(),
                kind: FieldKind::Text,
                price: None,
            }],
            addons: vec![FieldTemplate {
                name: "background".to_string(),
                kind: FieldKind::Boolean,
                price: Some(25.0),
            }],
            sort_order: 0,
        })
        .await
        .expect("offer");

    let offers = storage.list_active_offers().await.expect("offers");
    assert_eq!(offers.len(), 1);
    let offer = &offers[0];
    assert_eq!(offer.id, offer_id);
    assert_eq!(offer.base_price, 550.0);
    assert_eq!(
        offer.character_count,
        Some(CharacterPolicy {
            max: 3,
            price_per_extra: 50.0
        })
    );
    assert_eq!(offer.comm_specific_inputs.len(), 1);
    assert_eq!(offer.addons[0].price, Some(25.0));
}

#[tokio::test]
async fn inactive_offers_are_hidden() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let offer_id = storage
        .insert_offer(&NewOffer {
            category: PathChoice::named("retired"),
            commission_type: PathChoice::named("old-style"),
            subtype: None,
            base_price: 10.0,
            description: None,
            character_count: None,
            comm_specific_inputs: Vec::new(),
            addons: Vec::new(),
            sort_order: 0,
        })
        .await
        .expect("offer");

    sqlx::query("UPDATE commission_offers SET is_active = 0 WHERE id = ?")
        .bind(offer_id.0)
        .execute(storage.pool())
        .await
        .expect("deactivate");

    assert!(storage.list_active_offers().await.expect("offers").is_empty());
}

#[tokio::test]
async fn commission_round_trips_json_columns() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("bob").await.expect("user");

    let mut record = record_for(user);
    record.addons = vec![CustomField {
        name: "background".to_string(),
        value: FieldValue::Boolean(true),
        price: Some(25.0),
    }];
    record.reference_urls = vec!["https://example.com/ref.png".to_string()];
    record.form_snapshot = Some(CommissionDraft {
        base_price: 100.0,
        ..CommissionDraft::default()
    });

    let id = storage.insert_commission(&record).await.expect("insert");
    let loaded = storage
        .get_commission(id)
        .await
        .expect("get")
        .expect("exists");

    assert_eq!(loaded.user_id, user);
    assert_eq!(loaded.addons, record.addons);
    assert_eq!(loaded.reference_urls, record.reference_urls);
    assert_eq!(loaded.status, CommissionStatus::Draft);
    let snapshot = loaded.form_snapshot.expect("snapshot");
    assert_eq!(snapshot.base_price, 100.0);
}

#[tokio::test]
async fn update_replaces_the_stored_record() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("bob").await.expect("user");
    let id = storage
        .insert_commission(&record_for(user))
        .await
        .expect("insert");

    let mut record = record_for(user);
    record.total_price = 125.0;
    record.allow_streaming = false;
    assert!(storage.update_commission(id, &record).await.expect("update"));

    let loaded = storage
        .get_commission(id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(loaded.total_price, 125.0);
    assert!(!loaded.allow_streaming);

    let missing = storage
        .update_commission(CommissionId(9999), &record)
        .await
        .expect("update missing");
    assert!(!missing);
}

#[tokio::test]
async fn lists_are_newest_first_and_scoped() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let alice = storage.create_user("alice").await.expect("alice");
    let bob = storage.create_user("bob").await.expect("bob");

    let first = storage
        .insert_commission(&record_for(alice))
        .await
        .expect("first");
    let second = storage
        .insert_commission(&record_for(alice))
        .await
        .expect("second");
    storage
        .insert_commission(&record_for(bob))
        .await
        .expect("bob's");

    let mine = storage
        .list_commissions_for_user(alice)
        .await
        .expect("list");
    assert_eq!(mine.len(), 2);
    assert_eq!(mine[0].id, second);
    assert_eq!(mine[1].id, first);

    let all = storage.list_all_commissions().await.expect("all");
    assert_eq!(all.len(), 3);
    assert_eq!(all[0].1, Some("bob".to_string()));
}

#[tokio::test]
async fn status_update_stamps_the_workflow_column() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("bob").await.expect("user");
    let id = storage
        .insert_commission(&record_for(user))
        .await
        .expect("insert");

    assert!(storage
        .update_status(id, CommissionStatus::Wip)
        .await
        .expect("status"));
    let loaded = storage
        .get_commission(id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(loaded.status, CommissionStatus::Wip);
    assert!(loaded.work_started_at.is_some());
    assert!(loaded.completed_at.is_none());

    assert!(storage
        .update_status(id, CommissionStatus::Finished)
        .await
        .expect("status"));
    let loaded = storage
        .get_commission(id)
        .await
        .expect("get")
        .expect("exists");
    assert!(loaded.completed_at.is_some());
    // the earlier stamp survives later transitions
    assert!(loaded.work_started_at.is_some());
}

#[tokio::test]
async fn final_price_is_stored_separately_from_total() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("bob").await.expect("user");
    let id = storage
        .insert_commission(&record_for(user))
        .await
        .expect("insert");

    assert!(storage.set_final_price(id, 95.0).await.expect("price"));
    let loaded = storage
        .get_commission(id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(loaded.final_price, Some(95.0));
    assert_eq!(loaded.total_price, 100.0);
}

#[tokio::test]
async fn paginates_messages_oldest_first_within_pages() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("bob").await.expect("user");
    let id = storage
        .insert_commission(&record_for(user))
        .await
        .expect("insert");

    let first = storage
        .insert_message(id, user, MessageKind::Text, Some("first"), None)
        .await
        .expect("first");
    let second = storage
        .insert_message(id, user, MessageKind::Text, Some("second"), None)
        .await
        .expect("second");
    let third = storage
        .insert_message(id, user, MessageKind::Text, Some("third"), None)
        .await
        .expect("third");

    let newest_two = storage.list_messages(id, 2, None).await.expect("page");
    assert_eq!(newest_two.len(), 2);
    assert_eq!(newest_two[0].message_id, second.message_id);
    assert_eq!(newest_two[1].message_id, third.message_id);

    let older = storage
        .list_messages(id, 2, Some(second.message_id))
        .await
        .expect("older page");
    assert_eq!(older.len(), 1);
    assert_eq!(older[0].message_id, first.message_id);
}

#[tokio::test]
async fn stores_and_loads_file_blobs() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let user = storage.create_user("dave").await.expect("user");

    let file_id = storage
        .store_file(
            user,
            None,
            "uploads/abc123",
            b"png-bytes",
            Some("image/png"),
            Some("sketch.png"),
        )
        .await
        .expect("store");

    let file = storage
        .load_file(file_id)
        .await
        .expect("load")
        .expect("exists");
    assert_eq!(file.uploader_id, user);
    assert_eq!(file.object_key, "uploads/abc123");
    assert_eq!(file.data, b"png-bytes");
    assert_eq!(file.size_bytes, 9);
    assert_eq!(file.mime_type.as_deref(), Some("image/png"));
}
