//! Database-backed tests for the durable notification ledger.
//!
//! These need a reachable Postgres; set TEST_DATABASE_URL to run them.
//! Without it each test returns early, so the suite stays green in
//! environments without a database.

use chrono::Utc;
use sqlx::PgPool;

use notifier_core::common::geo::Coords;
use notifier_core::domains::changelog::models::{ChangeEvent, ChangeKind};
use notifier_core::domains::compose::common::compose_common;
use notifier_core::domains::mailing::maker::make_notifications;
use notifier_core::domains::mailing::models::{
    allocate_mailing, persist_notification, DeliveryParams, MessageKind,
};
use notifier_core::domains::subscribers::models::Subscriber;

async fn test_pool() -> Option<PgPool> {
    let db_url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPool::connect(&db_url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to run migrations");
    Some(pool)
}

/// Distinct per test run so reruns never collide on the unique key.
fn fresh_change_log_id() -> i64 {
    Utc::now().timestamp_micros()
}

async fn ledger_rows(pool: &PgPool, change_log_id: i64, kind: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notif_by_user WHERE change_log_id = $1 AND message_kind = $2",
    )
    .bind(change_log_id)
    .bind(kind)
    .fetch_one(pool)
    .await
    .expect("count query failed");
    count
}

fn new_topic_event(change_log_id: i64) -> ChangeEvent {
    ChangeEvent {
        change_log_id,
        topic_id: 100,
        change_kind_raw: 0,
        change_kind: Some(ChangeKind::NewTopic),
        status: Some("Ищем".to_string()),
        coords: Some(Coords::new(56.83, 60.6)),
        clickable_name: "<a href=\"t\">Иванов Иван, 45 лет</a>".to_string(),
        ..ChangeEvent::default()
    }
}

#[tokio::test]
async fn duplicate_persist_keeps_a_single_ledger_row() {
    let Some(pool) = test_pool().await else { return };

    let change_log_id = fresh_change_log_id();
    let event = new_topic_event(change_log_id);
    let mailing_id = allocate_mailing(&pool, &event).await.unwrap();

    let first = persist_notification(
        &pool,
        mailing_id,
        42,
        Some("<b>Новый поиск</b>"),
        Some("Новый поиск"),
        MessageKind::Text,
        &DeliveryParams::Text { parse_mode: "HTML" },
        None,
        change_log_id,
    )
    .await
    .unwrap();
    assert!(first);

    let second = persist_notification(
        &pool,
        mailing_id,
        42,
        Some("<b>Новый поиск</b>"),
        Some("Новый поиск"),
        MessageKind::Text,
        &DeliveryParams::Text { parse_mode: "HTML" },
        None,
        change_log_id,
    )
    .await
    .unwrap();
    assert!(!second, "second insert must hit the unique key");

    assert_eq!(ledger_rows(&pool, change_log_id, "text").await, 1);
}

#[tokio::test]
async fn retried_maker_pass_backfills_missing_location_row() {
    let Some(pool) = test_pool().await else { return };

    let change_log_id = fresh_change_log_id();
    let event = new_topic_event(change_log_id);
    let payload = compose_common(&event).expect("new topic composes");

    // First pass died after the text insert, before the location insert.
    let mailing_id = allocate_mailing(&pool, &event).await.unwrap();
    let inserted = persist_notification(
        &pool,
        mailing_id,
        7,
        Some("<b>Новый поиск</b>"),
        Some("Новый поиск"),
        MessageKind::Text,
        &DeliveryParams::Text { parse_mode: "HTML" },
        None,
        change_log_id,
    )
    .await
    .unwrap();
    assert!(inserted);

    let mut sub = Subscriber::new(7);
    sub.all_kinds = true;
    sub.new_search_count = 100;

    let outcome = make_notifications(&pool, &event, &payload, &[sub])
        .await
        .unwrap();

    // The text conflict is absorbed; only the location row is new, and
    // the stats recipient list stays empty for the duplicate text.
    assert_eq!(outcome.persisted_rows, 1);
    assert!(outcome.new_search_recipients.is_empty());
    assert_eq!(ledger_rows(&pool, change_log_id, "text").await, 1);
    assert_eq!(ledger_rows(&pool, change_log_id, "coords").await, 1);
}
