//! End-to-end tests for the compose + filter pipeline over in-memory
//! events and subscribers (the persistence layer is exercised separately;
//! these cover the decision logic the ledger rows are built from).

use notifier_core::common::geo::Coords;
use notifier_core::domains::changelog::models::{ChangeEvent, ChangeKind, TopicType};
use notifier_core::domains::compose::common::{compose_common, location_coords, CommonPayload};
use notifier_core::domains::compose::personal::compose_personal;
use notifier_core::domains::subscribers::filters::{filter_subscribers, FilterContext};
use notifier_core::domains::subscribers::models::Subscriber;

fn status_change_event() -> ChangeEvent {
    ChangeEvent {
        change_log_id: 1,
        topic_id: 100,
        change_kind_raw: 1,
        change_kind: Some(ChangeKind::StatusChange),
        topic_type: Some(TopicType::Search),
        status: Some("Завершен".to_string()),
        new_value: Some("Завершен".to_string()),
        forum_folder_id: Some(200),
        region_name: Some("Свердловская область".to_string()),
        clickable_name: "<a href=\"t\">Иванов Иван, 45 лет</a>".to_string(),
        ..ChangeEvent::default()
    }
}

fn unrestricted_subscriber(user_id: i64) -> Subscriber {
    let mut sub = Subscriber::new(user_id);
    sub.all_kinds = true;
    sub.new_search_count = 100; // off the tip cadence
    sub
}

#[test]
fn status_change_produces_one_text_and_no_location() {
    let event = status_change_event();

    let payload = compose_common(&event).expect("status change composes");
    assert_eq!(location_coords(&event, &payload), None);

    let ctx = FilterContext::default();
    let survivors = filter_subscribers(vec![unrestricted_subscriber(1)], &event, &ctx);
    assert_eq!(survivors.len(), 1);

    let text = compose_personal(&event, &payload, &survivors[0]);
    assert!(text.contains("Поиск завершён"));
}

#[test]
fn new_topic_radius_excludes_far_subscriber() {
    let mut event = status_change_event();
    event.change_kind = Some(ChangeKind::NewTopic);
    event.change_kind_raw = 0;
    event.status = Some("Ищем".to_string());
    event.coords = Some(Coords::new(56.83, 60.6));

    let mut sub = unrestricted_subscriber(1);
    sub.radius_km = Some(10.0);
    // ~50 km south of the headquarters
    sub.home_coords = Some(Coords::new(56.38, 60.6));

    let ctx = FilterContext::default();
    let survivors = filter_subscribers(vec![sub], &event, &ctx);
    assert!(survivors.is_empty());
}

#[test]
fn new_topic_within_radius_gets_text_and_location_pair() {
    let mut event = status_change_event();
    event.change_kind = Some(ChangeKind::NewTopic);
    event.change_kind_raw = 0;
    event.status = Some("Ищем".to_string());
    event.coords = Some(Coords::new(56.83, 60.6));

    let mut sub = unrestricted_subscriber(1);
    sub.radius_km = Some(100.0);
    sub.home_coords = Some(Coords::new(56.38, 60.6));

    let ctx = FilterContext::default();
    let survivors = filter_subscribers(vec![sub], &event, &ctx);
    assert_eq!(survivors.len(), 1);

    let payload = compose_common(&event).expect("fresh topic composes");
    assert!(event.change_kind.unwrap().pairs_location());
    assert_eq!(
        location_coords(&event, &payload),
        Some(Coords::new(56.83, 60.6))
    );

    let text = compose_personal(&event, &payload, &survivors[0]);
    assert!(text.contains("Новый поиск"));
    assert!(text.contains("От вас примерно"));
}

#[test]
fn ignored_event_yields_no_message() {
    let mut event = status_change_event();
    event.change_kind = Some(ChangeKind::NewTopic);
    event.ignore = true;

    assert!(compose_common(&event).is_none());
}

#[test]
fn retried_cycle_skips_already_notified_user() {
    let event = status_change_event();

    let mut ctx = FilterContext::default();
    // first pass notified user 1; a retried cycle sees the ledger row
    ctx.already_notified.insert(1);

    let survivors = filter_subscribers(
        vec![unrestricted_subscriber(1), unrestricted_subscriber(2)],
        &event,
        &ctx,
    );
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].user_id, 2);
}

#[test]
fn first_post_change_pairs_new_coordinates() {
    let mut event = status_change_event();
    event.change_kind = Some(ChangeKind::FirstPostChange);
    event.change_kind_raw = 8;
    event.status = Some("Ищем".to_string());
    event.new_value =
        Some(r#"{"del": [], "add": ["Штаб: 56.8100, 60.6000"]}"#.to_string());

    let payload = compose_common(&event).expect("diff composes");
    match &payload {
        CommonPayload::FirstPostChange { new_coords, .. } => {
            assert!(new_coords.is_some());
        }
        other => panic!("unexpected payload: {:?}", other),
    }
    assert!(location_coords(&event, &payload).is_some());
}
