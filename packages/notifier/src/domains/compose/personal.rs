//! Per-recipient message rendering.
//!
//! Takes the cached common payload and tailors it: region disambiguation
//! for multi-region users, distance/direction and map links for search
//! topics, and the decaying-frequency usage tips.

use crate::common::geo::{self, Coords};
use crate::domains::changelog::models::{ChangeEvent, TopicType};
use crate::domains::subscribers::models::Subscriber;

use super::common::CommonPayload;

const TIP_COPY_COORDS: &str = "💡 Координаты из сообщения можно скопировать одним нажатием \
и вставить в навигатор.";
const TIP_HOME_COORDS: &str = "💡 Отправьте боту свои домашние координаты, и он будет \
показывать расстояние и направление до каждого поиска.";

/// Compose the final personalized text for one subscriber.
pub fn compose_personal(
    event: &ChangeEvent,
    payload: &CommonPayload,
    subscriber: &Subscriber,
) -> String {
    let region = region_qualifier(event, subscriber);

    match payload {
        CommonPayload::NewTopic {
            activities,
            name_line,
            managers,
        } => {
            let header = if event.topic_type == Some(TopicType::Event) {
                format!("Новое мероприятие{}!", region)
            } else {
                format!("Новый поиск{}!", region)
            };
            let mut parts = vec![header];
            if !activities.is_empty() {
                parts.push(activities.clone());
            }
            parts.push(name_line.clone());
            if !managers.is_empty() {
                parts.push(managers.clone());
            }

            let is_search = event.topic_type.map(TopicType::is_search).unwrap_or(false);
            if is_search {
                if let Some(line) = distance_line(event.coords, subscriber.home_coords) {
                    parts.push(line);
                }
                if let Some(link) = map_link(event.coords, subscriber.home_coords) {
                    parts.push(link);
                }
                if let Some(tip) = tip_for_count(subscriber.new_search_count + 1) {
                    parts.push(tip.to_string());
                }
            }
            parts.join("\n\n")
        }
        CommonPayload::StatusChange { wording } => {
            format!("{} — {}{}", wording, event.clickable_name, region)
        }
        CommonPayload::TitleChange { text } => {
            format!("{} — {}{}", text, event.clickable_name, region)
        }
        CommonPayload::CommentsDigest { digest } => format!(
            "Новые комментарии по поиску {}{}:\n{}",
            event.clickable_name, region, digest
        ),
        CommonPayload::InforgComments { author, digest } => {
            let attribution = author
                .as_deref()
                .map(|a| format!(" ({})", a))
                .unwrap_or_default();
            format!(
                "Сообщение Инфорга{} по поиску {}{}:\n{}",
                attribution, event.clickable_name, region, digest
            )
        }
        CommonPayload::FirstPostChange { body, coord_shift, .. } => {
            let mut text = format!(
                "Изменения в первом посте по поиску {}{}:\n\n{}",
                event.clickable_name, region, body
            );
            if let Some(shift) = coord_shift {
                text.push_str("\n\n");
                text.push_str(shift);
            }
            text
        }
    }
}

/// Single-region subscribers never see the redundant region tag.
fn region_qualifier(event: &ChangeEvent, subscriber: &Subscriber) -> String {
    if !subscriber.multi_region {
        return String::new();
    }
    match event.region_name.as_deref() {
        Some(region) if !region.is_empty() => format!(" ({})", region),
        _ => String::new(),
    }
}

fn distance_line(topic: Option<Coords>, home: Option<Coords>) -> Option<String> {
    let (topic, home) = (topic?, home?);
    let (km, direction) = geo::distance_and_direction(home, topic);
    Some(format!(
        "От вас примерно {} на {}",
        geo::distance_phrase(km),
        direction
    ))
}

/// Generic map link when only the topic is located; personalized anchor
/// when the subscriber's home is known too.
fn map_link(topic: Option<Coords>, home: Option<Coords>) -> Option<String> {
    let topic = topic?;
    let url = format!(
        "https://yandex.ru/maps/?pt={},{}&z=11&l=map",
        topic.lon, topic.lat
    );
    let anchor = match home {
        Some(home) => {
            let (km, direction) = geo::distance_and_direction(home, topic);
            format!(
                "Карта поиска ({} на {})",
                geo::distance_phrase(km),
                direction
            )
        }
        None => "Карта поиска".to_string(),
    };
    Some(format!("<a href=\"{}\">{}</a>", url, anchor))
}

/// Tips decay in frequency: shown when the lifetime counter (including
/// this notification) lands on a Fibonacci number. The two tips rotate.
fn tip_for_count(count: i64) -> Option<&'static str> {
    if !is_fibonacci(count) {
        return None;
    }
    if count % 2 == 1 {
        Some(TIP_COPY_COORDS)
    } else {
        Some(TIP_HOME_COORDS)
    }
}

/// True for 1, 2, 3, 5, 8, 13, 21, ...
pub fn is_fibonacci(n: i64) -> bool {
    if n < 1 {
        return false;
    }
    let (mut a, mut b) = (1i64, 1i64);
    while b < n {
        let next = a + b;
        a = b;
        b = next;
    }
    b == n
}
