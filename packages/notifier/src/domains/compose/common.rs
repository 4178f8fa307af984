//! User-independent message composition.
//!
//! One tagged payload shape per change kind; the personal pass (see
//! `personal`) assembles the final text per recipient. Returning `None`
//! means the event yields no message at all (empty digest, empty diff).

use crate::common::geo::{self, Coords};
use crate::common::text::{escape_angle_brackets, linkify_phones, truncate_visible};
use crate::domains::changelog::models::{
    status_wording, ChangeEvent, ChangeKind, FirstPostDiff, TopicType,
};

/// Visible length cap per quoted comment.
pub const COMMENT_VISIBLE_LIMIT: usize = 500;

/// Change-kind-specific common payload, composed once per event.
#[derive(Debug, Clone, PartialEq)]
pub enum CommonPayload {
    NewTopic {
        activities: String,
        name_line: String,
        managers: String,
    },
    StatusChange {
        wording: String,
    },
    TitleChange {
        text: String,
    },
    CommentsDigest {
        digest: String,
    },
    InforgComments {
        author: Option<String>,
        digest: String,
    },
    FirstPostChange {
        body: String,
        coord_shift: Option<String>,
        new_coords: Option<Coords>,
    },
}

/// Compose the common part for an enriched event.
pub fn compose_common(event: &ChangeEvent) -> Option<CommonPayload> {
    if event.ignore {
        return None;
    }
    match event.change_kind? {
        ChangeKind::NewTopic => Some(compose_new_topic(event)),
        ChangeKind::StatusChange => Some(CommonPayload::StatusChange {
            wording: status_wording(
                event
                    .new_value
                    .as_deref()
                    .or(event.status.as_deref())
                    .unwrap_or(""),
            ),
        }),
        ChangeKind::TitleChange => Some(CommonPayload::TitleChange {
            text: format!(
                "Изменение названия темы: {}",
                event.title.as_deref().unwrap_or("(без названия)")
            ),
        }),
        ChangeKind::CommentNew => {
            let digest = comments_digest(event);
            if digest.is_empty() {
                return None;
            }
            Some(CommonPayload::CommentsDigest { digest })
        }
        ChangeKind::InforgCommentNew => {
            let digest = comments_digest(event);
            if digest.is_empty() {
                return None;
            }
            let author = event
                .inforg_comments
                .iter()
                .find_map(|c| c.author_nickname.clone())
                .map(|a| escape_angle_brackets(&a));
            Some(CommonPayload::InforgComments { author, digest })
        }
        ChangeKind::FirstPostChange => compose_first_post_change(event),
    }
}

/// Coordinates to attach as a location message, when the kind pairs one.
pub fn location_coords(event: &ChangeEvent, payload: &CommonPayload) -> Option<Coords> {
    match payload {
        CommonPayload::NewTopic { .. } => event.coords,
        CommonPayload::FirstPostChange { new_coords, .. } => *new_coords,
        _ => None,
    }
}

fn compose_new_topic(event: &ChangeEvent) -> CommonPayload {
    let activities = event.activities.join("\n");

    let banner = if event.topic_type == Some(TopicType::Event) {
        "Мероприятие! "
    } else {
        ""
    };
    let name_line = format!("{}{}{}", event.topic_emoji, banner, event.clickable_name);

    let managers = event
        .managers
        .iter()
        .map(|m| format!("• {}", linkify_phones(m)))
        .collect::<Vec<_>>()
        .join("\n");

    CommonPayload::NewTopic {
        activities,
        name_line,
        managers,
    }
}

/// Bulleted digest of the event's pending comments.
fn comments_digest(event: &ChangeEvent) -> String {
    let mut lines = Vec::new();
    for comment in event.relevant_comments() {
        let text = comment.comment_text.as_deref().unwrap_or("").trim();
        if text.is_empty() {
            continue;
        }
        let author = escape_angle_brackets(comment.author_nickname.as_deref().unwrap_or("аноним"));
        let body = linkify_phones(&truncate_visible(text, COMMENT_VISIBLE_LIMIT));
        lines.push(format!("• <i>{}</i>: {}", author, body));
    }
    lines.join("\n")
}

fn compose_first_post_change(event: &ChangeEvent) -> Option<CommonPayload> {
    let diff = FirstPostDiff::parse(event.new_value.as_deref().unwrap_or(""));
    if diff.is_empty() {
        return None;
    }

    let mut blocks = Vec::new();
    if !diff.deletions.is_empty() {
        let deleted = diff
            .deletions
            .iter()
            .map(|line| format!("<s>{}</s>", line))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(format!("Удалено:\n{}", deleted));
    }
    if !diff.additions.is_empty() {
        let added = diff
            .additions
            .iter()
            .map(|line| wrap_coords(line))
            .collect::<Vec<_>>()
            .join("\n");
        blocks.push(format!("Добавлено:\n{}", added));
    }
    if !diff.message.trim().is_empty() {
        blocks.push(diff.message.trim().to_string());
    }
    if blocks.is_empty() {
        return None;
    }

    let old_coords = diff.deletions.iter().find_map(|l| geo::extract_coords(l));
    let new_coords = diff.additions.iter().find_map(|l| geo::extract_coords(l));

    let coord_shift = match (old_coords, new_coords) {
        (Some(old), Some(new)) => {
            let (km, direction) = geo::distance_and_direction(old, new);
            Some(format!(
                "Штаб переместился примерно на {} ({})",
                geo::distance_phrase(km),
                direction
            ))
        }
        _ => None,
    };

    Some(CommonPayload::FirstPostChange {
        body: blocks.join("\n\n"),
        coord_shift,
        new_coords,
    })
}

/// Wrap coordinate substrings in `<code>` so they stand out and copy
/// cleanly in the chat client.
fn wrap_coords(line: &str) -> String {
    match geo::extract_coords(line) {
        Some(_) => format!("<code>{}</code>", line),
        None => line.to_string(),
    }
}
