//! Core data model for change-log events.
//!
//! One `ChangeEvent` is the unit of work for a whole notification cycle:
//! extracted from the change log, enriched from the topic tables, consumed
//! read-only by composition and filtering, terminally marked processed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::common::geo::Coords;

/// Kind of change detected by the upstream scraper.
///
/// Values mirror the change_log.change_kind column; preference kind ids
/// use the same numbering (plus 30 for "all kinds").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i16)]
pub enum ChangeKind {
    NewTopic = 0,
    StatusChange = 1,
    TitleChange = 2,
    CommentNew = 3,
    InforgCommentNew = 4,
    FirstPostChange = 8,
}

/// A change_kind value this engine does not understand; the row is marked
/// processed/ignored instead of wedging the queue.
#[derive(Debug, thiserror::Error)]
#[error("unknown change kind {0}")]
pub struct UnknownChangeKind(pub i16);

impl TryFrom<i16> for ChangeKind {
    type Error = UnknownChangeKind;

    fn try_from(value: i16) -> Result<Self, UnknownChangeKind> {
        match value {
            0 => Ok(Self::NewTopic),
            1 => Ok(Self::StatusChange),
            2 => Ok(Self::TitleChange),
            3 => Ok(Self::CommentNew),
            4 => Ok(Self::InforgCommentNew),
            8 => Ok(Self::FirstPostChange),
            other => Err(UnknownChangeKind(other)),
        }
    }
}

impl ChangeKind {

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Kinds that pair the text message with a location message when
    /// usable coordinates exist.
    pub fn pairs_location(self) -> bool {
        matches!(self, Self::NewTopic | Self::FirstPostChange)
    }
}

/// Preference kind id meaning "all notification kinds".
pub const PREF_KIND_ALL: i16 = 30;

/// Topic-type preference id meaning "any topic type".
pub const PREF_TOPIC_TYPE_ANY: i16 = 30;

/// Topic type as tracked on the forum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum TopicType {
    Search = 0,
    SearchReverse = 1,
    SearchPatrol = 2,
    SearchTraining = 3,
    SearchInfoSupport = 4,
    SearchResonance = 5,
    Event = 10,
    Info = 20,
}

impl TopicType {
    pub fn from_i16(value: i16) -> Option<Self> {
        match value {
            0 => Some(Self::Search),
            1 => Some(Self::SearchReverse),
            2 => Some(Self::SearchPatrol),
            3 => Some(Self::SearchTraining),
            4 => Some(Self::SearchInfoSupport),
            5 => Some(Self::SearchResonance),
            10 => Some(Self::Event),
            20 => Some(Self::Info),
            _ => None,
        }
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }

    /// Search-flavoured types get distance lines and map links in the
    /// personalized rendering; events and info posts do not.
    pub fn is_search(self) -> bool {
        matches!(
            self,
            Self::Search
                | Self::SearchReverse
                | Self::SearchPatrol
                | Self::SearchTraining
                | Self::SearchInfoSupport
                | Self::SearchResonance
        )
    }
}

/// Fixed emoji tag per topic type; unknown type ids render as empty.
pub fn topic_type_emoji(topic_type: Option<TopicType>) -> &'static str {
    match topic_type {
        Some(TopicType::Search) => "",
        Some(TopicType::SearchReverse) => "🔄",
        Some(TopicType::SearchPatrol) => "🚓",
        Some(TopicType::SearchTraining) => "🎓",
        Some(TopicType::SearchInfoSupport) => "🛰",
        Some(TopicType::SearchResonance) => "📢",
        Some(TopicType::Event) => "🗓",
        Some(TopicType::Info) => "ℹ️",
        None => "",
    }
}

/// Active status on the forum.
pub const STATUS_SEARCHING: &str = "Ищем";

/// Statuses after which per-topic follow/mute markers no longer apply.
pub const TERMINAL_STATUSES: [&str; 4] = ["Завершен", "НЖ", "НП", "Найден"];

pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// Rewrite the two well-known status codes to friendlier wording; pass
/// everything else through verbatim.
pub fn status_wording(new_status: &str) -> String {
    match new_status {
        "Ищем" | "Возобновлен" => "Поиск возобновлён".to_string(),
        "Завершен" => "Поиск завершён".to_string(),
        other => other.to_string(),
    }
}

/// Parsed first-post diff.
///
/// The scraper stores either a strict JSON object `{"del": [...], "add":
/// [...]}` or a bare message string. Missing keys read as empty lists;
/// anything unparseable degrades to a plain message, never an error.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FirstPostDiff {
    #[serde(default, rename = "del")]
    pub deletions: Vec<String>,
    #[serde(default, rename = "add")]
    pub additions: Vec<String>,
    #[serde(skip)]
    pub message: String,
}

impl FirstPostDiff {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.starts_with('{') {
            if let Ok(diff) = serde_json::from_str::<FirstPostDiff>(trimmed) {
                return diff;
            }
        }
        Self {
            message: raw.to_string(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.additions.is_empty() && self.message.trim().is_empty()
    }
}

/// One forum comment pending notification.
#[derive(Debug, Clone, FromRow)]
pub struct Comment {
    pub id: i64,
    pub author_nickname: Option<String>,
    pub author_role: Option<String>,
    pub comment_text: Option<String>,
}

/// The enriched unit of work for one cycle.
///
/// Created from one change_log row, then mutated in place by each
/// enrichment step; a failed step leaves its field at the default.
#[derive(Debug, Clone, Default)]
pub struct ChangeEvent {
    pub change_log_id: i64,
    pub topic_id: i64,
    pub change_kind_raw: i16,
    pub change_kind: Option<ChangeKind>,
    pub new_value: Option<String>,

    // joined topic attributes
    pub topic_type: Option<TopicType>,
    pub status: Option<String>,
    pub title: Option<String>,
    pub display_name: Option<String>,
    pub family_name: Option<String>,
    pub age: Option<i32>,
    pub age_range: Option<(i32, i32)>,
    pub forum_folder_id: Option<i64>,
    pub region_name: Option<String>,
    pub coords: Option<Coords>,
    pub place_coords: Vec<Coords>,
    pub start_time: Option<DateTime<Utc>>,

    // joined collections
    pub activities: Vec<String>,
    pub managers: Vec<String>,
    pub comments: Vec<Comment>,
    pub inforg_comments: Vec<Comment>,

    // derived display attributes
    pub clickable_name: String,
    pub topic_emoji: &'static str,

    pub ignore: bool,
}

impl ChangeEvent {
    /// Comments relevant to this event's notification channel.
    pub fn relevant_comments(&self) -> &[Comment] {
        match self.change_kind {
            Some(ChangeKind::InforgCommentNew) => &self.inforg_comments,
            _ => &self.comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_kind_roundtrip() {
        assert_eq!(ChangeKind::try_from(0i16).unwrap(), ChangeKind::NewTopic);
        assert_eq!(
            ChangeKind::try_from(8i16).unwrap(),
            ChangeKind::FirstPostChange
        );
        assert!(ChangeKind::try_from(99i16).is_err());
        assert_eq!(ChangeKind::InforgCommentNew.as_i16(), 4);
    }

    #[test]
    fn test_topic_type_emoji_unknown_is_empty() {
        assert_eq!(topic_type_emoji(None), "");
        assert_eq!(topic_type_emoji(Some(TopicType::Event)), "🗓");
    }

    #[test]
    fn test_status_wording_rewrites() {
        assert_eq!(status_wording("Завершен"), "Поиск завершён");
        assert_eq!(status_wording("Ищем"), "Поиск возобновлён");
        assert_eq!(status_wording("СТОП"), "СТОП");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal_status("Завершен"));
        assert!(is_terminal_status("НЖ"));
        assert!(!is_terminal_status("Ищем"));
    }

    #[test]
    fn test_diff_parse_structured() {
        let diff = FirstPostDiff::parse(r#"{"del": ["штаб свернут"], "add": ["штаб работает"]}"#);
        assert_eq!(diff.deletions, vec!["штаб свернут"]);
        assert_eq!(diff.additions, vec!["штаб работает"]);
        assert!(diff.message.is_empty());
    }

    #[test]
    fn test_diff_parse_bare_string() {
        let diff = FirstPostDiff::parse("первый пост обновлён");
        assert!(diff.deletions.is_empty());
        assert!(diff.additions.is_empty());
        assert_eq!(diff.message, "первый пост обновлён");
    }

    #[test]
    fn test_diff_parse_missing_key() {
        let diff = FirstPostDiff::parse(r#"{"add": ["новый штаб"]}"#);
        assert!(diff.deletions.is_empty());
        assert_eq!(diff.additions, vec!["новый штаб"]);
    }

    #[test]
    fn test_diff_parse_malformed_never_throws() {
        let diff = FirstPostDiff::parse(r#"{"del": "#);
        assert!(diff.deletions.is_empty());
        assert!(diff.additions.is_empty());
        assert_eq!(diff.message, r#"{"del": "#);
    }
}
