//! Update domain logic
//!
//! Typed changelog entries, normalisation of raw API payloads, and the two
//! "what is new" computations the widgets render from:
//!
//! - [`calculate_new_updates_count`]: how many entries were published after
//!   the last-viewed watermark
//! - [`find_highlighted_update`]: which entry a banner or toast should show

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// Color given to tags that arrive as bare strings
pub const DEFAULT_TAG_COLOR: &str = "#667eea";

/// Title used when the widget metadata has none
pub const DEFAULT_WIDGET_TITLE: &str = "Updates";

/// Which ancillary surface spotlights an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightTarget {
    /// The inline banner
    Banner,
    /// The floating toast
    Toast,
}

impl HighlightTarget {
    /// Wire name of the target
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightTarget::Banner => "banner",
            HighlightTarget::Toast => "toast",
        }
    }
}

/// A changelog tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag id (0 for tags synthesized from bare strings)
    #[serde(default)]
    pub id: i64,
    /// Display name
    pub name: String,
    /// CSS color
    #[serde(default = "default_tag_color")]
    pub color: String,
}

impl Tag {
    /// Tag synthesized from a bare string
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            color: DEFAULT_TAG_COLOR.to_string(),
        }
    }
}

/// Tags arrive either as bare strings or as structured objects
#[derive(Deserialize)]
#[serde(untagged)]
enum RawTag {
    Name(String),
    Full(Tag),
}

impl From<RawTag> for Tag {
    fn from(raw: RawTag) -> Self {
        match raw {
            RawTag::Name(name) => Tag::from_name(name),
            RawTag::Full(tag) => tag,
        }
    }
}

/// One changelog entry
///
/// Immutable once received; the whole list is replaced on each fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Stable id
    pub id: i64,
    /// Headline
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    /// HTML body
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    /// Calendar date shown to readers
    #[serde(default, deserialize_with = "lenient_string")]
    pub display_date: String,
    /// ISO-8601 publication time, the ordering key
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub published_at: Option<String>,
    /// Optional expiry date
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub expires_on: Option<String>,
    /// Surface that spotlights this entry
    #[serde(default, deserialize_with = "lenient_highlight_target")]
    pub highlight_target: Option<HighlightTarget>,
    /// Deep link into the hosted changelog
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub hosted_url: Option<String>,
    /// Ordered tags
    #[serde(default, deserialize_with = "normalized_tags")]
    pub tags: Vec<Tag>,
    /// Fields this crate does not interpret, passed through unchanged
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Update {
    /// Publication time as epoch milliseconds
    ///
    /// `None` when missing, unparseable, or exactly the epoch.
    pub fn published_ms(&self) -> Option<i64> {
        self.published_at.as_deref().and_then(parse_timestamp_ms)
    }

    /// Whether this entry was published strictly after `last_viewed`
    pub fn is_newer_than(&self, last_viewed: i64) -> bool {
        matches!(self.published_ms(), Some(published) if published > last_viewed)
    }
}

/// Hosted changelog display identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Widget {
    /// Widget title
    pub title: String,
    /// Optional subheading
    pub subheading: Option<String>,
    /// Changelog slug
    pub slug: Option<String>,
    /// Whether to show Changebot branding
    pub branded: bool,
}

/// Result of [`find_highlighted_update`]
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightMatch {
    /// First matching update, if any
    pub new_update: Option<Update>,
    /// True only when a match exists and differs from the current one
    pub should_show: bool,
}

fn default_tag_color() -> String {
    DEFAULT_TAG_COLOR.to_string()
}

/// Null reads as empty; numbers and booleans keep their JSON text
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null | Value::Array(_) | Value::Object(_) => String::new(),
        other => other.to_string(),
    })
}

/// Anything but a string reads as `None`
fn lenient_opt_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_highlight_target<'de, D>(deserializer: D) -> std::result::Result<Option<HighlightTarget>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::trim) {
        Some("banner") => Some(HighlightTarget::Banner),
        Some("toast") => Some(HighlightTarget::Toast),
        _ => None,
    })
}

fn normalized_tags<'de, D>(deserializer: D) -> std::result::Result<Vec<Tag>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<RawTag>>::deserialize(deserializer)?;
    Ok(raw.unwrap_or_default().into_iter().map(Tag::from).collect())
}

/// Parse a timestamp into epoch milliseconds
///
/// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS[.fff]` (read as UTC) and a
/// bare `YYYY-MM-DD` (UTC midnight). Zero is rejected like an unparseable
/// value.
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let ms = if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        dt.timestamp_millis()
    } else if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        naive.and_utc().timestamp_millis()
    } else if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis()
    } else {
        return None;
    };

    (ms != 0).then_some(ms)
}

/// Format epoch milliseconds as an ISO-8601 UTC timestamp
pub fn format_timestamp_ms(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true))
}

/// Current time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Normalise a raw payload into updates
///
/// Accepts a bare array or an object with a `publications` array. An object
/// without `publications` yields no updates. Entries that cannot be read at
/// all (no numeric `id`, not an object) are logged and skipped.
pub fn transform_publications(raw: &Value) -> Result<Vec<Update>> {
    let list = match raw {
        Value::Array(list) => list,
        Value::Object(map) => match map.get("publications") {
            Some(Value::Array(publications)) => publications,
            Some(Value::Null) | None => return Ok(Vec::new()),
            Some(other) => {
                return Err(Error::invalid_input(format!(
                    "publications must be an array, got {}",
                    json_kind(other)
                )));
            }
        },
        other => {
            return Err(Error::invalid_input(format!(
                "expected an array or an object with publications, got {}",
                json_kind(other)
            )));
        }
    };

    Ok(list
        .iter()
        .filter_map(|entry| match Update::deserialize(entry) {
            Ok(update) => Some(update),
            Err(e) => {
                warn!("Skipping malformed update entry: {}", e);
                None
            }
        })
        .collect())
}

/// Extract widget metadata from a raw payload
///
/// `None` when the payload has no `widget` key.
pub fn extract_widget(raw: &Value) -> Option<Widget> {
    let widget = raw.as_object()?.get("widget")?;
    if widget.is_null() {
        return None;
    }

    let field = |name: &str| {
        widget
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    Some(Widget {
        title: field("title").unwrap_or_else(|| DEFAULT_WIDGET_TITLE.to_string()),
        subheading: field("subheading"),
        slug: field("slug"),
        branded: widget.get("branded").and_then(Value::as_bool) != Some(false),
    })
}

/// Count updates published strictly after `last_viewed`
///
/// Returns 0 when `last_viewed` is `None` or not positive. Updates without a
/// valid `published_at` never count.
pub fn calculate_new_updates_count(updates: &[Update], last_viewed: Option<i64>) -> usize {
    let Some(last_viewed) = last_viewed.filter(|ts| *ts > 0) else {
        return 0;
    };
    updates
        .iter()
        .filter(|update| update.is_newer_than(last_viewed))
        .count()
}

/// Find the update a highlight surface should show
///
/// Scans in array order and takes the first entry for `target` that has a
/// valid timestamp and was published after `last_viewed` (any time, when
/// never viewed). The input is not sorted here.
pub fn find_highlighted_update(
    updates: &[Update],
    target: HighlightTarget,
    last_viewed: Option<i64>,
    current_id: Option<i64>,
) -> HighlightMatch {
    let last_viewed = last_viewed.filter(|ts| *ts > 0);

    let new_update = updates
        .iter()
        .find(|update| {
            if update.highlight_target != Some(target) {
                return false;
            }
            match (update.published_ms(), last_viewed) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(published), Some(viewed)) => published > viewed,
            }
        })
        .cloned();

    let should_show = matches!(&new_update, Some(update) if Some(update.id) != current_id);

    HighlightMatch {
        new_update,
        should_show,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
