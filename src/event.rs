//! Nostr event model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BotError;

/// Profile metadata (JSON content).
pub const KIND_METADATA: u32 = 0;
/// Short text note.
pub const KIND_NOTE: u32 = 1;
/// Follow list; `p` tags name the followed authors.
pub const KIND_FOLLOWS: u32 = 3;
/// Reaction to another event.
pub const KIND_REACTION: u32 = 7;
/// Public channel message.
pub const KIND_CHANNEL_MESSAGE: u32 = 42;
/// Mute list; `p` tags name the muted authors.
pub const KIND_MUTES: u32 = 10000;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// Tags appear as small arrays where the first element denotes the type and the
/// following elements hold data. The bot mostly deals with:
///
/// - `e` – links to another event ID
/// - `p` – references another author's public key
/// - `t` – free-form topic or hashtag
/// - `emoji` – custom emoji shortcode and image URL
///
/// Several tags may share a first element and their order is kept as-is, so a
/// tag set is a sequence rather than a map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a tag from its string parts, e.g. `Tag::new(["e", id])`.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Tag(parts.into_iter().map(Into::into).collect())
    }

    /// First element of the tag (`"e"`, `"p"`, ...), if any.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// Second element of the tag, usually the referenced value.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }

    /// Convert an untyped JSON tag array, rejecting non-string elements.
    pub fn from_value(val: &Value) -> Result<Self, BotError> {
        let arr = val
            .as_array()
            .ok_or_else(|| BotError::Encoding(format!("tag is not an array: {val}")))?;
        arr.iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BotError::Encoding(format!("non-string tag element: {v}")))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Tag)
    }
}

/// Convert a JSON array of tag arrays into typed tags.
pub fn tags_from_value(val: &Value) -> Result<Vec<Tag>, BotError> {
    match val {
        Value::Array(items) => items.iter().map(Tag::from_value).collect(),
        other => Err(BotError::Encoding(format!("tags are not an array: {other}"))),
    }
}

/// Core Nostr event, both as received from clients and as built by the bot.
///
/// ```json
/// {
///   "id": "aa11",
///   "pubkey": "4e86...",
///   "kind": 1,
///   "created_at": 1700000000,
///   "tags": [["e", "bb22"], ["p", "4e86..."]],
///   "content": "hello",
///   "sig": "deadbeef"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Event identifier (hex of SHA-256 hash).
    pub id: String,
    /// Author public key (hex).
    pub pubkey: String,
    /// Kind number, e.g. `1` or `42`.
    pub kind: u32,
    /// Unix timestamp of creation.
    pub created_at: u64,
    /// Ordered tag list.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Event content body.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over the event hash.
    #[serde(default)]
    pub sig: String,
}

impl Event {
    /// Parse an inbound event body, reporting malformed input as a decode error.
    pub fn from_json(data: &[u8]) -> Result<Self, BotError> {
        serde_json::from_slice(data).map_err(|e| BotError::Decode(e.to_string()))
    }

    /// Iterate over tags whose first element equals `name`.
    pub fn tags_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Tag> + 'a {
        self.tags.iter().filter(move |t| t.name() == Some(name))
    }

    /// Whether this list event carries a `["p", pubkey]` tag.
    pub fn references_pubkey(&self, pubkey: &str) -> bool {
        self.tags_named("p").any(|t| t.value() == Some(pubkey))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_accessors() {
        let t = Tag::new(["e", "abc", "wss://relay"]);
        assert_eq!(t.name(), Some("e"));
        assert_eq!(t.value(), Some("abc"));
        assert_eq!(Tag(vec![]).name(), None);
    }

    #[test]
    fn tags_from_value_rejects_non_strings() {
        let ok = tags_from_value(&json!([["t", "news"], ["e", "x"]])).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(matches!(
            tags_from_value(&json!([["e", 1]])),
            Err(BotError::Encoding(_))
        ));
        assert!(matches!(
            tags_from_value(&json!({"e": "x"})),
            Err(BotError::Encoding(_))
        ));
    }

    #[test]
    fn from_json_accepts_missing_optional_fields() {
        let ev = Event::from_json(br#"{"id":"abc","pubkey":"X","kind":1,"created_at":1000}"#)
            .unwrap();
        assert!(ev.tags.is_empty());
        assert_eq!(ev.content, "");
    }

    #[test]
    fn from_json_rejects_wrong_types() {
        let err = Event::from_json(br#"{"id":"abc","pubkey":"X","kind":"one","created_at":1}"#)
            .unwrap_err();
        assert!(matches!(err, BotError::Decode(_)));
        let err = Event::from_json(
            br#"{"id":"abc","pubkey":"X","kind":1,"created_at":1,"tags":[["e",5]]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, BotError::Decode(_)));
    }

    #[test]
    fn references_pubkey_matches_p_tags_only() {
        let ev = Event {
            id: String::new(),
            pubkey: "me".into(),
            kind: KIND_FOLLOWS,
            created_at: 1,
            tags: vec![Tag::new(["p", "alice"]), Tag::new(["e", "bob"])],
            content: String::new(),
            sig: String::new(),
        };
        assert!(ev.references_pubkey("alice"));
        assert!(!ev.references_pubkey("bob"));
    }
}
