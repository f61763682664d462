/// Message feed: append-only, club-scoped, ordered by server timestamp.
///
/// Messages are immutable once written except for their embedded reaction
/// map. `created_at` is assigned by the store at write time; clients never
/// set it, so feed order is independent of client clock skew. Equal
/// timestamps keep the store's insertion order (the feed sort is stable).
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::identity::UserProfile;
use crate::ids::{ClubId, MessageId, ServerTimestamp, UserId};
use crate::ops::Fields;
use crate::reactions::{Reactions, FIELD_REACTIONS};

pub const FIELD_CLUB_ID: &str = "clubId";
pub const FIELD_CREATED_AT: &str = "createdAt";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("Message body is empty")]
    EmptyBody,

    #[error("Message body exceeds max size ({len} > {max} bytes)")]
    BodyTooLong { len: usize, max: usize },

    #[error("Sender is not a member of this club")]
    NotAMember,

    #[error("Message decode error: {0}")]
    Decode(String),
}

/// Trim and validate a message body.
pub fn validate_body(raw: &str, max_bytes: usize) -> Result<String, MessageError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(MessageError::EmptyBody);
    }
    if body.len() > max_bytes {
        return Err(MessageError::BodyTooLong {
            len: body.len(),
            max: max_bytes,
        });
    }
    Ok(body.to_string())
}

// ---------------------------------------------------------------------------
// NewMessage
// ---------------------------------------------------------------------------

/// A message about to be written. Carries everything except the id and the
/// server timestamp, which the store assigns.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub club_id: ClubId,
    pub sender_id: UserId,
    pub sender_display_name: String,
    pub sender_role: String,
    pub body: String,
}

impl NewMessage {
    /// Build a message from the sender's profile. Fails `NotAMember` unless
    /// the sender is affiliated with `club`.
    pub fn compose(
        sender: &UserProfile,
        club: &ClubId,
        raw_body: &str,
        max_bytes: usize,
    ) -> Result<Self, MessageError> {
        let body = validate_body(raw_body, max_bytes)?;
        if !sender.belongs_to(club) {
            return Err(MessageError::NotAMember);
        }
        Ok(NewMessage {
            club_id: club.clone(),
            sender_id: sender.id.clone(),
            sender_display_name: sender.display_name.clone(),
            sender_role: sender.role.clone(),
            body,
        })
    }

    /// Stored fields, with an empty reaction map. `createdAt` is left for the
    /// store to stamp.
    pub fn to_fields(&self) -> Result<Fields, MessageError> {
        let mut fields = match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Err(MessageError::Decode("message is not an object".into())),
            Err(e) => return Err(MessageError::Decode(e.to_string())),
        };
        fields.insert(FIELD_REACTIONS.to_string(), Value::Object(Map::new()));
        Ok(fields)
    }
}

// ---------------------------------------------------------------------------
// MessageEntry
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredMessage {
    club_id: ClubId,
    sender_id: UserId,
    sender_display_name: String,
    sender_role: String,
    body: String,
    created_at: ServerTimestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageEntry {
    pub id: MessageId,
    pub club_id: ClubId,
    pub sender_id: UserId,
    /// Copied from the sender's profile at send time.
    pub sender_display_name: String,
    pub sender_role: String,
    pub body: String,
    pub created_at: ServerTimestamp,
    pub reactions: Reactions,
}

impl MessageEntry {
    /// Decode a stored message document.
    pub fn from_fields(id: MessageId, fields: &Fields) -> Result<Self, MessageError> {
        let mut scalars = fields.clone();
        let reactions = Reactions::from_value(scalars.remove(FIELD_REACTIONS).as_ref());
        let stored: StoredMessage = serde_json::from_value(Value::Object(scalars))
            .map_err(|e| MessageError::Decode(format!("{}: {}", id, e)))?;

        Ok(MessageEntry {
            id,
            club_id: stored.club_id,
            sender_id: stored.sender_id,
            sender_display_name: stored.sender_display_name,
            sender_role: stored.sender_role,
            body: stored.body,
            created_at: stored.created_at,
            reactions,
        })
    }
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Ordered message list for one club.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Feed {
    entries: Vec<MessageEntry>,
}

impl Feed {
    /// Build from entries in store order. Messages of other clubs are
    /// dropped; the sort is stable so equal timestamps keep store order.
    pub fn from_store_order(club: &ClubId, entries: Vec<MessageEntry>) -> Self {
        let mut entries: Vec<MessageEntry> = entries
            .into_iter()
            .filter(|entry| {
                if entry.club_id != *club {
                    log::warn!("Dropping message {} from foreign club {}", entry.id, entry.club_id);
                    return false;
                }
                true
            })
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Feed { entries }
    }

    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MessageEntry> {
        self.entries
    }

    pub fn get(&self, id: &MessageId) -> Option<&MessageEntry> {
        self.entries.iter().find(|entry| entry.id == *id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::MAX_MESSAGE_BODY_BYTES;
    use serde_json::json;

    fn member(club: &str) -> UserProfile {
        let mut profile = UserProfile::new(UserId::new("alice"), "Alice", "President").unwrap();
        profile.club_id = Some(ClubId::new(club));
        profile
    }

    fn stored(id: &str, club: &str, body: &str, millis: i64, seq: u64) -> MessageEntry {
        let draft = NewMessage::compose(&member(club), &ClubId::new(club), body, MAX_MESSAGE_BODY_BYTES)
            .unwrap();
        let mut fields = draft.to_fields().unwrap();
        fields.insert(
            FIELD_CREATED_AT.into(),
            serde_json::to_value(ServerTimestamp::new(millis, seq)).unwrap(),
        );
        MessageEntry::from_fields(MessageId::new(id), &fields).unwrap()
    }

    #[test]
    fn test_blank_body_rejected() {
        assert_eq!(validate_body("", 10), Err(MessageError::EmptyBody));
        assert_eq!(validate_body(" \n\t ", 10), Err(MessageError::EmptyBody));
        assert_eq!(validate_body("  hi  ", 10).unwrap(), "hi");
    }

    #[test]
    fn test_long_body_rejected() {
        assert_eq!(
            validate_body("hello world", 5),
            Err(MessageError::BodyTooLong { len: 11, max: 5 })
        );
    }

    #[test]
    fn test_compose_requires_affiliation() {
        let profile = member("club-1");
        assert_eq!(
            NewMessage::compose(&profile, &ClubId::new("club-2"), "hi", MAX_MESSAGE_BODY_BYTES),
            Err(MessageError::NotAMember)
        );

        let mut outsider = profile.clone();
        outsider.club_id = None;
        assert_eq!(
            NewMessage::compose(&outsider, &ClubId::new("club-1"), "hi", MAX_MESSAGE_BODY_BYTES),
            Err(MessageError::NotAMember)
        );
    }

    #[test]
    fn test_validation_precedes_membership() {
        let mut outsider = member("club-1");
        outsider.club_id = None;
        assert_eq!(
            NewMessage::compose(&outsider, &ClubId::new("club-1"), "  ", MAX_MESSAGE_BODY_BYTES),
            Err(MessageError::EmptyBody)
        );
    }

    #[test]
    fn test_new_message_fields() {
        let draft = NewMessage::compose(
            &member("club-1"),
            &ClubId::new("club-1"),
            "hello",
            MAX_MESSAGE_BODY_BYTES,
        )
        .unwrap();
        let fields = draft.to_fields().unwrap();
        assert_eq!(fields[FIELD_CLUB_ID], "club-1");
        assert_eq!(fields["senderDisplayName"], "Alice");
        assert_eq!(fields[FIELD_REACTIONS], json!({}));
        assert!(!fields.contains_key(FIELD_CREATED_AT));
    }

    #[test]
    fn test_missing_timestamp_fails_decode() {
        let draft = NewMessage::compose(
            &member("club-1"),
            &ClubId::new("club-1"),
            "hello",
            MAX_MESSAGE_BODY_BYTES,
        )
        .unwrap();
        let fields = draft.to_fields().unwrap();
        assert!(matches!(
            MessageEntry::from_fields(MessageId::new("m1"), &fields),
            Err(MessageError::Decode(_))
        ));
    }

    #[test]
    fn test_feed_orders_by_server_timestamp() {
        // Delivered out of order
        let entries = vec![
            stored("m3", "club-1", "third", 3_000, 7),
            stored("m1", "club-1", "first", 1_000, 2),
            stored("m2", "club-1", "second", 2_000, 5),
        ];
        let feed = Feed::from_store_order(&ClubId::new("club-1"), entries);
        let bodies: Vec<&str> = feed.entries().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_feed_tie_keeps_store_order() {
        let a = stored("b-id", "club-1", "a", 1_000, 4);
        let mut b = stored("a-id", "club-1", "b", 1_000, 4);
        b.created_at = a.created_at;
        let feed = Feed::from_store_order(&ClubId::new("club-1"), vec![a, b]);
        let bodies: Vec<&str> = feed.entries().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["a", "b"]);
    }

    #[test]
    fn test_feed_drops_foreign_messages() {
        let entries = vec![
            stored("m1", "club-1", "ours", 1_000, 1),
            stored("m2", "club-2", "theirs", 2_000, 2),
        ];
        let feed = Feed::from_store_order(&ClubId::new("club-1"), entries);
        assert_eq!(feed.len(), 1);
        assert!(feed.get(&MessageId::new("m2")).is_none());
    }
}
