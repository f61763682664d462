/// Derived club view: what one user sees of their club at a point in time.
///
/// `ClubView::derive` is a pure function of the latest user, club and feed
/// snapshots. Applying the same snapshots twice, or in any order, produces the
/// same view and the same `state_hash`, so redundant notifications are
/// harmless.
///
/// Slices are only combined when they agree on the club: a club snapshot or
/// message that belongs to a club other than the user's current one is left
/// out of the view.
use serde::Serialize;

use crate::identity::UserProfile;
use crate::ids::{ClubId, MessageId, ServerTimestamp, UserId};
use crate::membership::ClubRecord;
use crate::messages::{Feed, MessageEntry};
use crate::reactions::ReactionSummary;

// ---------------------------------------------------------------------------
// View types
// ---------------------------------------------------------------------------

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClubSlice {
    pub id: ClubId,
    pub name: String,
    pub president_id: UserId,
    pub is_president: bool,
    pub member_count: usize,
    /// Queued join requests. Only populated for the president.
    pub pending: Vec<UserId>,
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_display_name: String,
    pub sender_role: String,
    pub body: String,
    pub created_at: ServerTimestamp,
    pub is_mine: bool,
    pub reactions: ReactionSummary,
}

impl MessageView {
    fn project(viewer: &UserId, entry: &MessageEntry) -> Self {
        MessageView {
            id: entry.id.clone(),
            sender_id: entry.sender_id.clone(),
            sender_display_name: entry.sender_display_name.clone(),
            sender_role: entry.sender_role.clone(),
            body: entry.body.clone(),
            created_at: entry.created_at,
            is_mine: entry.sender_id == *viewer,
            reactions: entry.reactions.summary(viewer),
        }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClubView {
    pub viewer: UserId,
    /// `None` until the user document has been observed.
    pub profile: Option<UserProfile>,
    pub club: Option<ClubSlice>,
    pub messages: Vec<MessageView>,
}

impl ClubView {
    /// View before any snapshot has arrived.
    pub fn empty(viewer: UserId) -> Self {
        ClubView {
            viewer,
            profile: None,
            club: None,
            messages: Vec::new(),
        }
    }

    /// Derive the view from the latest snapshot of each slice.
    pub fn derive(
        viewer: &UserId,
        user: Option<&UserProfile>,
        club: Option<&ClubRecord>,
        messages: &[MessageEntry],
    ) -> Self {
        let affiliation = user.and_then(|profile| profile.club_id.clone());

        let (club, messages) = match affiliation {
            Some(club_id) => {
                let slice = club
                    .filter(|record| record.id == club_id)
                    .map(|record| Self::slice(viewer, record));
                let feed = Feed::from_store_order(&club_id, messages.to_vec());
                let messages = feed
                    .entries()
                    .iter()
                    .map(|entry| MessageView::project(viewer, entry))
                    .collect();
                (slice, messages)
            }
            None => (None, Vec::new()),
        };

        ClubView {
            viewer: viewer.clone(),
            profile: user.cloned(),
            club,
            messages,
        }
    }

    fn slice(viewer: &UserId, record: &ClubRecord) -> ClubSlice {
        let is_president = record.is_president(viewer);
        ClubSlice {
            id: record.id.clone(),
            name: record.name.clone(),
            president_id: record.president_id.clone(),
            is_president,
            member_count: record.members.len(),
            pending: if is_president {
                record.join_requests.clone()
            } else {
                Vec::new()
            },
        }
    }

    pub fn affiliation(&self) -> Option<&ClubId> {
        self.profile.as_ref().and_then(|p| p.club_id.as_ref())
    }

    pub fn is_president(&self) -> bool {
        self.club.as_ref().map(|c| c.is_president).unwrap_or(false)
    }

    pub fn pending_requests(&self) -> &[UserId] {
        self.club.as_ref().map(|c| c.pending.as_slice()).unwrap_or(&[])
    }

    pub fn message(&self, id: &MessageId) -> Option<&MessageView> {
        self.messages.iter().find(|m| m.id == *id)
    }

    /// Deterministic hash over everything the view exposes.
    ///
    /// Strings are length-prefixed; collections are hashed in their view
    /// order, which is itself canonical (feed order, BTreeMap order).
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hash_str(&mut hasher, self.viewer.as_str());

        // --- Profile ---
        hasher.update(b"U");
        if let Some(profile) = &self.profile {
            hash_str(&mut hasher, profile.display_name.as_str());
            hash_str(&mut hasher, profile.role.as_str());
            hash_str(
                &mut hasher,
                profile.club_id.as_ref().map(ClubId::as_str).unwrap_or(""),
            );
        }

        // --- Club ---
        hasher.update(b"C");
        if let Some(club) = &self.club {
            hash_str(&mut hasher, club.id.as_str());
            hash_str(&mut hasher, &club.name);
            hash_str(&mut hasher, club.president_id.as_str());
            hasher.update(&[club.is_president as u8]);
            hasher.update(&(club.member_count as u64).to_le_bytes());
            hasher.update(&(club.pending.len() as u64).to_le_bytes());
            for user in &club.pending {
                hash_str(&mut hasher, user.as_str());
            }
        }

        // --- Messages ---
        hasher.update(b"M");
        for message in &self.messages {
            hash_str(&mut hasher, message.id.as_str());
            hash_str(&mut hasher, message.sender_id.as_str());
            hash_str(&mut hasher, &message.body);
            hasher.update(&message.created_at.millis.to_le_bytes());
            hasher.update(&message.created_at.seq.to_le_bytes());
            for (symbol, count) in &message.reactions.counts {
                hash_str(&mut hasher, symbol.as_str());
                hasher.update(&(*count as u64).to_le_bytes());
            }
            hash_str(
                &mut hasher,
                message.reactions.mine.as_ref().map(|s| s.as_str()).unwrap_or(""),
            );
        }

        *hasher.finalize().as_bytes()
    }
}

fn hash_str(hasher: &mut blake3::Hasher, value: &str) {
    hasher.update(&(value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
