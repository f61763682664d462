//! # Club Protocol
//!
//! **The message, reaction and membership model of a club chat room.**
//!
//! Club Protocol is the pure, synchronous half of Club Chat. It knows what a
//! club, a message and a reaction look like in the document store, how every
//! mutation is expressed as a single-document atomic [`ops::UpdateBatch`], and
//! how a user's view of their club is derived from the latest snapshots. It
//! performs no I/O; `clubchat-core` drives it against a real store.
//!
//! ## Quick Start
//!
//! ```rust
//! use club_protocol::ids::UserId;
//! use club_protocol::reactions::{ReactionState, Reactions};
//! use club_protocol::symbol::Symbol;
//!
//! let alice = UserId::new("alice");
//! let thumbs = Symbol::parse("👍").unwrap();
//!
//! let mut reactions = Reactions::new();
//! assert_eq!(reactions.toggle(&alice, &thumbs), ReactionState::Reacted(thumbs.clone()));
//! assert_eq!(reactions.toggle(&alice, &thumbs), ReactionState::NoReaction);
//! ```
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ids`] | User, club and message ids, server timestamps |
//! | [`limits`] | Size limits and join queue bounds |
//! | [`symbol`] | Reaction symbol validation (single pictographic grapheme) |
//! | [`identity`] | User profiles and the founding role |
//! | [`ops`] | Field-level update ops, preconditions, reference apply |
//! | [`membership`] | Club records, name validation, join/approve/reject plans |
//! | [`reactions`] | Reaction ledger state machine and summaries |
//! | [`messages`] | Message encoding, body validation, feed ordering |
//! | [`view`] | Derived per-user club view and its state hash |

#![allow(clippy::empty_line_after_doc_comments, clippy::doc_lazy_continuation)]

// ── Public modules ──────────────────────────────────────────────────────────

pub mod identity;
pub mod ids;
pub mod limits;

/// Club records and the membership registry's update plans.
pub mod membership;

/// Message feed encoding and ordering.
pub mod messages;

/// Field-level update operations applied atomically by the document store.
pub mod ops;

/// Reaction ledger, one symbol per (message, user).
pub mod reactions;

pub mod symbol;

/// Derived club view for the synchronization projector.
pub mod view;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use identity::{is_founding_role, ProfileError, UserProfile, FOUNDING_ROLE};
pub use ids::{ClubId, MessageId, ServerTimestamp, UserId};
pub use membership::{ClubRecord, MemberStatus, MembershipError};
pub use messages::{Feed, MessageEntry, MessageError, NewMessage};
pub use ops::{FieldOp, FieldPath, OpError, Precondition, UpdateBatch};
pub use reactions::{ReactionState, ReactionSummary, Reactions};
pub use symbol::{Symbol, SymbolError};
pub use view::{ClubSlice, ClubView, MessageView};

// ── Library metadata ────────────────────────────────────────────────────────

/// Club Protocol version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }
}
