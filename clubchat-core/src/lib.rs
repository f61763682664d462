// Crate-level lint configuration: stylistic lints only.
#![allow(
    clippy::empty_line_after_doc_comments,
    clippy::doc_lazy_continuation,
    clippy::too_many_arguments
)]

// ── Re-export Club Protocol modules ─────────────────────────────────────────
// The domain model lives in the standalone `club-protocol` crate; hosts only
// need to depend on this one.
pub use club_protocol::identity as profile;
pub use club_protocol::{ids, limits, membership, messages, ops, reactions, symbol, view};

// ── Services ────────────────────────────────────────────────────────────────
pub mod accounts;
pub mod config;
pub mod error;
pub mod feed;
pub mod identity;
pub mod ledger;
pub mod logging;
#[cfg(feature = "native")]
pub mod projector;
pub mod registry;
pub mod store;

#[cfg(all(test, feature = "native"))]
mod scenarios;

// ── Re-export main types ────────────────────────────────────────────────────
pub use accounts::{AccountError, Accounts, CreatedAccount, NewAccount};
pub use config::{load_config, ClubChatConfig, ConfigError, ResubscribePolicy};
pub use error::{ClubChatError, ErrorClass};
pub use feed::{FeedError, FeedSubscription, MessageFeed};
pub use identity::{
    ActorContext, Credentials, IdentityError, IdentityProvider, InMemoryIdentityProvider,
    ProfileCache,
};
pub use ledger::{LedgerError, ReactionLedger};
pub use logging::init_logging;
#[cfg(feature = "native")]
pub use projector::{ProjectorHandle, SyncProjector};
pub use registry::{ApproveOutcome, ClubRegistry, RegistryError, RejectOutcome, RequestState};
pub use store::{DocumentStore, InMemoryDocumentStore, StoreError, Subscription};

pub use club_protocol::{
    ClubId, ClubRecord, ClubView, MessageEntry, MessageId, ReactionState, ReactionSummary, Symbol,
    UserId, UserProfile,
};

// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version
pub fn get_version() -> &'static str {
    VERSION
}
