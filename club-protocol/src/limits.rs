/// Club chat guardrails.
///
/// These constants bound per-document growth so a single club or message
/// document stays small enough for one atomic update and one snapshot push.
/// They are the defaults behind the runtime configuration.

/// Max message body size after trimming.
pub const MAX_MESSAGE_BODY_BYTES: usize = 4 * 1024; // 4 KB

/// Max club name length, in characters, after trimming.
pub const MAX_CLUB_NAME_CHARS: usize = 80;

/// Max display name length, in characters, after trimming.
pub const MAX_DISPLAY_NAME_CHARS: usize = 64;

/// Max pending join requests held on one club document.
pub const MAX_PENDING_JOIN_REQUESTS: usize = 200;

/// Minimum password length accepted by the identity provider.
pub const MIN_PASSWORD_CHARS: usize = 6;

/// Default LRU capacity for resolved user profiles in the projector.
pub const PROFILE_CACHE_CAPACITY: usize = 256;

/// Join queue status for a club.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinQueueStatus {
    /// Room for more requests.
    Open,
    /// Queue is full; new requests are refused until the president acts.
    Full,
}

/// Check whether a club with `pending` queued requests accepts another one.
pub fn check_join_queue(pending: usize, max_pending: usize) -> JoinQueueStatus {
    if pending >= max_pending {
        JoinQueueStatus::Full
    } else {
        JoinQueueStatus::Open
    }
}
