/// Core identity types for the club chat model.
///
/// - `UserId`: opaque, stable user identifier issued by the identity provider
/// - `ClubId`: store-assigned club identifier
/// - `MessageId`: store-assigned message identifier
/// - `ServerTimestamp`: write-time value assigned by the document store

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Opaque string identifiers
// ---------------------------------------------------------------------------

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an existing identifier.
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                $name(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                $name(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let short: String = self.0.chars().take(8).collect();
                write!(f, "{}({})", stringify!($name), short)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id! {
    /// Stable user identity. Issued by the identity provider; never derived
    /// from a display name.
    UserId
}

opaque_id! {
    /// Club identifier, assigned when the club is founded.
    ClubId
}

opaque_id! {
    /// Message identifier, assigned by the store when the message is written.
    MessageId
}

/// Generate a fresh random document identifier (UUID v4, simple form).
pub fn generate_document_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl ClubId {
    pub fn generate() -> Self {
        ClubId(generate_document_id())
    }
}

impl MessageId {
    pub fn generate() -> Self {
        MessageId(generate_document_id())
    }
}

// ---------------------------------------------------------------------------
// ServerTimestamp
// ---------------------------------------------------------------------------

/// Write-time value assigned by the store, never by clients.
///
/// - `millis`: wall clock at the store, clamped so it never decreases
/// - `seq`: store-wide write counter, strictly increasing
///
/// **Ordering**: `(millis, seq)`. The store keeps both monotonic, so the
/// order matches the order writes were accepted regardless of client clocks.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerTimestamp {
    pub millis: i64,
    pub seq: u64,
}

impl ServerTimestamp {
    pub fn new(millis: i64, seq: u64) -> Self {
        ServerTimestamp { millis, seq }
    }

    /// Wall-clock view, for display only.
    pub fn to_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::DateTime::from_timestamp_millis(self.millis)
    }
}

impl Ord for ServerTimestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.millis
            .cmp(&other.millis)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ServerTimestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for ServerTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServerTimestamp({}ms, #{})", self.millis, self.seq)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
