/// Identity reference: the user record the core reads.
///
/// Profiles are created at account provisioning and are read-mostly. The only
/// field the core writes is `club_id`, bound when a user founds or joins a club.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::{ClubId, UserId};
use crate::limits::MAX_DISPLAY_NAME_CHARS;

/// Role that founds a club on account creation.
pub const FOUNDING_ROLE: &str = "president";

/// Profile field holding the user's club affiliation.
pub const FIELD_AFFILIATION: &str = "clubId";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Display name is empty")]
    EmptyDisplayName,

    #[error("Display name exceeds max length ({len} > {max})")]
    DisplayNameTooLong { len: usize, max: usize },

    #[error("Role is empty")]
    EmptyRole,
}

/// Cached profile fields for a user. Stored in the `users` collection keyed by
/// the user id.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub display_name: String,
    /// Position within the club ("President", "Treasurer", ...).
    pub role: String,
    #[serde(default)]
    pub club_id: Option<ClubId>,
}

impl UserProfile {
    /// Build a validated profile with no club affiliation.
    pub fn new(id: UserId, display_name: &str, role: &str) -> Result<Self, ProfileError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(ProfileError::EmptyDisplayName);
        }
        let len = display_name.chars().count();
        if len > MAX_DISPLAY_NAME_CHARS {
            return Err(ProfileError::DisplayNameTooLong {
                len,
                max: MAX_DISPLAY_NAME_CHARS,
            });
        }

        let role = role.trim();
        if role.is_empty() {
            return Err(ProfileError::EmptyRole);
        }

        Ok(UserProfile {
            id,
            display_name: display_name.to_string(),
            role: role.to_string(),
            club_id: None,
        })
    }

    /// Whether this profile's role founds a club.
    pub fn is_founder(&self) -> bool {
        is_founding_role(&self.role)
    }

    pub fn belongs_to(&self, club: &ClubId) -> bool {
        self.club_id.as_ref() == Some(club)
    }
}

/// Case-insensitive match against [`FOUNDING_ROLE`], ignoring surrounding
/// whitespace.
pub fn is_founding_role(role: &str) -> bool {
    role.trim().eq_ignore_ascii_case(FOUNDING_ROLE)
}
