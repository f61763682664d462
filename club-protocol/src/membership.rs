/// Club membership: president, member set, and pending join-request queue.
///
/// A `ClubRecord` is the single document that holds every membership
/// invariant, so each transition is planned as one `UpdateBatch` against it:
/// - `president_id ∈ members`
/// - a user is in at most one of `members` / `join_requests`
/// - `join_requests` is an ordered set (queue order, no duplicates)
///
/// Planning is pure: it reads the last observed record and returns the ops
/// plus the preconditions that make the plan safe to apply even if the
/// record changed since it was read.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::ids::{ClubId, UserId};
use crate::limits::{check_join_queue, JoinQueueStatus};
use crate::ops::{FieldOp, FieldPath, Fields, Precondition, UpdateBatch};

pub const FIELD_MEMBERS: &str = "members";
pub const FIELD_JOIN_REQUESTS: &str = "joinRequests";
pub const FIELD_PRESIDENT: &str = "presidentId";
pub const FIELD_NAME: &str = "name";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MembershipError {
    #[error("Club name is invalid: {0}")]
    InvalidName(String),

    #[error("A club with this name already exists")]
    DuplicateName,

    #[error("Club not found: {0}")]
    NotFound(String),

    #[error("User is already a member of this club")]
    AlreadyMember,

    #[error("User already belongs to club {0}")]
    AlreadyAffiliated(ClubId),

    #[error("Only the club president can do this")]
    Forbidden,

    #[error("No pending join request for this user")]
    NoPendingRequest,

    #[error("Join request queue is full ({0} pending)")]
    JoinQueueFull(usize),

    #[error("Club record violates invariant: {0}")]
    InvariantViolation(String),

    #[error("Club record decode error: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

/// Trim and validate a club name. Matching is exact and case-sensitive on the
/// trimmed value.
pub fn validate_club_name(raw: &str, max_chars: usize) -> Result<String, MembershipError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(MembershipError::InvalidName("name is empty".into()));
    }
    let len = name.chars().count();
    if len > max_chars {
        return Err(MembershipError::InvalidName(format!(
            "name exceeds {} characters ({})",
            max_chars, len
        )));
    }
    Ok(name.to_string())
}

// ---------------------------------------------------------------------------
// ClubRecord
// ---------------------------------------------------------------------------

/// Where a user stands relative to one club.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    President,
    Member,
    Pending,
    Outsider,
}

/// Name-uniqueness claim stored under the exact club name.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClubNameClaim {
    pub club_id: ClubId,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClubRecord {
    pub id: ClubId,
    pub name: String,
    pub president_id: UserId,
    #[serde(default)]
    pub members: BTreeSet<UserId>,
    /// Queue order is preserved.
    #[serde(default)]
    pub join_requests: Vec<UserId>,
}

impl ClubRecord {
    /// New club with the founder as president and sole member.
    pub fn found(id: ClubId, name: String, founder: UserId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(founder.clone());
        ClubRecord {
            id,
            name,
            president_id: founder,
            members,
            join_requests: Vec::new(),
        }
    }

    pub fn to_fields(&self) -> Result<Fields, MembershipError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(fields)) => Ok(fields),
            Ok(_) => Err(MembershipError::Decode("club is not an object".into())),
            Err(e) => Err(MembershipError::Decode(e.to_string())),
        }
    }

    pub fn from_fields(fields: &Fields) -> Result<Self, MembershipError> {
        serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|e| MembershipError::Decode(e.to_string()))
    }

    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn is_pending(&self, user: &UserId) -> bool {
        self.join_requests.contains(user)
    }

    pub fn is_president(&self, user: &UserId) -> bool {
        self.president_id == *user
    }

    pub fn status_of(&self, user: &UserId) -> MemberStatus {
        if self.is_president(user) {
            MemberStatus::President
        } else if self.is_member(user) {
            MemberStatus::Member
        } else if self.is_pending(user) {
            MemberStatus::Pending
        } else {
            MemberStatus::Outsider
        }
    }

    /// Verify the single-document membership invariants.
    pub fn check_invariants(&self) -> Result<(), MembershipError> {
        if !self.members.contains(&self.president_id) {
            return Err(MembershipError::InvariantViolation(
                "president is not a member".into(),
            ));
        }

        let mut seen = BTreeSet::new();
        for user in &self.join_requests {
            if !seen.insert(user) {
                return Err(MembershipError::InvariantViolation(format!(
                    "{} queued twice",
                    user
                )));
            }
            if self.members.contains(user) {
                return Err(MembershipError::InvariantViolation(format!(
                    "{} is both member and pending",
                    user
                )));
            }
        }
        Ok(())
    }

    /// Moderation (approve/reject, viewing the queue) is president-only.
    pub fn authorize_moderator(&self, actor: &UserId) -> Result<(), MembershipError> {
        if self.is_president(actor) {
            Ok(())
        } else {
            Err(MembershipError::Forbidden)
        }
    }

    // -----------------------------------------------------------------------
    // Transition planning
    // -----------------------------------------------------------------------

    /// Plan a join request. Re-requesting while pending is not an error.
    /// The queue bound is checked here and again by the batch, so concurrent
    /// requests cannot push the queue past `max_pending`.
    pub fn plan_join_request(
        &self,
        user: &UserId,
        max_pending: usize,
    ) -> Result<JoinPlan, MembershipError> {
        if self.is_member(user) {
            return Err(MembershipError::AlreadyMember);
        }
        if self.is_pending(user) {
            return Ok(JoinPlan::AlreadyPending);
        }
        if check_join_queue(self.join_requests.len(), max_pending) == JoinQueueStatus::Full {
            return Err(MembershipError::JoinQueueFull(self.join_requests.len()));
        }

        let batch = UpdateBatch::new()
            .require(Precondition::Exists)
            .require(Precondition::NotContains {
                path: FieldPath::field(FIELD_MEMBERS),
                value: user_value(user),
            })
            .require(Precondition::LenBelow {
                path: FieldPath::field(FIELD_JOIN_REQUESTS),
                max: max_pending,
            })
            .op(FieldOp::add_to_set(
                FieldPath::field(FIELD_JOIN_REQUESTS),
                user_value(user),
            ));
        Ok(JoinPlan::Enqueue(batch))
    }

    /// Plan admission of a pending user. Caller must have authorized the
    /// actor with [`ClubRecord::authorize_moderator`].
    pub fn plan_approve(&self, user: &UserId) -> Result<ApprovePlan, MembershipError> {
        if self.is_member(user) {
            return Ok(ApprovePlan::AlreadyMember);
        }
        if !self.is_pending(user) {
            return Err(MembershipError::NoPendingRequest);
        }

        // Both ops in one batch: the user is never observable in both sets
        // or in neither. The precondition loses any race with a reject.
        let batch = UpdateBatch::new()
            .require(Precondition::Contains {
                path: FieldPath::field(FIELD_JOIN_REQUESTS),
                value: user_value(user),
            })
            .op(FieldOp::remove_from_set(
                FieldPath::field(FIELD_JOIN_REQUESTS),
                user_value(user),
            ))
            .op(FieldOp::add_to_set(
                FieldPath::field(FIELD_MEMBERS),
                user_value(user),
            ));
        Ok(ApprovePlan::Admit(batch))
    }

    /// Plan removal of a pending request. Membership is never touched.
    pub fn plan_reject(&self, user: &UserId) -> RejectPlan {
        if !self.is_pending(user) {
            return RejectPlan::NotPending;
        }
        RejectPlan::Remove(UpdateBatch::new().op(FieldOp::remove_from_set(
            FieldPath::field(FIELD_JOIN_REQUESTS),
            user_value(user),
        )))
    }
}

fn user_value(user: &UserId) -> Value {
    Value::String(user.as_str().to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinPlan {
    Enqueue(UpdateBatch),
    AlreadyPending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ApprovePlan {
    Admit(UpdateBatch),
    AlreadyMember,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectPlan {
    Remove(UpdateBatch),
    NotPending,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
