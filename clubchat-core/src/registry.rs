/// Club membership registry.
///
/// Founding, lookup, join requests and president moderation. Every mutation
/// of a club document is one `atomic_update` built by
/// `club_protocol::membership`; the registry reads the club, plans the
/// transition, and lets the store's preconditions settle races with other
/// sessions.
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use club_protocol::identity::{UserProfile, FIELD_AFFILIATION};
use club_protocol::ids::{ClubId, UserId};
use club_protocol::membership::{
    validate_club_name, ApprovePlan, ClubNameClaim, ClubRecord, JoinPlan, MembershipError,
    RejectPlan,
};
use club_protocol::ops::{FieldOp, FieldPath, Fields, Precondition, UpdateBatch};

use crate::config::ClubChatConfig;
use crate::identity::{load_profile, ActorContext, ProfileCache};
use crate::store::{DocumentStore, StoreError, WriteFields, CLUBS, CLUB_NAMES, USERS};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    Membership(#[from] MembershipError),

    #[error("Profile not found: {0}")]
    ProfileNotFound(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of `request_to_join`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Newly queued.
    Pending,
    /// Already queued; nothing changed.
    AlreadyPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApproveOutcome {
    Admitted,
    /// The user was already a member; nothing changed.
    AlreadyMember,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    Rejected,
    /// No pending request; nothing changed.
    NotPending,
}

pub struct ClubRegistry {
    store: Arc<dyn DocumentStore>,
    config: ClubChatConfig,
    profiles: ProfileCache,
}

impl ClubRegistry {
    pub fn new(store: Arc<dyn DocumentStore>, config: ClubChatConfig) -> Self {
        let profiles = ProfileCache::new(store.clone(), config.profile_cache_capacity);
        ClubRegistry {
            store,
            config,
            profiles,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub async fn club(&self, club_id: &ClubId) -> Result<ClubRecord, RegistryError> {
        let doc = self
            .store
            .get(CLUBS, club_id.as_str())
            .await?
            .ok_or_else(|| MembershipError::NotFound(club_id.to_string()))?;
        Ok(ClubRecord::from_fields(&doc.fields)?)
    }

    /// Exact, case-sensitive lookup of the trimmed name.
    pub async fn find_club(&self, name: &str) -> Result<ClubRecord, RegistryError> {
        let name = validate_club_name(name, self.config.max_club_name_chars)?;
        let claim = self
            .store
            .get(CLUB_NAMES, &name)
            .await?
            .ok_or_else(|| MembershipError::NotFound(name.clone()))?;
        let claim: ClubNameClaim = serde_json::from_value(Value::Object(claim.fields))
            .map_err(|e| MembershipError::Decode(e.to_string()))?;
        self.club(&claim.club_id).await
    }

    async fn profile(&self, user: &UserId) -> Result<UserProfile, RegistryError> {
        load_profile(self.store.as_ref(), user)
            .await?
            .ok_or_else(|| RegistryError::ProfileNotFound(user.clone()))
    }

    // -----------------------------------------------------------------------
    // Founding
    // -----------------------------------------------------------------------

    /// Create a club with the actor as president and sole member.
    ///
    /// The name is claimed first with a put-if-absent write, so of two
    /// concurrent founders using the same name exactly one succeeds. The
    /// founder's affiliation is claimed next under a guard, then the club is
    /// written. A failure after the name claim releases both claims.
    pub async fn found_club(&self, ctx: &ActorContext, name: &str) -> Result<ClubId, RegistryError> {
        let name = validate_club_name(name, self.config.max_club_name_chars)?;
        let founder = self.profile(&ctx.user_id).await?;
        if let Some(existing) = founder.club_id {
            return Err(MembershipError::AlreadyAffiliated(existing).into());
        }

        let club_id = ClubId::generate();
        let claim = to_fields(&ClubNameClaim {
            club_id: club_id.clone(),
        })?;
        match self
            .store
            .create(CLUB_NAMES, &name, WriteFields::new(claim))
            .await
        {
            Ok(_) => {}
            Err(StoreError::AlreadyExists { .. }) => {
                return Err(MembershipError::DuplicateName.into())
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.claim_affiliation(&ctx.user_id, &club_id).await {
            self.release_name(&name).await;
            return Err(e);
        }

        let record = ClubRecord::found(club_id.clone(), name.clone(), ctx.user_id.clone());
        let written = match record.to_fields() {
            Ok(fields) => self
                .store
                .put(CLUBS, club_id.as_str(), WriteFields::new(fields))
                .await
                .map_err(RegistryError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = written {
            self.release_affiliation(&ctx.user_id, &club_id).await;
            self.release_name(&name).await;
            return Err(e);
        }

        log::info!("Club {:?} founded as {:?}", club_id, name);
        Ok(club_id)
    }

    /// Bind `user` to `club_id` unless they are already bound elsewhere.
    /// Re-binding to the same club succeeds.
    async fn claim_affiliation(&self, user: &UserId, club_id: &ClubId) -> Result<(), RegistryError> {
        let path = FieldPath::field(FIELD_AFFILIATION);
        let batch = UpdateBatch::new()
            .require(Precondition::AbsentOrEquals {
                path: path.clone(),
                value: Value::from(club_id.as_str()),
            })
            .op(FieldOp::set(path, club_id.as_str()));
        let result = self.store.atomic_update(USERS, user.as_str(), &batch).await;
        self.profiles.invalidate(user).await;
        match result {
            Ok(_) => Ok(()),
            Err(StoreError::PreconditionFailed(reason)) => {
                // Bound to another club since we last read the profile.
                match self.profile(user).await?.club_id {
                    Some(other) if other != *club_id => {
                        Err(MembershipError::AlreadyAffiliated(other).into())
                    }
                    _ => Err(StoreError::PreconditionFailed(reason).into()),
                }
            }
            Err(StoreError::NotFound { .. }) => Err(RegistryError::ProfileNotFound(user.clone())),
            Err(e) => Err(e.into()),
        }
    }

    /// Undo [`Self::claim_affiliation`]. Leaves a binding to any other club
    /// alone.
    async fn release_affiliation(&self, user: &UserId, club_id: &ClubId) {
        let path = FieldPath::field(FIELD_AFFILIATION);
        let batch = UpdateBatch::new()
            .require(Precondition::AbsentOrEquals {
                path: path.clone(),
                value: Value::from(club_id.as_str()),
            })
            .op(FieldOp::set(path, Value::Null));
        if let Err(e) = self.store.atomic_update(USERS, user.as_str(), &batch).await {
            log::warn!("Could not release affiliation {:?} -> {:?}: {}", user, club_id, e);
        }
        self.profiles.invalidate(user).await;
    }

    async fn release_name(&self, name: &str) {
        if let Err(e) = self.store.delete(CLUB_NAMES, name).await {
            log::warn!("Could not release club name {:?}: {}", name, e);
        }
    }

    // -----------------------------------------------------------------------
    // Join requests
    // -----------------------------------------------------------------------

    pub async fn request_to_join(
        &self,
        ctx: &ActorContext,
        club_name: &str,
    ) -> Result<RequestState, RegistryError> {
        let club = self.find_club(club_name).await?;
        let user = self.profile(&ctx.user_id).await?;
        match &user.club_id {
            Some(id) if *id == club.id => return Err(MembershipError::AlreadyMember.into()),
            Some(other) => return Err(MembershipError::AlreadyAffiliated(other.clone()).into()),
            None => {}
        }

        let max_pending = self.config.max_pending_join_requests;
        let batch = match club.plan_join_request(&ctx.user_id, max_pending)? {
            JoinPlan::AlreadyPending => return Ok(RequestState::AlreadyPending),
            JoinPlan::Enqueue(batch) => batch,
        };
        match self.store.atomic_update(CLUBS, club.id.as_str(), &batch).await {
            Ok(_) => {
                log::debug!("Join request {:?} -> {:?}", ctx.user_id, club.id);
                Ok(RequestState::Pending)
            }
            Err(StoreError::PreconditionFailed(reason)) => {
                // The club changed since we read it; report what changed.
                let current = self.club(&club.id).await?;
                match current.plan_join_request(&ctx.user_id, max_pending)? {
                    JoinPlan::AlreadyPending => Ok(RequestState::AlreadyPending),
                    JoinPlan::Enqueue(_) => Err(StoreError::PreconditionFailed(reason).into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Queued requesters' profiles, in queue order. President only.
    pub async fn pending_requests(
        &self,
        ctx: &ActorContext,
        club_id: &ClubId,
    ) -> Result<Vec<UserProfile>, RegistryError> {
        let club = self.club(club_id).await?;
        club.authorize_moderator(&ctx.user_id)?;
        Ok(self.profiles.resolve(&club.join_requests).await?)
    }

    // -----------------------------------------------------------------------
    // Moderation
    // -----------------------------------------------------------------------

    /// Move `user` from the join queue into the members set and bind their
    /// affiliation.
    ///
    /// The affiliation is claimed before the club is touched, so when two
    /// presidents admit the same user at once only one claim holds. A club
    /// update that then fails gives the claim back.
    pub async fn approve_request(
        &self,
        ctx: &ActorContext,
        club_id: &ClubId,
        user: &UserId,
    ) -> Result<ApproveOutcome, RegistryError> {
        let club = self.club(club_id).await?;
        club.authorize_moderator(&ctx.user_id)?;

        let profile = self.profile(user).await?;
        if let Some(other) = profile.club_id.as_ref().filter(|id| *id != club_id) {
            return Err(MembershipError::AlreadyAffiliated(other.clone()).into());
        }

        let batch = match club.plan_approve(user)? {
            ApprovePlan::AlreadyMember => {
                // Repair an admission whose affiliation write never landed.
                if profile.club_id.is_none() {
                    self.claim_affiliation(user, club_id).await?;
                }
                return Ok(ApproveOutcome::AlreadyMember);
            }
            ApprovePlan::Admit(batch) => batch,
        };

        self.claim_affiliation(user, club_id).await?;
        match self.store.atomic_update(CLUBS, club_id.as_str(), &batch).await {
            Ok(_) => {}
            Err(StoreError::PreconditionFailed(_)) => {
                // Someone else moderated first; report what they did.
                let current = self.club(club_id).await?;
                if current.is_member(user) {
                    return Ok(ApproveOutcome::AlreadyMember);
                }
                self.release_affiliation(user, club_id).await;
                return Err(MembershipError::NoPendingRequest.into());
            }
            Err(e) => {
                self.release_affiliation(user, club_id).await;
                return Err(e.into());
            }
        }

        log::info!("Admitted {:?} to {:?}", user, club_id);
        Ok(ApproveOutcome::Admitted)
    }

    /// Drop `user` from the join queue. Membership is never changed.
    pub async fn reject_request(
        &self,
        ctx: &ActorContext,
        club_id: &ClubId,
        user: &UserId,
    ) -> Result<RejectOutcome, RegistryError> {
        let club = self.club(club_id).await?;
        club.authorize_moderator(&ctx.user_id)?;

        match club.plan_reject(user) {
            RejectPlan::NotPending => Ok(RejectOutcome::NotPending),
            RejectPlan::Remove(batch) => {
                self.store
                    .atomic_update(CLUBS, club_id.as_str(), &batch)
                    .await?;
                log::info!("Rejected join request of {:?} to {:?}", user, club_id);
                Ok(RejectOutcome::Rejected)
            }
        }
    }
}

fn to_fields<T: serde::Serialize>(value: &T) -> Result<Fields, RegistryError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(StoreError::Decode("expected an object".into()).into()),
        Err(e) => Err(StoreError::Decode(e.to_string()).into()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
