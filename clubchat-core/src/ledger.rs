/// Reaction ledger service.
///
/// A toggle reads the message, plans the transition against what it saw, and
/// submits the whole transition as one atomic update whose precondition is
/// "this user's reactions are still what I observed". If another session
/// changed them first, or the message is gone, the toggle fails
/// `StaleReference` and the caller decides whether to re-read and retry.
///
/// Every operation is limited to members of the club the message was posted
/// in.
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use club_protocol::identity::UserProfile;
use club_protocol::ids::{ClubId, MessageId, UserId};
use club_protocol::messages::{MessageError, FIELD_CLUB_ID};
use club_protocol::reactions::{ReactionState, ReactionSummary, Reactions, FIELD_REACTIONS};
use club_protocol::symbol::{Symbol, SymbolError};

use crate::identity::{load_profile, ActorContext};
use crate::store::{DocumentStore, StoreError, MESSAGES};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Invalid reaction symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),

    #[error("Message {0} changed or disappeared; re-read before retrying")]
    StaleReference(MessageId),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Profile not found: {0}")]
    ProfileNotFound(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ReactionLedger {
    store: Arc<dyn DocumentStore>,
}

impl ReactionLedger {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        ReactionLedger { store }
    }

    /// Read the message's reactions on behalf of `ctx`, who must belong to
    /// the message's club.
    async fn read(&self, ctx: &ActorContext, message: &MessageId) -> Result<Reactions, LedgerError> {
        let doc = self
            .store
            .get(MESSAGES, message.as_str())
            .await?
            .ok_or_else(|| LedgerError::StaleReference(message.clone()))?;

        let profile = load_profile(self.store.as_ref(), &ctx.user_id)
            .await?
            .ok_or_else(|| LedgerError::ProfileNotFound(ctx.user_id.clone()))?;
        let club = doc
            .fields
            .get(FIELD_CLUB_ID)
            .and_then(Value::as_str)
            .map(ClubId::new);
        if !club.map(|club| profile.belongs_to(&club)).unwrap_or(false) {
            log::debug!("{:?} is not in the club of {:?}", ctx.user_id, message);
            return Err(MessageError::NotAMember.into());
        }

        Ok(Reactions::from_value(doc.fields.get(FIELD_REACTIONS)))
    }

    /// React, change reaction, or un-react. Returns the user's new state.
    pub async fn toggle(
        &self,
        ctx: &ActorContext,
        message: &MessageId,
        symbol: &str,
    ) -> Result<ReactionState, LedgerError> {
        let symbol = Symbol::parse(symbol)?;
        let reactions = self.read(ctx, message).await?;
        let plan = reactions.plan_toggle(&ctx.user_id, &symbol);

        match self
            .store
            .atomic_update(MESSAGES, message.as_str(), &plan.batch)
            .await
        {
            Ok(_) => {
                log::debug!("{:?} on {:?}: {:?}", ctx.user_id, message, plan.next);
                Ok(plan.next)
            }
            Err(StoreError::NotFound { .. }) | Err(StoreError::PreconditionFailed(_)) => {
                log::info!("Stale toggle by {:?} on {:?}", ctx.user_id, message);
                Err(LedgerError::StaleReference(message.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Counts per symbol plus the actor's own symbol.
    pub async fn summary(
        &self,
        ctx: &ActorContext,
        message: &MessageId,
    ) -> Result<ReactionSummary, LedgerError> {
        let reactions = self.read(ctx, message).await?;
        Ok(reactions.summary(&ctx.user_id))
    }

    /// Who reacted with `symbol`. Users without a profile are skipped.
    pub async fn reactors(
        &self,
        ctx: &ActorContext,
        message: &MessageId,
        symbol: &str,
    ) -> Result<Vec<UserProfile>, LedgerError> {
        let symbol = Symbol::parse(symbol)?;
        let reactions = self.read(ctx, message).await?;

        let mut profiles = Vec::new();
        for user in reactions.reactors(&symbol) {
            match load_profile(self.store.as_ref(), &user).await? {
                Some(profile) => profiles.push(profile),
                None => log::warn!("No profile for reactor {:?}", user),
            }
        }
        Ok(profiles)
    }

    /// Raw reactor ids, without profile lookups.
    pub async fn reactor_ids(
        &self,
        ctx: &ActorContext,
        message: &MessageId,
        symbol: &Symbol,
    ) -> Result<Vec<UserId>, LedgerError> {
        let reactions = self.read(ctx, message).await?;
        Ok(reactions.reactors(symbol))
    }
}
