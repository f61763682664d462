/// Message feed service: posting, live subscriptions and history.
///
/// Queries are filtered by `clubId` at the store, never client-side. A
/// subscriber only ever receives its own club's messages.
use std::sync::Arc;

use thiserror::Error;

use club_protocol::ids::{ClubId, MessageId, UserId};
use club_protocol::messages::{
    validate_body, Feed, MessageEntry, MessageError, NewMessage, FIELD_CLUB_ID, FIELD_CREATED_AT,
};

use crate::config::ClubChatConfig;
use crate::identity::{load_profile, ActorContext};
use crate::store::{DocumentStore, Query, Snapshot, StoreError, Subscription, WriteFields, MESSAGES};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Profile not found: {0}")]
    ProfileNotFound(UserId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Store query for one club's feed, oldest first.
pub fn feed_query(club: &ClubId) -> Query {
    Query::collection(MESSAGES)
        .where_eq(FIELD_CLUB_ID, club.as_str())
        .order_by(FIELD_CREATED_AT)
}

/// Decode a feed snapshot. Undecodable documents are skipped.
pub fn decode_feed(club: &ClubId, snapshot: &Snapshot) -> Feed {
    let entries = snapshot
        .docs
        .iter()
        .filter_map(|doc| {
            MessageEntry::from_fields(MessageId::new(doc.id.clone()), &doc.fields)
                .map_err(|e| log::warn!("Skipping message {}: {}", doc.id, e))
                .ok()
        })
        .collect();
    Feed::from_store_order(club, entries)
}

/// Live, ordered view of one club's messages.
pub struct FeedSubscription {
    club: ClubId,
    inner: Subscription,
}

impl FeedSubscription {
    /// Full ordered feed on first call and after every change. `None` once
    /// the subscription is cancelled or the stream was dropped; subscribe
    /// again to restart.
    pub async fn next(&mut self) -> Option<Feed> {
        let snapshot = self.inner.next().await?;
        Some(decode_feed(&self.club, &snapshot))
    }

    pub fn club(&self) -> &ClubId {
        &self.club
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }
}

pub struct MessageFeed {
    store: Arc<dyn DocumentStore>,
    config: ClubChatConfig,
}

impl MessageFeed {
    pub fn new(store: Arc<dyn DocumentStore>, config: ClubChatConfig) -> Self {
        MessageFeed { store, config }
    }

    pub async fn post(
        &self,
        ctx: &ActorContext,
        club: &ClubId,
        body: &str,
    ) -> Result<MessageId, FeedError> {
        // Reject bad bodies before touching the store
        validate_body(body, self.config.max_message_body_bytes)?;

        let sender = load_profile(self.store.as_ref(), &ctx.user_id)
            .await?
            .ok_or_else(|| FeedError::ProfileNotFound(ctx.user_id.clone()))?;
        let message = NewMessage::compose(&sender, club, body, self.config.max_message_body_bytes)?;

        let fields = WriteFields::new(message.to_fields()?).with_server_timestamp(FIELD_CREATED_AT);
        let doc = self.store.add(MESSAGES, fields).await?;
        log::debug!("Posted {} to {:?}", doc.id, club);
        Ok(MessageId::new(doc.id))
    }

    async fn check_member(&self, ctx: &ActorContext, club: &ClubId) -> Result<(), FeedError> {
        let profile = load_profile(self.store.as_ref(), &ctx.user_id)
            .await?
            .ok_or_else(|| FeedError::ProfileNotFound(ctx.user_id.clone()))?;
        if !profile.belongs_to(club) {
            return Err(MessageError::NotAMember.into());
        }
        Ok(())
    }

    pub async fn subscribe(
        &self,
        ctx: &ActorContext,
        club: &ClubId,
    ) -> Result<FeedSubscription, FeedError> {
        self.check_member(ctx, club).await?;
        let inner = self.store.subscribe(feed_query(club)).await?;
        Ok(FeedSubscription {
            club: club.clone(),
            inner,
        })
    }

    /// One-shot ordered fetch.
    pub async fn history(
        &self,
        ctx: &ActorContext,
        club: &ClubId,
    ) -> Result<Vec<MessageEntry>, FeedError> {
        self.check_member(ctx, club).await?;
        let snapshot = self.store.query(&feed_query(club)).await?;
        Ok(decode_feed(club, &snapshot).into_entries())
    }
}
