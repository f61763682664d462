/// Synchronization projector.
///
/// Keeps one user's [`ClubView`] in step with the store. Three live queries
/// feed it: the user document, the user's club document and the club's
/// message feed. Each stream's latest snapshot replaces that slice and the
/// view is re-derived from scratch, so duplicate or reordered notifications
/// cannot corrupt it and no ordering between streams is assumed.
///
/// **Affiliation changes**: when the user's `clubId` changes, the club and
/// feed subscriptions are cancelled before the new ones are opened. Each
/// club-scoped stream is tagged with the generation it was opened in and
/// snapshots from an older generation are discarded.
///
/// **Dropped streams**: a stream that closes without being cancelled is
/// re-opened after a jittered backoff ([`ResubscribePolicy`]) and replays its
/// full snapshot. This is the only retrying the core does.
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use club_protocol::identity::UserProfile;
use club_protocol::ids::{ClubId, UserId};
use club_protocol::membership::ClubRecord;
use club_protocol::messages::MessageEntry;
use club_protocol::view::ClubView;

use crate::config::{ClubChatConfig, ResubscribePolicy};
use crate::feed::{decode_feed, feed_query};
use crate::identity::{decode_profile, ActorContext, ProfileCache};
use crate::store::{DocumentStore, Query, Snapshot, StoreError, Subscription, CLUBS, USERS};

/// A club-scoped stream and the generation it belongs to.
struct ClubStream {
    generation: u64,
    sub: Subscription,
}

enum Event {
    User(Option<Snapshot>),
    Club(u64, Option<Snapshot>),
    Feed(u64, Option<Snapshot>),
}

pub struct SyncProjector {
    store: Arc<dyn DocumentStore>,
    policy: ResubscribePolicy,
    cancel: CancellationToken,
    viewer: UserId,
    tx: watch::Sender<ClubView>,

    // Latest snapshot per slice
    user: Option<UserProfile>,
    club: Option<ClubRecord>,
    messages: Vec<MessageEntry>,

    affiliation: Option<ClubId>,
    generation: u64,
    user_sub: Option<Subscription>,
    club_sub: Option<ClubStream>,
    feed_sub: Option<ClubStream>,
}

impl SyncProjector {
    /// Start projecting `ctx`'s club view on the current tokio runtime.
    pub fn spawn(
        store: Arc<dyn DocumentStore>,
        config: &ClubChatConfig,
        ctx: &ActorContext,
    ) -> ProjectorHandle {
        let (tx, rx) = watch::channel(ClubView::empty(ctx.user_id.clone()));
        let cancel = CancellationToken::new();
        let profiles = Arc::new(ProfileCache::new(
            store.clone(),
            config.profile_cache_capacity,
        ));

        let projector = SyncProjector {
            store,
            policy: config.resubscribe.clone(),
            cancel: cancel.clone(),
            viewer: ctx.user_id.clone(),
            tx,
            user: None,
            club: None,
            messages: Vec::new(),
            affiliation: None,
            generation: 0,
            user_sub: None,
            club_sub: None,
            feed_sub: None,
        };
        let task = tokio::spawn(projector.run());

        ProjectorHandle {
            view: rx,
            cancel: cancel.clone(),
            task,
            profiles,
            _guard: cancel.drop_guard(),
        }
    }

    async fn run(mut self) {
        log::info!("Projector started for {:?}", self.viewer);
        let user_query = Query::document(USERS, self.viewer.as_str());
        self.user_sub =
            subscribe_with_retry(&self.store, &self.policy, &self.cancel, &user_query, false).await;

        while self.user_sub.is_some() {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                snapshot = next_user(&mut self.user_sub) => Event::User(snapshot),
                (generation, snapshot) = next_club(&mut self.club_sub) => Event::Club(generation, snapshot),
                (generation, snapshot) = next_club(&mut self.feed_sub) => Event::Feed(generation, snapshot),
            };
            self.handle(event).await;
        }

        self.user_sub = None;
        self.club_sub = None;
        self.feed_sub = None;
        log::info!("Projector stopped for {:?}", self.viewer);
    }

    async fn handle(&mut self, event: Event) {
        match event {
            Event::User(Some(snapshot)) => {
                self.user = snapshot.first().and_then(|doc| {
                    decode_profile(doc)
                        .map_err(|e| log::warn!("Ignoring user snapshot: {}", e))
                        .ok()
                });
                let affiliation = self.user.as_ref().and_then(|u| u.club_id.clone());
                if affiliation != self.affiliation {
                    self.switch_club(affiliation).await;
                }
                self.publish();
            }
            Event::User(None) => {
                log::warn!("User stream for {:?} dropped; resubscribing", self.viewer);
                let query = Query::document(USERS, self.viewer.as_str());
                self.user_sub =
                    subscribe_with_retry(&self.store, &self.policy, &self.cancel, &query, true)
                        .await;
            }
            Event::Club(generation, _) | Event::Feed(generation, _)
                if generation != self.generation =>
            {
                log::debug!("Discarding snapshot from generation {}", generation);
            }
            Event::Club(_, Some(snapshot)) => {
                self.club = snapshot.first().and_then(|doc| {
                    ClubRecord::from_fields(&doc.fields)
                        .map_err(|e| log::warn!("Ignoring club snapshot: {}", e))
                        .ok()
                });
                self.publish();
            }
            Event::Feed(_, Some(snapshot)) => {
                if let Some(club) = &self.affiliation {
                    self.messages = decode_feed(club, &snapshot).into_entries();
                }
                self.publish();
            }
            Event::Club(_, None) => {
                if let Some(club) = self.affiliation.clone() {
                    log::warn!("Club stream for {:?} dropped; resubscribing", club);
                    let query = Query::document(CLUBS, club.as_str());
                    self.club_sub = self.open_club_stream(&query).await;
                }
            }
            Event::Feed(_, None) => {
                if let Some(club) = self.affiliation.clone() {
                    log::warn!("Feed stream for {:?} dropped; resubscribing", club);
                    self.feed_sub = self.open_club_stream(&feed_query(&club)).await;
                }
            }
        }
    }

    async fn open_club_stream(&self, query: &Query) -> Option<ClubStream> {
        let generation = self.generation;
        subscribe_with_retry(&self.store, &self.policy, &self.cancel, query, true)
            .await
            .map(|sub| ClubStream { generation, sub })
    }

    /// Tear down the previous club's streams, then follow `next`.
    async fn switch_club(&mut self, next: Option<ClubId>) {
        self.generation += 1;
        if let Some(old) = self.club_sub.take() {
            old.sub.cancel();
        }
        if let Some(old) = self.feed_sub.take() {
            old.sub.cancel();
        }
        self.club = None;
        self.messages.clear();

        log::info!(
            "Affiliation of {:?}: {:?} -> {:?} (generation {})",
            self.viewer,
            self.affiliation,
            next,
            self.generation
        );
        self.affiliation = next.clone();

        if let Some(club) = next {
            let generation = self.generation;
            let club_query = Query::document(CLUBS, club.as_str());
            self.club_sub =
                subscribe_with_retry(&self.store, &self.policy, &self.cancel, &club_query, false)
                    .await
                    .map(|sub| ClubStream { generation, sub });
            self.feed_sub =
                subscribe_with_retry(&self.store, &self.policy, &self.cancel, &feed_query(&club), false)
                    .await
                    .map(|sub| ClubStream { generation, sub });
        }
    }

    fn publish(&self) {
        let view = ClubView::derive(
            &self.viewer,
            self.user.as_ref(),
            self.club.as_ref(),
            &self.messages,
        );
        let changed = self.tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
        if changed {
            log::debug!(
                "View for {:?} now {}",
                self.viewer,
                hex::encode(&self.tx.borrow().state_hash()[..8])
            );
        }
    }
}

async fn next_user(slot: &mut Option<Subscription>) -> Option<Snapshot> {
    match slot {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn next_club(slot: &mut Option<ClubStream>) -> (u64, Option<Snapshot>) {
    match slot {
        Some(stream) => (stream.generation, stream.sub.next().await),
        None => std::future::pending().await,
    }
}

/// Subscribe, retrying with backoff while the store refuses. `None` only
/// when the projector is shutting down.
async fn subscribe_with_retry(
    store: &Arc<dyn DocumentStore>,
    policy: &ResubscribePolicy,
    cancel: &CancellationToken,
    query: &Query,
    delay_first: bool,
) -> Option<Subscription> {
    let mut attempt: u32 = 0;
    if delay_first {
        if !pause(policy, cancel, attempt).await {
            return None;
        }
        attempt += 1;
    }
    loop {
        match store.subscribe(query.clone()).await {
            Ok(sub) => return Some(sub),
            Err(e) => {
                log::warn!(
                    "Subscribe to {} failed (attempt {}): {}",
                    query.collection,
                    attempt + 1,
                    e
                );
                if !pause(policy, cancel, attempt).await {
                    return None;
                }
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Sleep for the policy's delay. `false` if cancelled meanwhile.
async fn pause(policy: &ResubscribePolicy, cancel: &CancellationToken, attempt: u32) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(policy.delay_for(attempt)) => true,
    }
}

// ---------------------------------------------------------------------------
// ProjectorHandle
// ---------------------------------------------------------------------------

/// Owner of a running projector. Dropping it stops the projector.
pub struct ProjectorHandle {
    view: watch::Receiver<ClubView>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    profiles: Arc<ProfileCache>,
    _guard: DropGuard,
}

impl ProjectorHandle {
    /// A receiver notified on every view change.
    pub fn view(&self) -> watch::Receiver<ClubView> {
        self.view.clone()
    }

    pub fn current(&self) -> ClubView {
        self.view.borrow().clone()
    }

    pub fn state_hash(&self) -> [u8; 32] {
        self.view.borrow().state_hash()
    }

    /// Wait until the view satisfies `pred`. `None` if the projector stopped.
    pub async fn wait_for(&self, mut pred: impl FnMut(&ClubView) -> bool) -> Option<ClubView> {
        let mut rx = self.view.clone();
        loop {
            {
                let view = rx.borrow_and_update();
                if pred(&view) {
                    return Some(view.clone());
                }
            }
            if rx.changed().await.is_err() {
                return None;
            }
        }
    }

    /// Profiles of the users queued to join, for the president's request
    /// list. Empty for other members.
    pub async fn pending_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        let pending = self.view.borrow().pending_requests().to_vec();
        self.profiles.resolve(&pending).await
    }

    /// Cancel every subscription and wait for the task to finish.
    pub async fn shutdown(self) {
        let ProjectorHandle { cancel, task, .. } = self;
        cancel.cancel();
        if let Err(e) = task.await {
            log::error!("Projector task failed: {}", e);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
