//! End-to-end flows across accounts, registry, feed, ledger and projector,
//! all sharing one in-memory store the way separate client sessions share
//! a backend.

use std::sync::Arc;
use std::time::Duration;

use crate::accounts::{Accounts, NewAccount};
use crate::config::{ClubChatConfig, ResubscribePolicy};
use crate::error::{ClubChatError, ErrorClass};
use crate::feed::MessageFeed;
use crate::identity::{ActorContext, InMemoryIdentityProvider};
use crate::ledger::{LedgerError, ReactionLedger};
use crate::projector::{ProjectorHandle, SyncProjector};
use crate::registry::{ApproveOutcome, ClubRegistry, RegistryError, RejectOutcome, RequestState};
use crate::store::{DocumentStore, InMemoryDocumentStore, Query, CLUBS, MESSAGES};
use club_protocol::ids::ClubId;
use club_protocol::membership::MembershipError;
use club_protocol::reactions::ReactionState;
use club_protocol::symbol::{Symbol, SymbolError};
use club_protocol::view::ClubView;

const WAIT: Duration = Duration::from_secs(5);

struct Backend {
    store: Arc<InMemoryDocumentStore>,
    config: ClubChatConfig,
    accounts: Accounts,
    registry: Arc<ClubRegistry>,
    feed: MessageFeed,
    ledger: ReactionLedger,
}

impl Backend {
    fn new() -> Self {
        let config = ClubChatConfig {
            resubscribe: ResubscribePolicy {
                initial_delay_ms: 1,
                max_delay_ms: 10,
                jitter_ms: 1,
            },
            ..ClubChatConfig::default()
        };
        let store = Arc::new(InMemoryDocumentStore::new());
        let shared: Arc<dyn DocumentStore> = store.clone();
        let registry = Arc::new(ClubRegistry::new(shared.clone(), config.clone()));
        Backend {
            accounts: Accounts::new(
                shared.clone(),
                Arc::new(InMemoryIdentityProvider::new()),
                registry.clone(),
            ),
            feed: MessageFeed::new(shared.clone(), config.clone()),
            ledger: ReactionLedger::new(shared),
            registry,
            store,
            config,
        }
    }

    async fn president(&self, name: &str, club: &str) -> (ActorContext, ClubId) {
        let created = self
            .accounts
            .create_account(
                NewAccount::new(name, format!("{}@example.com", name), "hunter22", "President")
                    .founding(club),
            )
            .await
            .unwrap();
        (created.actor, created.club_id.unwrap())
    }

    async fn member(&self, name: &str) -> ActorContext {
        self.accounts
            .create_account(NewAccount::new(
                name,
                format!("{}@example.com", name),
                "hunter22",
                "Member",
            ))
            .await
            .unwrap()
            .actor
    }

    /// Request, then approve as `president`.
    async fn admit(&self, president: &ActorContext, club: &ClubId, user: &ActorContext) {
        let record = self.registry.club(club).await.unwrap();
        self.registry.request_to_join(user, &record.name).await.unwrap();
        self.registry
            .approve_request(president, club, &user.user_id)
            .await
            .unwrap();
    }

    fn project(&self, ctx: &ActorContext) -> ProjectorHandle {
        SyncProjector::spawn(self.store.clone(), &self.config, ctx)
    }
}

async fn wait_view(handle: &ProjectorHandle, pred: impl FnMut(&ClubView) -> bool) -> ClubView {
    tokio::time::timeout(WAIT, handle.wait_for(pred))
        .await
        .expect("view condition not reached")
        .expect("projector stopped")
}

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

#[tokio::test]
async fn test_chess_club_end_to_end() {
    let backend = Backend::new();
    let (alice, chess) = backend.president("Alice", "Chess Club").await;
    let bob = backend.member("Bob").await;

    let alice_view = backend.project(&alice);
    let bob_view = backend.project(&bob);

    // Bob asks to join; Alice sees the request with Bob's profile
    assert_eq!(
        backend.registry.request_to_join(&bob, "Chess Club").await.unwrap(),
        RequestState::Pending
    );
    wait_view(&alice_view, |v| v.pending_requests().len() == 1).await;
    let pending = alice_view.pending_profiles().await.unwrap();
    assert_eq!(pending[0].display_name, "Bob");

    let view = wait_view(&bob_view, |v| v.profile.is_some()).await;
    assert!(view.club.is_none());
    assert!(view.pending_requests().is_empty());

    // Approval moves Bob into the club on both screens
    assert_eq!(
        backend
            .registry
            .approve_request(&alice, &chess, &bob.user_id)
            .await
            .unwrap(),
        ApproveOutcome::Admitted
    );
    let view = wait_view(&bob_view, |v| v.club.is_some()).await;
    let club = view.club.as_ref().unwrap();
    assert_eq!(club.name, "Chess Club");
    assert!(!club.is_president);
    let view = wait_view(&alice_view, |v| {
        v.club.as_ref().map(|c| c.member_count) == Some(2)
    })
    .await;
    assert!(view.pending_requests().is_empty());

    // Alice posts; Bob sees it
    let welcome = backend.feed.post(&alice, &chess, "Welcome, Bob!").await.unwrap();
    let view = wait_view(&bob_view, |v| v.messages.len() == 1).await;
    assert_eq!(view.messages[0].sender_display_name, "Alice");
    assert_eq!(view.messages[0].sender_role, "President");
    assert!(!view.messages[0].is_mine);

    // Bob reacts 👍, changes to ❤️; Alice sees one ❤️
    backend.ledger.toggle(&bob, &welcome, "👍").await.unwrap();
    assert_eq!(
        backend.ledger.toggle(&bob, &welcome, "❤️").await.unwrap(),
        ReactionState::Reacted(sym("❤️"))
    );
    let view = wait_view(&alice_view, |v| {
        v.message(&welcome)
            .map(|m| m.reactions.counts.get(&sym("❤️")) == Some(&1))
            .unwrap_or(false)
    })
    .await;
    let reactions = &view.message(&welcome).unwrap().reactions;
    assert!(reactions.counts.get(&sym("👍")).is_none());
    assert!(reactions.mine.is_none());

    let view = wait_view(&bob_view, |v| {
        v.message(&welcome).and_then(|m| m.reactions.mine.clone()) == Some(sym("❤️"))
    })
    .await;
    assert_eq!(view.messages.len(), 1);

    // Bob replies
    backend.feed.post(&bob, &chess, "Thanks!").await.unwrap();
    let view = wait_view(&alice_view, |v| v.messages.len() == 2).await;
    assert_eq!(view.messages[1].body, "Thanks!");
    assert!(view.messages[0].is_mine);
    assert!(!view.messages[1].is_mine);

    alice_view.shutdown().await;
    bob_view.shutdown().await;
    assert_eq!(backend.store.live_subscriptions().await, 0);
}

#[tokio::test]
async fn test_invalid_symbol_changes_nothing() {
    let backend = Backend::new();
    let (alice, chess) = backend.president("Alice", "Chess Club").await;
    let message = backend.feed.post(&alice, &chess, "hello").await.unwrap();
    let before = backend.store.get(MESSAGES, message.as_str()).await.unwrap();

    let err: ClubChatError = backend
        .ledger
        .toggle(&alice, &message, "ab")
        .await
        .unwrap_err()
        .into();
    assert_eq!(
        err,
        ClubChatError::Ledger(LedgerError::InvalidSymbol(SymbolError::MultipleGraphemes(2)))
    );
    assert_eq!(err.class(), ErrorClass::Validation);
    assert_eq!(
        backend.store.get(MESSAGES, message.as_str()).await.unwrap(),
        before
    );
}

#[tokio::test]
async fn test_feed_order_follows_server_time() {
    let backend = Backend::new();
    let (alice, chess) = backend.president("Alice", "Chess Club").await;
    let bob = backend.member("Bob").await;
    backend.admit(&alice, &chess, &bob).await;

    for (i, who) in [&alice, &bob, &alice, &bob, &bob].into_iter().enumerate() {
        backend
            .feed
            .post(who, &chess, &format!("move {}", i))
            .await
            .unwrap();
    }

    let history = backend.feed.history(&bob, &chess).await.unwrap();
    let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["move 0", "move 1", "move 2", "move 3", "move 4"]);
    assert!(history.windows(2).all(|w| w[0].created_at < w[1].created_at));

    let alice_view = backend.project(&alice);
    let view = wait_view(&alice_view, |v| v.messages.len() == 5).await;
    let projected: Vec<&str> = view.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(projected, bodies);
    alice_view.shutdown().await;
}

#[tokio::test]
async fn test_approve_then_reject_keeps_membership() {
    let backend = Backend::new();
    let (alice, chess) = backend.president("Alice", "Chess Club").await;
    let bob = backend.member("Bob").await;
    backend.admit(&alice, &chess, &bob).await;

    assert_eq!(
        backend
            .registry
            .reject_request(&alice, &chess, &bob.user_id)
            .await
            .unwrap(),
        RejectOutcome::NotPending
    );
    assert_eq!(
        backend
            .registry
            .approve_request(&alice, &chess, &bob.user_id)
            .await
            .unwrap(),
        ApproveOutcome::AlreadyMember
    );

    let club = backend.registry.club(&chess).await.unwrap();
    assert!(club.is_member(&bob.user_id));
    assert!(!club.is_pending(&bob.user_id));
    club.check_invariants().unwrap();

    // A member cannot queue again
    assert_eq!(
        backend.registry.request_to_join(&bob, "Chess Club").await,
        Err(RegistryError::Membership(MembershipError::AlreadyMember))
    );
}

#[tokio::test]
async fn test_non_president_cannot_moderate() {
    let backend = Backend::new();
    let (alice, chess) = backend.president("Alice", "Chess Club").await;
    let bob = backend.member("Bob").await;
    let carol = backend.member("Carol").await;
    backend.admit(&alice, &chess, &bob).await;
    backend.registry.request_to_join(&carol, "Chess Club").await.unwrap();

    let err: ClubChatError = backend
        .registry
        .approve_request(&bob, &chess, &carol.user_id)
        .await
        .unwrap_err()
        .into();
    assert_eq!(err.class(), ErrorClass::Authorization);
    assert!(backend
        .registry
        .club(&chess)
        .await
        .unwrap()
        .is_pending(&carol.user_id));
}

#[tokio::test]
async fn test_concurrent_founding_yields_one_club() {
    let backend = Arc::new(Backend::new());
    let mut founders = Vec::new();
    for name in ["Alice", "Carol", "Dave", "Erin"] {
        founders.push(backend.member(name).await);
    }

    let mut tasks = Vec::new();
    for founder in founders {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            backend.registry.found_club(&founder, "Chess Club").await
        }));
    }

    let mut winners = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, RegistryError::Membership(MembershipError::DuplicateName)),
        }
    }
    assert_eq!(winners, 1);

    let clubs = backend.store.query(&Query::collection(CLUBS)).await.unwrap();
    assert_eq!(clubs.docs.len(), 1);
}

#[tokio::test]
async fn test_projector_follows_member_through_outage() {
    let backend = Backend::new();
    let (alice, chess) = backend.president("Alice", "Chess Club").await;
    let bob = backend.member("Bob").await;
    let bob_view = backend.project(&bob);
    wait_view(&bob_view, |v| v.profile.is_some()).await;

    backend.admit(&alice, &chess, &bob).await;
    wait_view(&bob_view, |v| v.club.is_some()).await;

    // Connection lost; a message lands while the stream is down
    backend.store.drop_subscriptions().await;
    backend.feed.post(&alice, &chess, "while you were away").await.unwrap();

    let view = wait_view(&bob_view, |v| v.messages.len() == 1).await;
    assert_eq!(view.messages[0].body, "while you were away");
    assert_eq!(view.club.as_ref().map(|c| c.id.clone()), Some(chess));
    bob_view.shutdown().await;
    assert_eq!(backend.store.live_subscriptions().await, 0);
}
