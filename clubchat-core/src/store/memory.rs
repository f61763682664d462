/// In-memory document store.
///
/// All state sits behind one async mutex, so every call is linearizable and
/// `atomic_update` is trivially atomic. Live queries are fanned out through
/// unbounded channels after every write to their collection; a subscriber
/// only receives a snapshot when its result actually changed.
///
/// Fault injection for tests:
/// - `set_available(false)` makes every call fail `Unavailable`
/// - `drop_subscriptions()` closes every live stream, as a lost connection would
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use club_protocol::ids::{generate_document_id, ServerTimestamp};
use club_protocol::ops::{apply_ops, UpdateBatch};

use super::{Document, DocumentStore, Query, Snapshot, StoreError, Subscription, WriteFields};

struct Watcher {
    query: Query,
    tx: mpsc::UnboundedSender<Snapshot>,
    token: CancellationToken,
    last: Snapshot,
}

impl Watcher {
    fn is_live(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, BTreeMap<String, Document>>,
    next_seq: u64,
    last_millis: i64,
    watchers: Vec<Watcher>,
}

impl StoreState {
    /// Monotonic timestamp: wall clock clamped to never go backwards, plus a
    /// strictly increasing sequence.
    fn tick(&mut self) -> ServerTimestamp {
        let now = chrono::Utc::now().timestamp_millis();
        self.last_millis = self.last_millis.max(now);
        self.next_seq += 1;
        ServerTimestamp::new(self.last_millis, self.next_seq)
    }

    fn run_query(&self, query: &Query) -> Snapshot {
        let mut docs: Vec<Document> = self
            .collections
            .get(&query.collection)
            .map(|docs| docs.values().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default();
        query.sort(&mut docs);
        Snapshot { docs }
    }

    fn write(&mut self, collection: &str, id: &str, fields: WriteFields, seq: Option<u64>) -> Document {
        let ts = self.tick();
        let mut stored = fields.fields;
        for name in &fields.server_timestamps {
            // ServerTimestamp is two plain integers; encoding cannot fail.
            let stamp = serde_json::to_value(ts).unwrap_or(Value::Null);
            stored.insert(name.clone(), stamp);
        }
        let doc = Document {
            id: id.to_string(),
            fields: stored,
            seq: seq.unwrap_or(ts.seq),
        };
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        doc
    }

    fn existing_seq(&self, collection: &str, id: &str) -> Option<u64> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.seq)
    }

    /// Push fresh snapshots to every live watcher on `collection` whose
    /// result changed, and forget the dead ones.
    fn notify(&mut self, collection: &str) {
        self.watchers.retain(Watcher::is_live);

        let mut updates = Vec::new();
        for (idx, watcher) in self.watchers.iter().enumerate() {
            if watcher.query.collection != collection {
                continue;
            }
            let snapshot = self.run_query(&watcher.query);
            if snapshot != watcher.last {
                updates.push((idx, snapshot));
            }
        }
        for (idx, snapshot) in updates {
            let watcher = &mut self.watchers[idx];
            if watcher.tx.send(snapshot.clone()).is_ok() {
                watcher.last = snapshot;
            }
        }
    }
}

pub struct InMemoryDocumentStore {
    state: Mutex<StoreState>,
    available: AtomicBool,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        InMemoryDocumentStore {
            state: Mutex::new(StoreState::default()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        log::info!("In-memory store availability set to {}", available);
    }

    /// Close every live subscription stream.
    pub async fn drop_subscriptions(&self) {
        let mut state = self.state.lock().await;
        let dropped = state.watchers.len();
        state.watchers.clear();
        log::warn!("Dropped {} live subscription(s)", dropped);
    }

    /// Subscriptions that are neither cancelled nor closed.
    pub async fn live_subscriptions(&self) -> usize {
        let state = self.state.lock().await;
        state.watchers.iter().filter(|w| w.is_live()).count()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn put(
        &self,
        collection: &str,
        id: &str,
        fields: WriteFields,
    ) -> Result<Document, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let seq = state.existing_seq(collection, id);
        let doc = state.write(collection, id, fields, seq);
        state.notify(collection);
        Ok(doc)
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        fields: WriteFields,
    ) -> Result<Document, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        if state.existing_seq(collection, id).is_some() {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        let doc = state.write(collection, id, fields, None);
        state.notify(collection);
        Ok(doc)
    }

    async fn add(&self, collection: &str, fields: WriteFields) -> Result<Document, StoreError> {
        self.check_available()?;
        let id = generate_document_id();
        let mut state = self.state.lock().await;
        let doc = state.write(collection, &id, fields, None);
        state.notify(collection);
        Ok(doc)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        let removed = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some();
        if removed {
            state.tick();
            state.notify(collection);
        }
        Ok(removed)
    }

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        self.check_available()?;
        let state = self.state.lock().await;
        Ok(state.run_query(query))
    }

    async fn atomic_update(
        &self,
        collection: &str,
        id: &str,
        batch: &UpdateBatch,
    ) -> Result<Document, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let doc = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        if let Some(failed) = batch.failed_precondition(&doc.fields) {
            log::debug!("Update of {}/{} rejected: {:?}", collection, id, failed);
            return Err(StoreError::PreconditionFailed(format!("{:?}", failed)));
        }
        apply_ops(&mut doc.fields, &batch.ops)?;
        let updated = doc.clone();

        state.tick();
        state.notify(collection);
        Ok(updated)
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;

        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let initial = state.run_query(&query);
        // Receiver is alive: we still hold it.
        let _ = tx.send(initial.clone());

        state.watchers.retain(Watcher::is_live);
        state.watchers.push(Watcher {
            query,
            tx,
            token: token.clone(),
            last: initial,
        });
        Ok(Subscription::new(rx, token))
    }

    async fn server_timestamp(&self) -> Result<ServerTimestamp, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        Ok(state.tick())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
