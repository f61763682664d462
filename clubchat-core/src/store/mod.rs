/// Document store contract.
///
/// The core never talks to a concrete database. Everything it persists goes
/// through [`DocumentStore`]: keyed documents in named collections, equality
/// queries with a single order-by field, single-document atomic updates
/// guarded by preconditions, and live queries that deliver a full snapshot on
/// subscribe and again after every matching change.
///
/// [`memory::InMemoryDocumentStore`] is the reference implementation used by
/// the test suite.
use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use club_protocol::ids::ServerTimestamp;
use club_protocol::ops::{Fields, OpError, UpdateBatch};

pub mod memory;

pub use memory::InMemoryDocumentStore;

// ── Collections ─────────────────────────────────────────────────────────────

pub const USERS: &str = "users";
pub const CLUBS: &str = "clubs";
/// Name claims enforcing club name uniqueness, keyed by the exact name.
pub const CLUB_NAMES: &str = "club_names";
pub const MESSAGES: &str = "messages";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Document store unavailable")]
    Unavailable,

    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Invalid update: {0}")]
    InvalidUpdate(#[from] OpError),

    #[error("Document decode error: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
    /// Store-wide insertion sequence. Breaks order-by ties.
    pub seq: u64,
}

/// Fields for a write, plus the names of fields the store must stamp with
/// its own [`ServerTimestamp`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteFields {
    pub fields: Fields,
    pub server_timestamps: Vec<String>,
}

impl WriteFields {
    pub fn new(fields: Fields) -> Self {
        WriteFields {
            fields,
            server_timestamps: Vec::new(),
        }
    }

    pub fn with_server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamps.push(field.into());
        self
    }
}

/// Result of a query, in query order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub docs: Vec<Document>,
}

impl Snapshot {
    pub fn first(&self) -> Option<&Document> {
        self.docs.first()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Equality filters over one collection, optionally ordered by one field.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub collection: String,
    pub doc_id: Option<String>,
    pub filters: Vec<(String, Value)>,
    pub order_by: Option<String>,
}

impl Query {
    pub fn collection(collection: impl Into<String>) -> Self {
        Query {
            collection: collection.into(),
            doc_id: None,
            filters: Vec::new(),
            order_by: None,
        }
    }

    /// Live view of a single document: an empty snapshot while it is absent.
    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        let mut query = Query::collection(collection);
        query.doc_id = Some(id.into());
        query
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(id) = &self.doc_id {
            if doc.id != *id {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(field, value)| doc.fields.get(field) == Some(value))
    }

    /// Sort matching documents by the order-by field, then insertion
    /// sequence. Documents missing the field sort first.
    pub fn sort(&self, docs: &mut [Document]) {
        match &self.order_by {
            Some(field) => docs.sort_by(|a, b| {
                compare_values(a.fields.get(field), b.fields.get(field))
                    .then_with(|| a.seq.cmp(&b.seq))
            }),
            None => docs.sort_by_key(|doc| doc.seq),
        }
    }
}

/// Total order over JSON values of the same shape. Objects compare field by
/// field in key order, which orders a stored `ServerTimestamp` by
/// `(millis, seq)`.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => compare_present(a, b),
    }
}

fn compare_present(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Object(x), Value::Object(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let ord = kx.cmp(ky).then_with(|| compare_present(vx, vy));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Array(x), Value::Array(y)) => {
            for (vx, vy) in x.iter().zip(y.iter()) {
                let ord = compare_present(vx, vy);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Live query handle. Dropping it cancels the subscription.
///
/// Once cancelled, [`Subscription::next`] returns `None` even if snapshots
/// were already queued, so a torn-down consumer never sees a late update.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Snapshot>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl Subscription {
    pub fn new(rx: mpsc::UnboundedReceiver<Snapshot>, token: CancellationToken) -> Self {
        let guard = token.clone().drop_guard();
        Subscription {
            rx,
            token,
            _guard: guard,
        }
    }

    /// Next snapshot. `None` once the subscription is cancelled or the store
    /// closed the stream.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if self.token.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            snapshot = self.rx.recv() => snapshot,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// DocumentStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or overwrite a document.
    async fn put(&self, collection: &str, id: &str, fields: WriteFields)
        -> Result<Document, StoreError>;

    /// Create a document only if absent; fails `AlreadyExists` otherwise.
    async fn create(
        &self,
        collection: &str,
        id: &str,
        fields: WriteFields,
    ) -> Result<Document, StoreError>;

    /// Create a document under a store-assigned id.
    async fn add(&self, collection: &str, fields: WriteFields) -> Result<Document, StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, collection: &str, id: &str) -> Result<bool, StoreError>;

    async fn query(&self, query: &Query) -> Result<Snapshot, StoreError>;

    /// Apply every op of `batch` atomically if all its preconditions hold.
    /// Fails `NotFound` for a missing document and `PreconditionFailed` when
    /// a precondition does not hold; in both cases nothing is written.
    async fn atomic_update(
        &self,
        collection: &str,
        id: &str,
        batch: &UpdateBatch,
    ) -> Result<Document, StoreError>;

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;

    async fn server_timestamp(&self) -> Result<ServerTimestamp, StoreError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
