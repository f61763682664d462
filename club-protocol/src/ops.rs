/// Field-level update operations and preconditions.
///
/// Every mutation of a shared document (club, message, user) is expressed as
/// an `UpdateBatch`: a list of field ops plus preconditions. A store applies
/// the whole batch atomically. All ops become visible together, or none do.
///
/// - `Set`: replace the value at a path (intermediate objects are created)
/// - `AddToSet`: append to the array at a path unless already present
/// - `RemoveFromSet`: remove every equal element from the array at a path
///
/// `apply_ops` is the reference semantics; the in-memory store uses it
/// directly and other backends must match it.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Document field map.
pub type Fields = Map<String, Value>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    #[error("Field path is empty")]
    EmptyPath,

    #[error("Field path {0} traverses a non-object value")]
    PathTraversesScalar(String),

    #[error("Field {0} is not an array")]
    NotAnArray(String),
}

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// Nested field path. Segments are kept separate so keys containing `.` or
/// arbitrary unicode (reaction symbols) never need escaping.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Top-level field.
    pub fn field(name: impl Into<String>) -> Self {
        FieldPath(vec![name.into()])
    }

    /// Extend the path by one segment.
    pub fn child(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldPath({})", self)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

// ---------------------------------------------------------------------------
// FieldOp
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(tag = "op", content = "value")]
pub enum OpKind {
    Set(Value),
    AddToSet(Value),
    RemoveFromSet(Value),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FieldOp {
    pub path: FieldPath,
    pub kind: OpKind,
}

impl FieldOp {
    pub fn set(path: FieldPath, value: impl Into<Value>) -> Self {
        FieldOp {
            path,
            kind: OpKind::Set(value.into()),
        }
    }

    pub fn add_to_set(path: FieldPath, value: impl Into<Value>) -> Self {
        FieldOp {
            path,
            kind: OpKind::AddToSet(value.into()),
        }
    }

    pub fn remove_from_set(path: FieldPath, value: impl Into<Value>) -> Self {
        FieldOp {
            path,
            kind: OpKind::RemoveFromSet(value.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Preconditions
// ---------------------------------------------------------------------------

/// Condition checked against the current document, under the same atomic
/// step that applies the ops.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub enum Precondition {
    /// The document exists.
    Exists,
    /// The array at `path` contains `value`.
    Contains { path: FieldPath, value: Value },
    /// The array at `path` is missing or does not contain `value`.
    NotContains { path: FieldPath, value: Value },
    /// `path` holds a map of arrays; the keys whose arrays contain `value`
    /// are exactly `keys` (a missing map counts as no keys).
    SetKeysOf {
        path: FieldPath,
        value: Value,
        keys: BTreeSet<String>,
    },
    /// `path` is missing, null, or equal to `value`.
    AbsentOrEquals { path: FieldPath, value: Value },
    /// The array at `path` is missing or holds fewer than `max` items.
    LenBelow { path: FieldPath, max: usize },
}

impl Precondition {
    /// Evaluate against an existing document.
    pub fn holds(&self, doc: &Fields) -> bool {
        match self {
            Precondition::Exists => true,
            Precondition::Contains { path, value } => array_at(doc, path)
                .map(|items| items.contains(value))
                .unwrap_or(false),
            Precondition::NotContains { path, value } => !array_at(doc, path)
                .map(|items| items.contains(value))
                .unwrap_or(false),
            Precondition::SetKeysOf { path, value, keys } => {
                let observed: BTreeSet<String> = match get_path(doc, path) {
                    Some(Value::Object(map)) => map
                        .iter()
                        .filter(|(_, v)| {
                            v.as_array().map(|a| a.contains(value)).unwrap_or(false)
                        })
                        .map(|(k, _)| k.clone())
                        .collect(),
                    Some(_) => return false,
                    None => BTreeSet::new(),
                };
                observed == *keys
            }
            Precondition::AbsentOrEquals { path, value } => match get_path(doc, path) {
                None | Some(Value::Null) => true,
                Some(current) => current == value,
            },
            Precondition::LenBelow { path, max } => {
                array_at(doc, path).map(Vec::len).unwrap_or(0) < *max
            }
        }
    }
}

// ---------------------------------------------------------------------------
// UpdateBatch
// ---------------------------------------------------------------------------

/// Ops and preconditions that a store applies as one atomic update.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct UpdateBatch {
    pub ops: Vec<FieldOp>,
    pub preconditions: Vec<Precondition>,
}

impl UpdateBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, op: FieldOp) -> Self {
        self.ops.push(op);
        self
    }

    pub fn require(mut self, precondition: Precondition) -> Self {
        self.preconditions.push(precondition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// First precondition that does not hold, if any.
    pub fn failed_precondition(&self, doc: &Fields) -> Option<&Precondition> {
        self.preconditions.iter().find(|p| !p.holds(doc))
    }
}

// ---------------------------------------------------------------------------
// Reference semantics
// ---------------------------------------------------------------------------

/// Read the value at `path`.
pub fn get_path<'a>(doc: &'a Fields, path: &FieldPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = doc.get(first)?;
    for segment in rest {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn array_at<'a>(doc: &'a Fields, path: &FieldPath) -> Option<&'a Vec<Value>> {
    get_path(doc, path).and_then(Value::as_array)
}

/// Apply `ops` in order. Works on a copy: on error `doc` is left untouched.
pub fn apply_ops(doc: &mut Fields, ops: &[FieldOp]) -> Result<(), OpError> {
    let mut working = doc.clone();
    for op in ops {
        apply_one(&mut working, op)?;
    }
    *doc = working;
    Ok(())
}

fn apply_one(doc: &mut Fields, op: &FieldOp) -> Result<(), OpError> {
    let (leaf, parents) = op.path.segments().split_last().ok_or(OpError::EmptyPath)?;

    // RemoveFromSet never creates structure; a missing parent is a no-op.
    let create = !matches!(op.kind, OpKind::RemoveFromSet(_));
    let parent = match walk_mut(doc, parents, create, &op.path)? {
        Some(parent) => parent,
        None => return Ok(()),
    };

    match &op.kind {
        OpKind::Set(value) => {
            parent.insert(leaf.clone(), value.clone());
        }
        OpKind::AddToSet(value) => {
            let slot = parent
                .entry(leaf.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
            let items = slot
                .as_array_mut()
                .ok_or_else(|| OpError::NotAnArray(op.path.to_string()))?;
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        OpKind::RemoveFromSet(value) => match parent.get_mut(leaf) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => items.retain(|item| item != value),
            Some(_) => return Err(OpError::NotAnArray(op.path.to_string())),
        },
    }
    Ok(())
}

fn walk_mut<'a>(
    doc: &'a mut Fields,
    segments: &[String],
    create: bool,
    full: &FieldPath,
) -> Result<Option<&'a mut Fields>, OpError> {
    let mut current = doc;
    for segment in segments {
        if !current.contains_key(segment) {
            if !create {
                return Ok(None);
            }
            current.insert(segment.clone(), Value::Object(Map::new()));
        }
        current = match current.get_mut(segment) {
            Some(Value::Object(map)) => map,
            _ => return Err(OpError::PathTraversesScalar(full.to_string())),
        };
    }
    Ok(Some(current))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
