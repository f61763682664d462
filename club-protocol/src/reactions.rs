/// Reaction ledger: per-message map from symbol to the set of reacting users.
///
/// Invariant: for any (message, user) pair the user is in at most one
/// symbol's set. Per (message, user) the ledger is a two-state machine:
///
/// | Current              | toggle(s)                | Next          |
/// |----------------------|--------------------------|---------------|
/// | `NoReaction`         | add to `s`               | `Reacted(s)`  |
/// | `Reacted(s)`         | remove from `s`          | `NoReaction`  |
/// | `Reacted(t)`, t ≠ s  | remove from `t`, add `s` | `Reacted(s)`  |
///
/// The removal and the add are always planned as one `UpdateBatch`, guarded
/// by the user's observed set memberships, so no reader can observe the user
/// in two sets or (mid-switch) in none.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::ids::UserId;
use crate::ops::{FieldOp, FieldPath, Precondition, UpdateBatch};
use crate::symbol::Symbol;

pub const FIELD_REACTIONS: &str = "reactions";

/// Reaction state of one user on one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionState {
    NoReaction,
    Reacted(Symbol),
}

/// Planned transition: the state after the batch applies, and the batch.
#[derive(Debug, Clone, PartialEq)]
pub struct TogglePlan {
    pub next: ReactionState,
    pub batch: UpdateBatch,
}

/// Read projection for rendering one message's reactions.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSummary {
    pub counts: BTreeMap<Symbol, usize>,
    /// The viewer's own symbol, if any.
    pub mine: Option<Symbol>,
}

impl ReactionSummary {
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

/// In-memory reaction map of one message.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct Reactions {
    sets: BTreeMap<Symbol, BTreeSet<UserId>>,
    /// Stored keys that are not valid symbols. Never rendered or counted,
    /// but a toggle clears the actor out of them.
    #[serde(skip)]
    stray: BTreeMap<String, BTreeSet<UserId>>,
}

impl Reactions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode from a stored `reactions` value. Keys that are not valid
    /// symbols can only come from a foreign writer; they are kept aside so
    /// a toggle can still match the stored document.
    pub fn from_value(value: Option<&Value>) -> Self {
        let mut reactions = Reactions::new();
        let map = match value.and_then(Value::as_object) {
            Some(map) => map,
            None => return reactions,
        };
        for (key, users) in map {
            let set: BTreeSet<UserId> = users
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(UserId::from)
                        .collect()
                })
                .unwrap_or_default();
            match Symbol::parse(key) {
                Ok(symbol) => {
                    reactions.sets.insert(symbol, set);
                }
                Err(e) => {
                    log::warn!("Ignoring stored reaction key {:?}: {}", key, e);
                    reactions.stray.insert(key.clone(), set);
                }
            }
        }
        reactions
    }

    /// Users who reacted with `symbol`, in id order.
    pub fn reactors(&self, symbol: &Symbol) -> Vec<UserId> {
        self.sets
            .get(symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every symbol whose set contains `user`. More than one entry means the
    /// stored map was written without this ledger.
    pub fn symbols_of(&self, user: &UserId) -> Vec<Symbol> {
        self.sets
            .iter()
            .filter(|(_, users)| users.contains(user))
            .map(|(symbol, _)| symbol.clone())
            .collect()
    }

    pub fn state_of(&self, user: &UserId) -> ReactionState {
        match self.symbols_of(user).into_iter().next() {
            Some(symbol) => ReactionState::Reacted(symbol),
            None => ReactionState::NoReaction,
        }
    }

    /// Plan `toggle(user, symbol)` against this observed map.
    pub fn plan_toggle(&self, user: &UserId, symbol: &Symbol) -> TogglePlan {
        let current = self.symbols_of(user);
        let user_value = Value::String(user.as_str().to_string());

        // Same symbol as the (only) current one → un-react.
        let next = if current.len() == 1 && current[0] == *symbol {
            ReactionState::NoReaction
        } else {
            ReactionState::Reacted(symbol.clone())
        };

        let stray: Vec<&String> = self
            .stray
            .iter()
            .filter(|(_, users)| users.contains(user))
            .map(|(key, _)| key)
            .collect();
        let observed_keys: BTreeSet<String> = current
            .iter()
            .map(|s| s.as_str().to_string())
            .chain(stray.iter().map(|key| key.to_string()))
            .collect();
        let mut batch = UpdateBatch::new()
            .require(Precondition::Exists)
            .require(Precondition::SetKeysOf {
                path: FieldPath::field(FIELD_REACTIONS),
                value: user_value.clone(),
                keys: observed_keys,
            });

        for existing in &current {
            if next != ReactionState::Reacted(existing.clone()) {
                batch = batch.op(FieldOp::remove_from_set(
                    symbol_path(existing),
                    user_value.clone(),
                ));
            }
        }
        for key in stray {
            batch = batch.op(FieldOp::remove_from_set(
                FieldPath::field(FIELD_REACTIONS).child(key.as_str()),
                user_value.clone(),
            ));
        }
        if let ReactionState::Reacted(target) = &next {
            if !current.contains(target) {
                batch = batch.op(FieldOp::add_to_set(symbol_path(target), user_value));
            }
        }

        TogglePlan { next, batch }
    }

    /// Apply a toggle directly to this map. Used to maintain local views and
    /// as the executable model the store-backed ledger must match.
    pub fn toggle(&mut self, user: &UserId, symbol: &Symbol) -> ReactionState {
        let plan = self.plan_toggle(user, symbol);
        for set in self.sets.values_mut().chain(self.stray.values_mut()) {
            set.remove(user);
        }
        if let ReactionState::Reacted(target) = &plan.next {
            self.sets.entry(target.clone()).or_default().insert(user.clone());
        }
        plan.next
    }

    /// Collapse to counts plus the viewer's own symbol. Empty sets are
    /// omitted.
    pub fn summary(&self, viewer: &UserId) -> ReactionSummary {
        let counts = self
            .sets
            .iter()
            .filter(|(_, users)| !users.is_empty())
            .map(|(symbol, users)| (symbol.clone(), users.len()))
            .collect();
        let mine = match self.state_of(viewer) {
            ReactionState::Reacted(symbol) => Some(symbol),
            ReactionState::NoReaction => None,
        };
        ReactionSummary { counts, mine }
    }

    /// Whether every user appears in at most one set.
    pub fn is_consistent(&self) -> bool {
        let mut seen = BTreeSet::new();
        self.sets
            .values()
            .flat_map(|users| users.iter())
            .all(|user| seen.insert(user))
    }
}

fn symbol_path(symbol: &Symbol) -> FieldPath {
    FieldPath::field(FIELD_REACTIONS).child(symbol.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{apply_ops, Fields};
    use serde_json::json;

    const THUMBS_UP: &str = "\u{1F44D}";
    const HEART: &str = "\u{2764}\u{FE0F}";
    const FIRE: &str = "\u{1F525}";

    fn sym(raw: &str) -> Symbol {
        Symbol::parse(raw).unwrap()
    }

    fn uid(s: &str) -> UserId {
        UserId::new(s)
    }

    /// Run a plan through the reference op semantics on a message document.
    fn apply_plan(doc: &mut Fields, plan: &TogglePlan) -> bool {
        if plan.batch.failed_precondition(doc).is_some() {
            return false;
        }
        apply_ops(doc, &plan.batch.ops).unwrap();
        true
    }

    fn reactions_of(doc: &Fields) -> Reactions {
        Reactions::from_value(doc.get(FIELD_REACTIONS))
    }

    #[test]
    fn test_first_toggle_reacts() {
        let mut r = Reactions::new();
        assert_eq!(r.toggle(&uid("bob"), &sym(THUMBS_UP)), ReactionState::Reacted(sym(THUMBS_UP)));
        assert_eq!(r.reactors(&sym(THUMBS_UP)), vec![uid("bob")]);
    }

    #[test]
    fn test_same_symbol_twice_unreacts() {
        let mut r = Reactions::new();
        r.toggle(&uid("bob"), &sym(THUMBS_UP));
        assert_eq!(r.toggle(&uid("bob"), &sym(THUMBS_UP)), ReactionState::NoReaction);
        assert_eq!(r.state_of(&uid("bob")), ReactionState::NoReaction);
        assert_eq!(r.summary(&uid("bob")).total(), 0);
    }

    #[test]
    fn test_switch_symbol_moves_user() {
        let mut r = Reactions::new();
        r.toggle(&uid("bob"), &sym(THUMBS_UP));
        r.toggle(&uid("bob"), &sym(HEART));
        assert_eq!(r.state_of(&uid("bob")), ReactionState::Reacted(sym(HEART)));
        assert!(r.reactors(&sym(THUMBS_UP)).is_empty());
        assert!(r.is_consistent());
    }

    #[test]
    fn test_switch_plan_is_single_batch() {
        let mut r = Reactions::new();
        r.toggle(&uid("bob"), &sym(THUMBS_UP));

        let plan = r.plan_toggle(&uid("bob"), &sym(HEART));
        assert_eq!(plan.next, ReactionState::Reacted(sym(HEART)));
        assert_eq!(
            plan.batch.ops,
            vec![
                FieldOp::remove_from_set(
                    FieldPath::field(FIELD_REACTIONS).child(THUMBS_UP),
                    "bob"
                ),
                FieldOp::add_to_set(FieldPath::field(FIELD_REACTIONS).child(HEART), "bob"),
            ]
        );
    }

    #[test]
    fn test_plan_through_document_ops() {
        let mut doc = json!({ "body": "hello", "reactions": {} })
            .as_object()
            .unwrap()
            .clone();

        let plan = reactions_of(&doc).plan_toggle(&uid("bob"), &sym(THUMBS_UP));
        assert!(apply_plan(&mut doc, &plan));
        let plan = reactions_of(&doc).plan_toggle(&uid("bob"), &sym(HEART));
        assert!(apply_plan(&mut doc, &plan));

        let r = reactions_of(&doc);
        assert_eq!(r.reactors(&sym(HEART)), vec![uid("bob")]);
        assert!(r.reactors(&sym(THUMBS_UP)).is_empty());
        assert_eq!(r.summary(&uid("bob")).counts.len(), 1);
    }

    #[test]
    fn test_stale_plan_rejected_by_precondition() {
        let mut doc = json!({ "reactions": {} }).as_object().unwrap().clone();

        // Two devices of the same user plan from the same observed state.
        let observed = reactions_of(&doc);
        let phone = observed.plan_toggle(&uid("bob"), &sym(THUMBS_UP));
        let laptop = observed.plan_toggle(&uid("bob"), &sym(FIRE));

        assert!(apply_plan(&mut doc, &phone));
        assert!(!apply_plan(&mut doc, &laptop));

        let r = reactions_of(&doc);
        assert!(r.is_consistent());
        assert_eq!(r.state_of(&uid("bob")), ReactionState::Reacted(sym(THUMBS_UP)));
    }

    #[test]
    fn test_other_users_do_not_conflict() {
        let mut doc = json!({ "reactions": {} }).as_object().unwrap().clone();
        let observed = reactions_of(&doc);
        let bob = observed.plan_toggle(&uid("bob"), &sym(THUMBS_UP));
        let carol = observed.plan_toggle(&uid("carol"), &sym(THUMBS_UP));
        assert!(apply_plan(&mut doc, &bob));
        assert!(apply_plan(&mut doc, &carol));
        assert_eq!(reactions_of(&doc).summary(&uid("carol")).counts[&sym(THUMBS_UP)], 2);
    }

    #[test]
    fn test_repairs_inconsistent_stored_map() {
        // Written by a foreign client: bob in two sets.
        let doc = json!({ "reactions": { THUMBS_UP: ["bob"], FIRE: ["bob"] } });
        let mut r = Reactions::from_value(doc.get(FIELD_REACTIONS));
        assert!(!r.is_consistent());

        r.toggle(&uid("bob"), &sym(HEART));
        assert!(r.is_consistent());
        assert_eq!(r.state_of(&uid("bob")), ReactionState::Reacted(sym(HEART)));
    }

    #[test]
    fn test_invalid_stored_keys_skipped() {
        let value = json!({ "ab": ["bob"], THUMBS_UP: ["carol"] });
        let r = Reactions::from_value(Some(&value));
        assert_eq!(r.summary(&uid("x")).counts.len(), 1);
    }

    #[test]
    fn test_toggle_clears_user_from_invalid_keys() {
        // A foreign writer left bob under a key that is not a symbol.
        let mut doc = json!({ "reactions": { "ab": ["bob", "carol"] } })
            .as_object()
            .unwrap()
            .clone();

        let plan = reactions_of(&doc).plan_toggle(&uid("bob"), &sym(THUMBS_UP));
        assert!(apply_plan(&mut doc, &plan));
        assert_eq!(doc["reactions"]["ab"], json!(["carol"]));

        // The next toggle plans against a document it can match again.
        let plan = reactions_of(&doc).plan_toggle(&uid("bob"), &sym(THUMBS_UP));
        assert!(apply_plan(&mut doc, &plan));
        assert_eq!(reactions_of(&doc).state_of(&uid("bob")), ReactionState::NoReaction);
        assert_eq!(reactions_of(&doc).summary(&uid("carol")).total(), 0);
    }

    #[test]
    fn test_summary_marks_mine() {
        let mut r = Reactions::new();
        r.toggle(&uid("bob"), &sym(THUMBS_UP));
        r.toggle(&uid("carol"), &sym(THUMBS_UP));
        r.toggle(&uid("dave"), &sym(FIRE));

        let summary = r.summary(&uid("dave"));
        assert_eq!(summary.counts[&sym(THUMBS_UP)], 2);
        assert_eq!(summary.counts[&sym(FIRE)], 1);
        assert_eq!(summary.mine, Some(sym(FIRE)));
        assert_eq!(r.summary(&uid("erin")).mine, None);
    }

    #[test]
    fn test_invariant_holds_over_toggle_sequences() {
        let symbols = [sym(THUMBS_UP), sym(HEART), sym(FIRE)];
        let users = [uid("a"), uid("b"), uid("c")];
        let mut r = Reactions::new();
        let mut doc = json!({ "reactions": {} }).as_object().unwrap().clone();

        // Deterministic pseudo-random walk over (user, symbol) pairs.
        let mut x: u32 = 7;
        for _ in 0..500 {
            x = x.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let user = &users[(x >> 8) as usize % users.len()];
            let symbol = &symbols[(x >> 16) as usize % symbols.len()];

            r.toggle(user, symbol);
            let plan = reactions_of(&doc).plan_toggle(user, symbol);
            assert!(apply_plan(&mut doc, &plan));

            assert!(r.is_consistent());
            let stored = reactions_of(&doc);
            assert!(stored.is_consistent());
            for u in &users {
                assert_eq!(stored.state_of(u), r.state_of(u));
            }
        }
    }
}
