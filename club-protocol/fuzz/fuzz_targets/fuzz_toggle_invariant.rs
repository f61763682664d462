#![no_main]
use libfuzzer_sys::fuzz_target;
use arbitrary::Arbitrary;

use club_protocol::ids::UserId;
use club_protocol::ops::apply_ops;
use club_protocol::reactions::{Reactions, FIELD_REACTIONS};
use club_protocol::symbol::Symbol;

const USERS: [&str; 4] = ["alice", "bob", "carol", "dave"];
const SYMBOLS: [&str; 4] = ["👍", "❤️", "😂", "🎉"];

#[derive(Arbitrary, Debug)]
struct Toggle {
    user: u8,
    symbol: u8,
}

/// Fuzz the reaction toggle state machine.
///
/// Every toggle is planned against the current stored map and its batch
/// applied to the stored fields. After each step a user appears in at
/// most one symbol's set, and the stored result equals the in-memory
/// toggle.
fuzz_target!(|toggles: Vec<Toggle>| {
    if toggles.len() > 512 {
        return;
    }

    let mut fields = serde_json::Map::new();
    fields.insert(FIELD_REACTIONS.into(), serde_json::json!({}));
    let mut shadow = Reactions::new();

    for t in &toggles {
        let user = UserId::new(USERS[t.user as usize % USERS.len()]);
        let symbol = Symbol::parse(SYMBOLS[t.symbol as usize % SYMBOLS.len()]).unwrap();

        let observed = Reactions::from_value(fields.get(FIELD_REACTIONS));
        let plan = observed.plan_toggle(&user, &symbol);
        assert!(plan.batch.failed_precondition(&fields).is_none());
        apply_ops(&mut fields, &plan.batch.ops).unwrap();

        let expected = shadow.toggle(&user, &symbol);
        assert_eq!(plan.next, expected);

        let stored = Reactions::from_value(fields.get(FIELD_REACTIONS));
        assert!(stored.is_consistent());
        assert_eq!(stored.summary(&user), shadow.summary(&user));
    }
});
