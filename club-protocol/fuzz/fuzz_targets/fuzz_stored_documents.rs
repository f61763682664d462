#![no_main]
use libfuzzer_sys::fuzz_target;

use club_protocol::ids::MessageId;
use club_protocol::membership::ClubRecord;
use club_protocol::messages::MessageEntry;
use club_protocol::reactions::Reactions;

/// Fuzz decoding of stored club and message documents.
///
/// Documents may have been written by other clients; decoding must fail
/// cleanly and never panic.
fuzz_target!(|data: &[u8]| {
    let value: serde_json::Value = match serde_json::from_slice(data) {
        Ok(v) => v,
        Err(_) => return,
    };

    let _ = Reactions::from_value(Some(&value));

    if let serde_json::Value::Object(fields) = value {
        if let Ok(club) = ClubRecord::from_fields(&fields) {
            let _ = club.check_invariants();
        }
        if let Ok(entry) = MessageEntry::from_fields(MessageId::new("fuzz"), &fields) {
            let _ = entry.reactions.summary(&entry.sender_id);
        }
    }
});
