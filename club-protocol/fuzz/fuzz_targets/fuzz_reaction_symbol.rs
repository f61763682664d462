#![no_main]
use libfuzzer_sys::fuzz_target;

use club_protocol::symbol::Symbol;

/// Fuzz reaction symbol parsing.
///
/// Accepted symbols must be a single grapheme and must survive a JSON
/// string round-trip unchanged (they are used as map keys in storage).
fuzz_target!(|data: &[u8]| {
    let raw = match std::str::from_utf8(data) {
        Ok(s) => s,
        Err(_) => return,
    };

    if let Ok(symbol) = Symbol::parse(raw) {
        assert_eq!(symbol.as_str(), raw);

        let json = serde_json::to_string(&symbol).unwrap();
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, symbol);
    }
});
