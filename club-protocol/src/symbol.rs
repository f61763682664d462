/// Reaction symbols: a single pictographic grapheme.
///
/// A symbol is exactly one extended grapheme cluster built from an
/// `Extended_Pictographic` base, optionally followed by VS-16 or a skin-tone
/// modifier, optionally joined by ZWJ to further pictographs ("👍", "❤️",
/// "👍🏽", "👩‍💻"). Plain letters, digits, keycaps, and multi-grapheme input are
/// rejected.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

static PICTOGRAPH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\p{Extended_Pictographic}(?:\x{FE0F}|\p{Emoji_Modifier})?(?:\x{200D}\p{Extended_Pictographic}(?:\x{FE0F}|\p{Emoji_Modifier})?)*$",
    )
    .expect("pictograph pattern is a valid constant")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError {
    #[error("Reaction symbol is empty")]
    Empty,

    #[error("Reaction symbol must be one grapheme, got {0}")]
    MultipleGraphemes(usize),

    #[error("Reaction symbol is not pictographic")]
    NotPictographic,
}

/// A validated reaction symbol. Construct with [`Symbol::parse`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Validate `raw` as a reaction symbol. Surrounding whitespace is not
    /// trimmed; " 👍" is two graphemes.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        if raw.is_empty() {
            return Err(SymbolError::Empty);
        }

        let graphemes = raw.graphemes(true).count();
        if graphemes != 1 {
            return Err(SymbolError::MultipleGraphemes(graphemes));
        }

        if !PICTOGRAPH.is_match(raw) {
            return Err(SymbolError::NotPictographic);
        }

        Ok(Symbol(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = SymbolError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Symbol::parse(&raw)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let points: Vec<String> = self.0.chars().map(|c| format!("U+{:04X}", c as u32)).collect();
        write!(f, "Symbol({})", points.join(" "))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_pictographs_accepted() {
        for raw in ["\u{1F44D}", "\u{1F602}", "\u{1F525}", "\u{2764}"] {
            let symbol = Symbol::parse(raw).unwrap();
            assert_eq!(symbol.as_str(), raw);
        }
    }

    #[test]
    fn test_variation_selector_accepted() {
        // ❤️ = U+2764 U+FE0F
        assert!(Symbol::parse("\u{2764}\u{FE0F}").is_ok());
    }

    #[test]
    fn test_skin_tone_and_zwj_sequences_accepted() {
        // 👍🏽
        assert!(Symbol::parse("\u{1F44D}\u{1F3FD}").is_ok());
        // 👩‍💻
        assert!(Symbol::parse("\u{1F469}\u{200D}\u{1F4BB}").is_ok());
    }

    #[test]
    fn test_two_letters_rejected() {
        assert_eq!(Symbol::parse("ab"), Err(SymbolError::MultipleGraphemes(2)));
    }

    #[test]
    fn test_two_pictographs_rejected() {
        assert_eq!(
            Symbol::parse("\u{1F44D}\u{1F44D}"),
            Err(SymbolError::MultipleGraphemes(2))
        );
    }

    #[test]
    fn test_non_pictographic_single_grapheme_rejected() {
        assert_eq!(Symbol::parse("a"), Err(SymbolError::NotPictographic));
        assert_eq!(Symbol::parse("7"), Err(SymbolError::NotPictographic));
        assert_eq!(Symbol::parse("é"), Err(SymbolError::NotPictographic));
    }

    #[test]
    fn test_empty_and_padded_rejected() {
        assert_eq!(Symbol::parse(""), Err(SymbolError::Empty));
        assert!(matches!(
            Symbol::parse(" \u{1F44D}"),
            Err(SymbolError::MultipleGraphemes(2))
        ));
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<Symbol, _> = serde_json::from_str("\"\u{1F44D}\"");
        assert!(ok.is_ok());

        let bad: Result<Symbol, _> = serde_json::from_str("\"ab\"");
        assert!(bad.is_err());
    }
}
