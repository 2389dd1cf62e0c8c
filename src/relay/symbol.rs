use std::fmt;
use serde::Serialize;

/// Normalized ticker identifier: trimmed, uppercased and never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            None
        } else {
            Some(Self(normalized))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_is_trimmed_and_uppercased() {
        let symbol = Symbol::parse("  nvda ").unwrap();
        assert_eq!(symbol.as_str(), "NVDA");
        assert_eq!(Symbol::parse("binance:btcusdt").unwrap().to_string(), "BINANCE:BTCUSDT");
    }

    #[test]
    fn test_blank_symbol_is_rejected() {
        assert!(Symbol::parse("").is_none());
        assert!(Symbol::parse("   \t").is_none());
    }
}
