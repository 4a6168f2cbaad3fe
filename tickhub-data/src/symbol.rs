use crate::error::DataError;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Maximum accepted symbol length, including the exchange prefix.
const MAX_SYMBOL_LEN: usize = 32;

/// Instrument symbol in `EXCHANGE:CODE-SERIES` form (e.g. "NSE:RELIANCE-EQ").
///
/// Immutable once created and used as the join key across the registry,
/// the rolling store and the upstream feed. Input is normalised to
/// uppercase so viewers and the upstream provider agree on the key.
#[derive(
    Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display, Serialize, Deserialize,
)]
pub struct Symbol(SmolStr);

impl Symbol {
    /// Validate and normalise a viewer-supplied symbol.
    pub fn parse(input: &str) -> Result<Self, DataError> {
        let trimmed = input.trim();

        let invalid = |reason: &'static str| DataError::InvalidSymbol {
            input: input.to_string(),
            reason,
        };

        if trimmed.is_empty() {
            return Err(invalid("symbol is empty"));
        }
        if trimmed.len() > MAX_SYMBOL_LEN {
            return Err(invalid("symbol is too long"));
        }

        let (exchange, code) = trimmed
            .split_once(':')
            .ok_or_else(|| invalid("missing exchange separator ':'"))?;

        if exchange.is_empty() || !exchange.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("exchange prefix must be alphanumeric"));
        }
        if code.is_empty() {
            return Err(invalid("instrument code is empty"));
        }
        if code.contains(':') || code.contains(char::is_whitespace) {
            return Err(invalid("instrument code contains invalid characters"));
        }

        Ok(Self(SmolStr::from(trimmed.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_parse() {
        struct TestCase {
            input: &'static str,
            expected: Result<&'static str, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: well-formed equity symbol
                input: "NSE:RELIANCE-EQ",
                expected: Ok("NSE:RELIANCE-EQ"),
            },
            TestCase {
                // TC1: lowercase input is normalised to uppercase
                input: "nse:sbin-eq",
                expected: Ok("NSE:SBIN-EQ"),
            },
            TestCase {
                // TC2: surrounding whitespace is trimmed
                input: "  NSE:TCS-EQ  ",
                expected: Ok("NSE:TCS-EQ"),
            },
            TestCase {
                // TC3: missing exchange separator
                input: "RELIANCE",
                expected: Err(()),
            },
            TestCase {
                // TC4: empty input
                input: "",
                expected: Err(()),
            },
            TestCase {
                // TC5: empty exchange prefix
                input: ":RELIANCE-EQ",
                expected: Err(()),
            },
            TestCase {
                // TC6: empty instrument code
                input: "NSE:",
                expected: Err(()),
            },
            TestCase {
                // TC7: second separator inside the code
                input: "NSE:RELIANCE:EQ",
                expected: Err(()),
            },
            TestCase {
                // TC8: non-alphanumeric exchange prefix
                input: "N$E:RELIANCE-EQ",
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Symbol::parse(test.input);
            match test.expected {
                Ok(expected) => {
                    let symbol = actual.unwrap_or_else(|e| panic!("TC{index} failed: {e}"));
                    assert_eq!(symbol.as_str(), expected, "TC{index} failed");
                }
                Err(()) => assert!(actual.is_err(), "TC{index} expected rejection"),
            }
        }
    }

    #[test]
    fn test_symbol_display_matches_wire_form() {
        let symbol = Symbol::parse("NSE:INFY-EQ").unwrap();
        assert_eq!(symbol.to_string(), "NSE:INFY-EQ");
        assert_eq!(symbol.as_ref(), "NSE:INFY-EQ");
    }

    #[test]
    fn test_symbol_serializes_as_plain_string() {
        let symbol = Symbol::parse("NSE:HDFCBANK-EQ").unwrap();
        let json = serde_json::to_string(&symbol).unwrap();
        assert_eq!(json, "\"NSE:HDFCBANK-EQ\"");
    }
}
