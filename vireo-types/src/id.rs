//! Object identity for journaled entities.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity of a journaled object within a session.
///
/// Ids are assigned monotonically starting at 1 and are never reused
/// within a session. `LogId::NULL` (`0x0` on the wire) is the null
/// reference, used when a field points at no object.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LogId(u32);

impl LogId {
    pub const NULL: LogId = LogId(0);

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Extract the raw u32 value.
    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LogId {
    /// Journal wire form: uppercase hex, `0x` prefix, no zero padding.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

impl FromStr for LogId {
    type Err = ParseIntError;

    /// Accepts the wire form with or without the `0x` prefix, any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u32::from_str_radix(digits, 16).map(LogId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_unpadded_uppercase_hex() {
        assert_eq!(LogId::new(1).to_string(), "0x1");
        assert_eq!(LogId::new(0xf1).to_string(), "0xF1");
        assert_eq!(LogId::NULL.to_string(), "0x0");
    }

    #[test]
    fn parses_with_and_without_prefix() {
        assert_eq!("0xF1".parse::<LogId>().unwrap(), LogId::new(0xf1));
        assert_eq!("0Xf1".parse::<LogId>().unwrap(), LogId::new(0xf1));
        assert_eq!("f1".parse::<LogId>().unwrap(), LogId::new(0xf1));
        assert!("zz".parse::<LogId>().is_err());
        assert!("".parse::<LogId>().is_err());
    }

    #[test]
    fn round_trips_extremes() {
        for raw in [0u32, 1, 0xdead_beef, u32::MAX] {
            let id = LogId::new(raw);
            assert_eq!(id.to_string().parse::<LogId>().unwrap(), id);
        }
    }
}
