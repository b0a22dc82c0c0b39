// =============================================================================
// Shared types used across the Aurora strategy engine
// =============================================================================

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An opaque instrument symbol. Identity only — no exchange semantics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument(pub String);

impl Instrument {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Instrument {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Instrument {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single immutable price sample for an instrument.
///
/// Ticks for a given instrument are totally ordered by `ts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: Instrument,
    pub price: Decimal,
    pub ts: DateTime<Utc>,
}

impl Tick {
    pub fn new(instrument: Instrument, price: Decimal, ts: DateTime<Utc>) -> Self {
        Self {
            instrument,
            price,
            ts,
        }
    }
}
