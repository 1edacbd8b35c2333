//! Seller/market series identity.
//!
//! Rules implemented:
//! - both parts are trimmed and uppercased
//! - parts are joined by a single space: `{SELLER} {MARKET}`
//! - an empty part after trimming is rejected

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeriesKey(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeriesKeyError {
    #[error("empty seller identifier")]
    EmptySeller,
    #[error("empty market identifier")]
    EmptyMarket,
    #[error("empty series key")]
    EmptyKey,
}

impl SeriesKey {
    pub fn from_parts(seller: &str, market: &str) -> Result<Self, SeriesKeyError> {
        let seller = normalize_part(seller);
        if seller.is_empty() {
            return Err(SeriesKeyError::EmptySeller);
        }
        let market = normalize_part(market);
        if market.is_empty() {
            return Err(SeriesKeyError::EmptyMarket);
        }
        Ok(Self(format!("{seller} {market}")))
    }

    /// Parses an already-joined key, e.g. the `series_key` field of a melted
    /// observation file. Ends are trimmed and the key uppercased; inner
    /// whitespace is kept as written so it agrees with [`Self::from_parts`].
    pub fn parse(raw: &str) -> Result<Self, SeriesKeyError> {
        let key = normalize_part(raw);
        if key.is_empty() {
            return Err(SeriesKeyError::EmptyKey);
        }
        Ok(Self(key))
    }

    /// Column header of a persisted wide table, taken verbatim apart from
    /// surrounding whitespace.
    pub fn from_header(raw: &str) -> Result<Self, SeriesKeyError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(SeriesKeyError::EmptyKey);
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalize_part(raw: &str) -> String {
    raw.trim().to_uppercase()
}
