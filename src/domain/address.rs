//! Checksum-insensitive Ethereum address.
//!
//! [`Address`] is a newtype over a lower-cased hex string. Every address
//! that enters the domain (event payloads, lookups, stored columns) passes
//! through it, so mixed-case checksum addresses always compare equal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lower-cased, whitespace-trimmed Ethereum address.
///
/// No length or hex validation is performed: the ingester may over-collect,
/// and a malformed address simply never correlates with anything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Normalizes `raw` into an [`Address`].
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    /// Returns the normalized address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(&raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}
