//! Correlation keys: how an event finds the record it affects.

use std::fmt;

use crate::domain::Address;

/// The lookup key a reconciler uses to find its target record.
///
/// Only used for diagnostics; the lookups themselves are [`crate::persistence::StoreTx`]
/// methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationKey {
    /// Exact match on a stored transaction hash.
    TxHash(String),
    /// Exact match on an on-chain auction ID.
    OnChainId(i64),
    /// Exact match on a lower-cased contract address.
    ContractAddress(Address),
    /// Exact match on a token metadata URI.
    TokenUri(String),
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TxHash(hash) => write!(f, "tx_hash={hash}"),
            Self::OnChainId(id) => write!(f, "on_chain_id={id}"),
            Self::ContractAddress(address) => write!(f, "contract_address={address}"),
            Self::TokenUri(uri) => write!(f, "token_uri={uri}"),
        }
    }
}
