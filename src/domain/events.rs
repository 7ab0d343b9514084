//! Event log rows and their type-specific payloads.
//!
//! Each event type lives in its own append-only table with the same row
//! shape; only the `data` JSONB column differs. [`RawEvent`] is a row as
//! read from the store, [`EventRecord`] is the same row with `data`
//! decoded into a concrete [`EventPayload`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::Address;
use crate::error::ReconcileError;

/// Event payload stored in the `data` column of one event table.
pub trait EventPayload:
    DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    /// Table holding rows of this event type.
    const TABLE: &'static str;
    /// Short human-readable name used in logs and reports.
    const NAME: &'static str;
}

/// An event row with its payload still encoded as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    /// Auto-increment row ID.
    pub id: i64,
    /// Completion flag; the only mutable column.
    pub processed: bool,
    /// Transaction that emitted the log.
    pub tx_hash: String,
    /// Position of the transaction in its block.
    pub tx_index: i32,
    /// Position of the log in its block.
    pub log_index: i32,
    /// Timestamp of the including block.
    pub block_timestamp: DateTime<Utc>,
    /// Height of the including block.
    pub included_in_block: i64,
    /// Type-specific payload.
    pub data: serde_json::Value,
    /// Ingestion timestamp.
    pub created_at: DateTime<Utc>,
}

impl RawEvent {
    /// Decodes `data` into the payload type `P`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MalformedEvent`] if `data` does not match
    /// the payload schema.
    pub fn decode<P: EventPayload>(self) -> Result<EventRecord<P>, ReconcileError> {
        let data = serde_json::from_value::<P>(self.data).map_err(|e| {
            ReconcileError::MalformedEvent {
                table: P::TABLE,
                id: self.id,
                reason: e.to_string(),
            }
        })?;
        Ok(EventRecord {
            id: self.id,
            processed: self.processed,
            tx_hash: self.tx_hash,
            tx_index: self.tx_index,
            log_index: self.log_index,
            block_timestamp: self.block_timestamp,
            included_in_block: self.included_in_block,
            data,
            created_at: self.created_at,
        })
    }
}

/// An event row with a decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord<P> {
    /// Auto-increment row ID.
    pub id: i64,
    /// Completion flag at read time.
    pub processed: bool,
    /// Transaction that emitted the log.
    pub tx_hash: String,
    /// Position of the transaction in its block.
    pub tx_index: i32,
    /// Position of the log in its block.
    pub log_index: i32,
    /// Timestamp of the including block.
    pub block_timestamp: DateTime<Utc>,
    /// Height of the including block.
    pub included_in_block: i64,
    /// Decoded payload.
    pub data: P,
    /// Ingestion timestamp.
    pub created_at: DateTime<Utc>,
}

/// A collection contract was deployed by the collection factory.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployCollection {
    /// Address of the new collection contract.
    pub contract_address: Address,
    /// Deployer.
    pub owner: Address,
    /// ERC-721 name.
    pub token_name: String,
    /// ERC-721 symbol.
    pub token_symbol: String,
}

impl EventPayload for DeployCollection {
    const TABLE: &'static str = "deploy_collection_events";
    const NAME: &'static str = "deploy_collection";
}

/// A token was minted on a tracked collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintNft {
    /// Collection contract.
    pub contract_address: Address,
    /// Minted token ID.
    #[serde(deserialize_with = "flexible::string")]
    pub token_id: String,
    /// Metadata URI; editions of one artwork share it.
    pub token_uri: String,
    /// Receiver of the token.
    pub receiver: Address,
}

impl EventPayload for MintNft {
    const TABLE: &'static str = "mint_nft_events";
    const NAME: &'static str = "mint_nft";
}

/// The auction contract registered a new auction.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionCreated {
    /// On-chain auction ID.
    #[serde(deserialize_with = "flexible::int")]
    pub auction_id: i64,
    /// Auction owner.
    pub auction_owner: Address,
    /// Number of reward slots.
    #[serde(default, deserialize_with = "flexible::opt_int")]
    pub number_of_slots: Option<i64>,
    /// Start time, unix seconds.
    #[serde(deserialize_with = "flexible::int")]
    pub start_time: i64,
    /// End time, unix seconds.
    #[serde(deserialize_with = "flexible::int")]
    pub end_time: i64,
    /// Anti-sniping extension window, seconds.
    #[serde(default, deserialize_with = "flexible::opt_int")]
    pub reset_timer: Option<i64>,
    /// Whether bidding is whitelist-restricted.
    #[serde(default)]
    pub supports_whitelist: Option<bool>,
    /// Emission time, unix seconds.
    #[serde(default, deserialize_with = "flexible::opt_int")]
    pub time: Option<i64>,
}

impl EventPayload for AuctionCreated {
    const TABLE: &'static str = "auction_created_events";
    const NAME: &'static str = "auction_created";
}

/// An ERC-721 token was deposited into an auction slot.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Erc721Deposited {
    /// Account that deposited the token.
    pub depositor: Address,
    /// On-chain auction ID.
    #[serde(deserialize_with = "flexible::int")]
    pub auction_id: i64,
    /// Target slot.
    #[serde(deserialize_with = "flexible::int")]
    pub slot_index: i64,
    /// Deposited token ID.
    #[serde(deserialize_with = "flexible::string")]
    pub token_id: String,
    /// Deposited token's contract.
    pub token_address: Address,
    /// Emission time, unix seconds.
    #[serde(default, deserialize_with = "flexible::opt_int")]
    pub time: Option<i64>,
}

impl EventPayload for Erc721Deposited {
    const TABLE: &'static str = "erc721_deposited_events";
    const NAME: &'static str = "erc721_deposited";
}

/// The auction was canceled on chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionCanceled {
    /// On-chain auction ID.
    #[serde(deserialize_with = "flexible::int")]
    pub auction_id: i64,
    /// Emission time, unix seconds.
    #[serde(default, deserialize_with = "flexible::opt_int")]
    pub time: Option<i64>,
}

impl EventPayload for AuctionCanceled {
    const TABLE: &'static str = "auction_canceled_events";
    const NAME: &'static str = "auction_canceled";
}

/// The auction was finalized on chain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuctionFinalized {
    /// On-chain auction ID.
    #[serde(deserialize_with = "flexible::int")]
    pub auction_id: i64,
    /// Emission time, unix seconds.
    #[serde(default, deserialize_with = "flexible::opt_int")]
    pub time: Option<i64>,
}

impl EventPayload for AuctionFinalized {
    const TABLE: &'static str = "auction_finalized_events";
    const NAME: &'static str = "auction_finalized";
}

/// Converts unix seconds into a UTC timestamp.
#[must_use]
pub fn unix_time(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

/// Deserializers accepting JSON numbers, decimal strings, or `0x` hex
/// strings. Scrapers serialize big numbers as strings.
mod flexible {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(serde_json::Number),
        Str(String),
    }

    fn parse_i64(raw: &str) -> Option<i64> {
        let raw = raw.trim();
        match raw.strip_prefix("0x") {
            Some(hex) => i64::from_str_radix(hex, 16).ok(),
            None => raw.parse().ok(),
        }
    }

    pub(super) fn int<'de, D: Deserializer<'de>>(de: D) -> Result<i64, D::Error> {
        match NumOrStr::deserialize(de)? {
            NumOrStr::Num(n) => n
                .as_i64()
                .ok_or_else(|| D::Error::custom(format!("integer out of range: {n}"))),
            NumOrStr::Str(s) => {
                parse_i64(&s).ok_or_else(|| D::Error::custom(format!("invalid integer: {s}")))
            }
        }
    }

    pub(super) fn opt_int<'de, D: Deserializer<'de>>(de: D) -> Result<Option<i64>, D::Error> {
        match Option::<NumOrStr>::deserialize(de)? {
            None => Ok(None),
            Some(NumOrStr::Num(n)) => Ok(n.as_i64()),
            Some(NumOrStr::Str(s)) => Ok(parse_i64(&s)),
        }
    }

    pub(super) fn string<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
        Ok(match NumOrStr::deserialize(de)? {
            NumOrStr::Num(n) => n.to_string(),
            NumOrStr::Str(s) => s.trim().to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(data: serde_json::Value) -> RawEvent {
        RawEvent {
            id: 1,
            processed: false,
            tx_hash: "0xabc".to_string(),
            tx_index: 0,
            log_index: 3,
            block_timestamp: Utc::now(),
            included_in_block: 100,
            data,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn auction_created_accepts_string_numbers() {
        let event = raw(json!({
            "auctionId": "42",
            "auctionOwner": "0xOWNER",
            "numberOfSlots": 3,
            "startTime": "0x64",
            "endTime": 200,
        }));
        let Ok(record) = event.decode::<AuctionCreated>() else {
            panic!("decode failed");
        };
        assert_eq!(record.data.auction_id, 42);
        assert_eq!(record.data.start_time, 100);
        assert_eq!(record.data.end_time, 200);
        assert_eq!(record.data.auction_owner.as_str(), "0xowner");
        assert_eq!(record.data.time, None);
    }

    #[test]
    fn mint_token_id_accepts_number() {
        let event = raw(json!({
            "contractAddress": "0xC0",
            "tokenId": 17,
            "tokenUri": "ipfs://Qm1",
            "receiver": "0xR",
        }));
        let Ok(record) = event.decode::<MintNft>() else {
            panic!("decode failed");
        };
        assert_eq!(record.data.token_id, "17");
        assert_eq!(record.tx_hash, "0xabc");
    }

    #[test]
    fn missing_field_is_malformed_event() {
        let event = raw(json!({ "auctionId": 1 }));
        match event.decode::<Erc721Deposited>() {
            Err(ReconcileError::MalformedEvent { table, id, .. }) => {
                assert_eq!(table, "erc721_deposited_events");
                assert_eq!(id, 1);
            }
            other => panic!("expected malformed event, got {other:?}"),
        }
    }

    #[test]
    fn unix_time_converts_seconds() {
        let Some(ts) = unix_time(1_700_000_000) else {
            panic!("valid timestamp");
        };
        assert_eq!(ts.timestamp(), 1_700_000_000);
    }
}
