//! Notifications describing committed reconciliation writes.
//!
//! A synchronizer publishes one [`DomainChange`] per record it created or
//! transitioned, after the surrounding transaction has committed. They are
//! broadcast to WebSocket subscribers through the [`super::EventBus`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Address;

/// Kind of domain record a change refers to; the WebSocket filter unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// [`super::Auction`] and its reward tier NFTs.
    Auction,
    /// [`super::NftCollection`].
    Collection,
    /// [`super::Nft`].
    Nft,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auction => "auction",
            Self::Collection => "collection",
            Self::Nft => "nft",
        })
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auction" => Ok(Self::Auction),
            "collection" => Ok(Self::Collection),
            "nft" => Ok(Self::Nft),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// A committed reconciliation write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change_type", rename_all = "snake_case")]
pub enum DomainChange {
    /// A collection row was created from a deploy event.
    CollectionDeployed {
        /// Internal collection ID.
        collection_id: i64,
        /// Contract address.
        address: Address,
        /// Deployer.
        owner: Address,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// An NFT row was created from a mint event.
    NftMinted {
        /// Internal NFT ID.
        nft_id: i64,
        /// Internal collection ID.
        collection_id: i64,
        /// Token ID within the collection.
        token_id: String,
        /// Shared edition identifier.
        edition_uuid: Uuid,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// An auction was confirmed on chain.
    AuctionConfirmed {
        /// Internal auction ID.
        auction_id: i64,
        /// On-chain auction ID.
        on_chain_id: i64,
        /// On-chain owner.
        owner: Address,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// Reward NFTs were deposited into an auction.
    AuctionFunded {
        /// Internal auction ID.
        auction_id: i64,
        /// On-chain auction ID.
        on_chain_id: i64,
        /// Slot that received the deposit.
        slot_index: i64,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// An auction was canceled on chain.
    AuctionCanceled {
        /// Internal auction ID.
        auction_id: i64,
        /// On-chain auction ID.
        on_chain_id: i64,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },

    /// An auction was finalized on chain.
    AuctionFinalized {
        /// Internal auction ID.
        auction_id: i64,
        /// On-chain auction ID.
        on_chain_id: i64,
        /// Commit time.
        timestamp: DateTime<Utc>,
    },
}

impl DomainChange {
    /// Returns the kind of record this change touches.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        match self {
            Self::CollectionDeployed { .. } => RecordKind::Collection,
            Self::NftMinted { .. } => RecordKind::Nft,
            Self::AuctionConfirmed { .. }
            | Self::AuctionFunded { .. }
            | Self::AuctionCanceled { .. }
            | Self::AuctionFinalized { .. } => RecordKind::Auction,
        }
    }

    /// Returns the change type as a static string slice.
    #[must_use]
    pub const fn change_type_str(&self) -> &'static str {
        match self {
            Self::CollectionDeployed { .. } => "collection_deployed",
            Self::NftMinted { .. } => "nft_minted",
            Self::AuctionConfirmed { .. } => "auction_confirmed",
            Self::AuctionFunded { .. } => "auction_funded",
            Self::AuctionCanceled { .. } => "auction_canceled",
            Self::AuctionFinalized { .. } => "auction_finalized",
        }
    }
}
