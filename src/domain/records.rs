//! Mutable domain records written by reconciliation.
//!
//! User-facing API handlers create the pre-chain rows ([`Auction`] with a
//! `create_auction_tx_hash`, [`MintingCollection`] and [`SavedNft`]
//! drafts). Reconciliation owns the post-chain fields and is the only
//! writer of them. Every reconciliation write only ever sets a field.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Address;

/// An auction, from user draft through on-chain confirmation and funding.
///
/// Lifecycle: pending-on-chain (`create_auction_tx_hash` set,
/// `on_chain = false`) → confirmed (`on_chain`, `on_chain_id`) → funded
/// (`deposited_nfts`). `canceled` and `finalized` are terminal flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Auction {
    /// Internal row ID.
    pub id: i64,
    /// Display name (user-owned).
    pub name: String,
    /// Hash of the transaction that creates the auction on chain.
    pub create_auction_tx_hash: Option<String>,
    /// Whether the creation transaction has been observed on chain.
    pub on_chain: bool,
    /// Auction ID assigned by the auction contract.
    pub on_chain_id: Option<i64>,
    /// On-chain owner address.
    pub owner: Option<Address>,
    /// Start time reported by the contract.
    pub on_chain_start_time: Option<DateTime<Utc>>,
    /// End time reported by the contract.
    pub on_chain_end_time: Option<DateTime<Utc>>,
    /// Whether at least one reward NFT has been deposited.
    pub deposited_nfts: bool,
    /// Whether the auction was canceled on chain.
    pub canceled: bool,
    /// Whether the auction was finalized on chain.
    pub finalized: bool,
}

impl Auction {
    /// Creates a pending auction awaiting its on-chain creation event.
    #[must_use]
    pub fn pending(id: i64, name: &str, create_auction_tx_hash: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            create_auction_tx_hash: Some(create_auction_tx_hash.to_string()),
            on_chain: false,
            on_chain_id: None,
            owner: None,
            on_chain_start_time: None,
            on_chain_end_time: None,
            deposited_nfts: false,
            canceled: false,
            finalized: false,
        }
    }
}

/// An NFT reward slotted into an auction tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardTierNft {
    /// Internal row ID.
    pub id: i64,
    /// Owning auction (internal ID).
    pub auction_id: i64,
    /// Auction slot the NFT is assigned to.
    pub slot_index: i64,
    /// ERC-721 contract of the reward.
    pub contract_address: Address,
    /// Token ID within the contract.
    pub token_id: String,
    /// Whether the deposit into the auction contract was observed.
    pub deposited: bool,
}

/// A deployed NFT collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NftCollection {
    /// Internal row ID.
    pub id: i64,
    /// Contract address.
    pub address: Address,
    /// Deployer / owner address.
    pub owner: Address,
    /// ERC-721 name.
    pub name: String,
    /// ERC-721 symbol.
    pub symbol: String,
    /// Vanity short URL, copied from the minting draft.
    pub short_url: Option<String>,
    /// Cover image URL, copied from the minting draft.
    pub cover_url: Option<String>,
    /// Description, copied from the minting draft.
    pub description: Option<String>,
    /// Deployment transaction hash.
    pub tx_hash: String,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`NftCollection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNftCollection {
    /// Contract address.
    pub address: Address,
    /// Deployer / owner address.
    pub owner: Address,
    /// ERC-721 name.
    pub name: String,
    /// ERC-721 symbol.
    pub symbol: String,
    /// Vanity short URL.
    pub short_url: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// Description.
    pub description: Option<String>,
    /// Deployment transaction hash.
    pub tx_hash: String,
}

/// Draft row created when a user submits a collection deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MintingCollection {
    /// Internal row ID.
    pub id: i64,
    /// Deployment transaction hash.
    pub tx_hash: String,
    /// Name the user chose.
    pub name: String,
    /// Vanity short URL.
    pub short_url: Option<String>,
    /// Cover image URL.
    pub cover_url: Option<String>,
    /// Description.
    pub description: Option<String>,
}

/// A minted NFT.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Nft {
    /// Internal row ID.
    pub id: i64,
    /// Owning collection (internal ID).
    pub collection_id: i64,
    /// Token ID within the collection contract.
    pub token_id: String,
    /// Metadata URI as emitted by the contract.
    pub token_uri: String,
    /// Shared identifier of all editions minted from one token URI.
    pub edition_uuid: Uuid,
    /// Receiver of the mint.
    pub owner: Address,
    /// Mint transaction hash.
    pub tx_hash: String,
    /// Metadata name.
    pub name: Option<String>,
    /// Metadata description.
    pub description: Option<String>,
    /// Full-size image URL.
    pub image_url: Option<String>,
    /// Preview image URL.
    pub image_preview_url: Option<String>,
    /// Thumbnail image URL.
    pub image_thumbnail_url: Option<String>,
    /// Original image URL.
    pub image_original_url: Option<String>,
    /// Metadata traits / attributes.
    pub properties: Option<serde_json::Value>,
    /// Metadata royalties.
    pub royalties: Option<serde_json::Value>,
}

/// Insert payload for [`Nft`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewNft {
    /// Owning collection (internal ID).
    pub collection_id: i64,
    /// Token ID within the collection contract.
    pub token_id: String,
    /// Metadata URI.
    pub token_uri: String,
    /// Shared edition identifier.
    pub edition_uuid: Uuid,
    /// Receiver of the mint.
    pub owner: Address,
    /// Mint transaction hash.
    pub tx_hash: String,
    /// Metadata name.
    pub name: Option<String>,
    /// Metadata description.
    pub description: Option<String>,
    /// Full-size image URL.
    pub image_url: Option<String>,
    /// Preview image URL.
    pub image_preview_url: Option<String>,
    /// Thumbnail image URL.
    pub image_thumbnail_url: Option<String>,
    /// Original image URL.
    pub image_original_url: Option<String>,
    /// Metadata traits / attributes.
    pub properties: Option<serde_json::Value>,
    /// Metadata royalties.
    pub royalties: Option<serde_json::Value>,
}

/// Draft row for an NFT a user prepared but has not minted yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedNft {
    /// Internal row ID.
    pub id: i64,
    /// Draft name.
    pub name: String,
    /// Metadata URI the mint will carry.
    pub token_uri: String,
}
