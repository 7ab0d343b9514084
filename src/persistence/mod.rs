//! Persistence layer: event log access and domain record reads/writes.
//!
//! [`Store`] is the seam between the synchronizers and the database. All
//! writes happen through a [`StoreTx`] so that a domain transition and
//! the `processed` flag of the events that caused it commit or roll back
//! together. Dropping a transaction without calling [`StoreTx::commit`]
//! rolls it back.
//!
//! Two backends are provided: [`postgres::PostgresStore`] (`sqlx::PgPool`)
//! and [`memory::MemoryStore`], an in-process store with the same
//! transactional contract.

pub mod memory;
pub mod postgres;

use std::future::Future;

use uuid::Uuid;

use crate::domain::{
    Address, Auction, MintingCollection, NewNft, NewNftCollection, Nft, NftCollection, RawEvent,
    RewardTierNft,
};
use crate::error::ReconcileError;

/// Shorthand for persistence results.
pub type StoreResult<T> = Result<T, ReconcileError>;

/// Entry point to a backing store.
pub trait Store: Send + Sync + 'static {
    /// Transaction handle produced by [`Store::begin`].
    type Tx: StoreTx;

    /// Returns up to `limit` unprocessed rows of `table` with an ID above
    /// `after_id`, oldest first.
    fn unprocessed(
        &self,
        table: &'static str,
        after_id: i64,
        limit: u32,
    ) -> impl Future<Output = StoreResult<Vec<RawEvent>>> + Send;

    /// Opens a transaction.
    fn begin(&self) -> impl Future<Output = StoreResult<Self::Tx>> + Send;
}

/// Operations available inside one transaction.
///
/// Lookups are pure reads (the PostgreSQL backend takes row locks but
/// writes nothing). `save_*` methods write only the post-chain field set
/// owned by reconciliation; user-owned columns are never touched.
pub trait StoreTx: Send {
    /// Locks an event row and returns its `processed` flag, or `None` if
    /// the row does not exist.
    fn lock_event(
        &mut self,
        table: &'static str,
        id: i64,
    ) -> impl Future<Output = StoreResult<Option<bool>>> + Send;

    /// Sets `processed = true` on an event row.
    fn mark_processed(
        &mut self,
        table: &'static str,
        id: i64,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Finds the auction whose creation transaction is `tx_hash`.
    fn auction_by_create_tx_hash(
        &mut self,
        tx_hash: &str,
    ) -> impl Future<Output = StoreResult<Option<Auction>>> + Send;

    /// Finds the auction with the given on-chain ID.
    fn auction_by_on_chain_id(
        &mut self,
        on_chain_id: i64,
    ) -> impl Future<Output = StoreResult<Option<Auction>>> + Send;

    /// Persists the post-chain fields of an auction.
    fn save_auction(&mut self, auction: &Auction)
    -> impl Future<Output = StoreResult<()>> + Send;

    /// Finds the reward tier NFT occupying a slot of an auction.
    fn reward_tier_nft(
        &mut self,
        auction_id: i64,
        slot_index: i64,
        contract_address: &Address,
        token_id: &str,
    ) -> impl Future<Output = StoreResult<Option<RewardTierNft>>> + Send;

    /// Persists the `deposited` flag of a reward tier NFT.
    fn save_reward_tier_nft(
        &mut self,
        nft: &RewardTierNft,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Finds a collection by contract address.
    fn collection_by_address(
        &mut self,
        address: &Address,
    ) -> impl Future<Output = StoreResult<Option<NftCollection>>> + Send;

    /// Inserts a collection and returns the stored row.
    fn insert_collection(
        &mut self,
        collection: &NewNftCollection,
    ) -> impl Future<Output = StoreResult<NftCollection>> + Send;

    /// Finds the minting draft for a deployment transaction.
    fn minting_collection_by_tx_hash(
        &mut self,
        tx_hash: &str,
    ) -> impl Future<Output = StoreResult<Option<MintingCollection>>> + Send;

    /// Deletes a minting draft.
    fn delete_minting_collection(
        &mut self,
        id: i64,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Finds an NFT by collection and token ID.
    fn nft_by_token(
        &mut self,
        collection_id: i64,
        token_id: &str,
    ) -> impl Future<Output = StoreResult<Option<Nft>>> + Send;

    /// Returns the edition UUID already used for `token_uri` in a
    /// collection, if any NFT carries it.
    fn edition_for_token_uri(
        &mut self,
        collection_id: i64,
        token_uri: &str,
    ) -> impl Future<Output = StoreResult<Option<Uuid>>> + Send;

    /// Inserts an NFT and returns the stored row.
    fn insert_nft(&mut self, nft: &NewNft) -> impl Future<Output = StoreResult<Nft>> + Send;

    /// Deletes at most one saved draft with the given token URI and
    /// returns the number of rows deleted.
    fn delete_saved_nft_by_token_uri(
        &mut self,
        token_uri: &str,
    ) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Commits the transaction.
    fn commit(self) -> impl Future<Output = StoreResult<()>> + Send
    where
        Self: Sized;
}
