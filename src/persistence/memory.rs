//! In-process store with transactional semantics.
//!
//! [`MemoryStore`] keeps every table in one `Tables` value behind a
//! [`tokio::sync::Mutex`]. A transaction takes the lock for its whole
//! lifetime, works on a private copy, and swaps the copy in on commit;
//! dropping the transaction discards the copy. Transactions are therefore
//! serializable and a failed commit leaves no partial effect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Store, StoreResult, StoreTx};
use crate::domain::{
    Address, Auction, MintingCollection, NewNft, NewNftCollection, Nft, NftCollection, RawEvent,
    RewardTierNft, SavedNft,
};
use crate::error::ReconcileError;

#[derive(Debug, Clone, Default)]
struct Tables {
    last_id: i64,
    events: HashMap<&'static str, Vec<RawEvent>>,
    auctions: Vec<Auction>,
    reward_tier_nfts: Vec<RewardTierNft>,
    collections: Vec<NftCollection>,
    minting_collections: Vec<MintingCollection>,
    nfts: Vec<Nft>,
    saved_nfts: Vec<SavedNft>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id = self.last_id.saturating_add(1);
        self.last_id
    }

    fn event_mut(&mut self, table: &'static str, id: i64) -> Option<&mut RawEvent> {
        self.events
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|row| row.id == id))
    }
}

/// In-memory [`Store`] implementation.
///
/// Cheap to clone; clones share the same tables. Besides the [`Store`]
/// contract it exposes seeding helpers that stand in for the external
/// ingester and the user-facing API, plus inspection helpers.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next [`StoreTx::commit`] fail with a persistence error.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Appends an unprocessed event row to `table` and returns its ID.
    pub async fn append_event(
        &self,
        table: &'static str,
        tx_hash: &str,
        data: serde_json::Value,
    ) -> i64 {
        let mut tables = self.tables.lock().await;
        let id = tables.next_id();
        let now = Utc::now();
        let log_index = tables.events.get(table).map_or(0, Vec::len);
        tables.events.entry(table).or_default().push(RawEvent {
            id,
            processed: false,
            tx_hash: tx_hash.to_string(),
            tx_index: 0,
            log_index: i32::try_from(log_index).unwrap_or(i32::MAX),
            block_timestamp: now,
            included_in_block: 0,
            data,
            created_at: now,
        });
        id
    }

    /// Inserts an auction row, assigning it a fresh ID.
    pub async fn add_auction(&self, mut auction: Auction) -> i64 {
        let mut tables = self.tables.lock().await;
        auction.id = tables.next_id();
        let id = auction.id;
        tables.auctions.push(auction);
        id
    }

    /// Inserts a reward tier NFT row, assigning it a fresh ID.
    pub async fn add_reward_tier_nft(&self, mut nft: RewardTierNft) -> i64 {
        let mut tables = self.tables.lock().await;
        nft.id = tables.next_id();
        let id = nft.id;
        tables.reward_tier_nfts.push(nft);
        id
    }

    /// Inserts a collection row, assigning it a fresh ID.
    pub async fn add_collection(&self, mut collection: NftCollection) -> i64 {
        let mut tables = self.tables.lock().await;
        collection.id = tables.next_id();
        let id = collection.id;
        tables.collections.push(collection);
        id
    }

    /// Inserts a minting collection draft, assigning it a fresh ID.
    pub async fn add_minting_collection(&self, mut draft: MintingCollection) -> i64 {
        let mut tables = self.tables.lock().await;
        draft.id = tables.next_id();
        let id = draft.id;
        tables.minting_collections.push(draft);
        id
    }

    /// Inserts a saved NFT draft, assigning it a fresh ID.
    pub async fn add_saved_nft(&self, mut draft: SavedNft) -> i64 {
        let mut tables = self.tables.lock().await;
        draft.id = tables.next_id();
        let id = draft.id;
        tables.saved_nfts.push(draft);
        id
    }

    /// Returns a copy of an event row.
    pub async fn event(&self, table: &'static str, id: i64) -> Option<RawEvent> {
        let tables = self.tables.lock().await;
        tables
            .events
            .get(table)
            .and_then(|rows| rows.iter().find(|row| row.id == id).cloned())
    }

    /// Returns all auction rows.
    pub async fn auctions(&self) -> Vec<Auction> {
        self.tables.lock().await.auctions.clone()
    }

    /// Returns all reward tier NFT rows.
    pub async fn reward_tier_nfts(&self) -> Vec<RewardTierNft> {
        self.tables.lock().await.reward_tier_nfts.clone()
    }

    /// Returns all collection rows.
    pub async fn collections(&self) -> Vec<NftCollection> {
        self.tables.lock().await.collections.clone()
    }

    /// Returns all minting collection drafts.
    pub async fn minting_collections(&self) -> Vec<MintingCollection> {
        self.tables.lock().await.minting_collections.clone()
    }

    /// Returns all NFT rows.
    pub async fn nfts(&self) -> Vec<Nft> {
        self.tables.lock().await.nfts.clone()
    }

    /// Returns all saved NFT drafts.
    pub async fn saved_nfts(&self) -> Vec<SavedNft> {
        self.tables.lock().await.saved_nfts.clone()
    }
}

impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn unprocessed(
        &self,
        table: &'static str,
        after_id: i64,
        limit: u32,
    ) -> StoreResult<Vec<RawEvent>> {
        let tables = self.tables.lock().await;
        let Some(rows) = tables.events.get(table) else {
            return Ok(Vec::new());
        };
        let mut pending: Vec<RawEvent> = rows
            .iter()
            .filter(|r| !r.processed && r.id > after_id)
            .cloned()
            .collect();
        pending.sort_by_key(|r| r.id);
        pending.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(pending)
    }

    async fn begin(&self) -> StoreResult<MemoryTx> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(MemoryTx {
            guard,
            working,
            fail_next_commit: Arc::clone(&self.fail_next_commit),
        })
    }
}

/// Transaction over a [`MemoryStore`].
///
/// Holds the store lock until committed or dropped.
#[derive(Debug)]
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    fail_next_commit: Arc<AtomicBool>,
}

impl StoreTx for MemoryTx {
    async fn lock_event(&mut self, table: &'static str, id: i64) -> StoreResult<Option<bool>> {
        Ok(self.working.event_mut(table, id).map(|row| row.processed))
    }

    async fn mark_processed(&mut self, table: &'static str, id: i64) -> StoreResult<()> {
        let row = self
            .working
            .event_mut(table, id)
            .ok_or_else(|| ReconcileError::Persistence(format!("{table}#{id} not found")))?;
        row.processed = true;
        Ok(())
    }

    async fn auction_by_create_tx_hash(&mut self, tx_hash: &str) -> StoreResult<Option<Auction>> {
        Ok(self
            .working
            .auctions
            .iter()
            .find(|a| a.create_auction_tx_hash.as_deref() == Some(tx_hash))
            .cloned())
    }

    async fn auction_by_on_chain_id(&mut self, on_chain_id: i64) -> StoreResult<Option<Auction>> {
        Ok(self
            .working
            .auctions
            .iter()
            .find(|a| a.on_chain_id == Some(on_chain_id))
            .cloned())
    }

    async fn save_auction(&mut self, auction: &Auction) -> StoreResult<()> {
        let stored = self
            .working
            .auctions
            .iter_mut()
            .find(|a| a.id == auction.id)
            .ok_or_else(|| ReconcileError::Persistence(format!("auction {} not found", auction.id)))?;
        stored.on_chain = auction.on_chain;
        stored.on_chain_id = auction.on_chain_id;
        stored.owner.clone_from(&auction.owner);
        stored.on_chain_start_time = auction.on_chain_start_time;
        stored.on_chain_end_time = auction.on_chain_end_time;
        stored.deposited_nfts = auction.deposited_nfts;
        stored.canceled = auction.canceled;
        stored.finalized = auction.finalized;
        Ok(())
    }

    async fn reward_tier_nft(
        &mut self,
        auction_id: i64,
        slot_index: i64,
        contract_address: &Address,
        token_id: &str,
    ) -> StoreResult<Option<RewardTierNft>> {
        Ok(self
            .working
            .reward_tier_nfts
            .iter()
            .find(|n| {
                n.auction_id == auction_id
                    && n.slot_index == slot_index
                    && &n.contract_address == contract_address
                    && n.token_id == token_id
            })
            .cloned())
    }

    async fn save_reward_tier_nft(&mut self, nft: &RewardTierNft) -> StoreResult<()> {
        let stored = self
            .working
            .reward_tier_nfts
            .iter_mut()
            .find(|n| n.id == nft.id)
            .ok_or_else(|| {
                ReconcileError::Persistence(format!("reward tier nft {} not found", nft.id))
            })?;
        stored.deposited = nft.deposited;
        Ok(())
    }

    async fn collection_by_address(
        &mut self,
        address: &Address,
    ) -> StoreResult<Option<NftCollection>> {
        Ok(self
            .working
            .collections
            .iter()
            .find(|c| &c.address == address)
            .cloned())
    }

    async fn insert_collection(
        &mut self,
        collection: &NewNftCollection,
    ) -> StoreResult<NftCollection> {
        let row = NftCollection {
            id: self.working.next_id(),
            address: collection.address.clone(),
            owner: collection.owner.clone(),
            name: collection.name.clone(),
            symbol: collection.symbol.clone(),
            short_url: collection.short_url.clone(),
            cover_url: collection.cover_url.clone(),
            description: collection.description.clone(),
            tx_hash: collection.tx_hash.clone(),
            created_at: Utc::now(),
        };
        self.working.collections.push(row.clone());
        Ok(row)
    }

    async fn minting_collection_by_tx_hash(
        &mut self,
        tx_hash: &str,
    ) -> StoreResult<Option<MintingCollection>> {
        Ok(self
            .working
            .minting_collections
            .iter()
            .find(|m| m.tx_hash == tx_hash)
            .cloned())
    }

    async fn delete_minting_collection(&mut self, id: i64) -> StoreResult<()> {
        self.working.minting_collections.retain(|m| m.id != id);
        Ok(())
    }

    async fn nft_by_token(&mut self, collection_id: i64, token_id: &str) -> StoreResult<Option<Nft>> {
        Ok(self
            .working
            .nfts
            .iter()
            .find(|n| n.collection_id == collection_id && n.token_id == token_id)
            .cloned())
    }

    async fn edition_for_token_uri(
        &mut self,
        collection_id: i64,
        token_uri: &str,
    ) -> StoreResult<Option<Uuid>> {
        Ok(self
            .working
            .nfts
            .iter()
            .find(|n| n.collection_id == collection_id && n.token_uri == token_uri)
            .map(|n| n.edition_uuid))
    }

    async fn insert_nft(&mut self, nft: &NewNft) -> StoreResult<Nft> {
        let row = Nft {
            id: self.working.next_id(),
            collection_id: nft.collection_id,
            token_id: nft.token_id.clone(),
            token_uri: nft.token_uri.clone(),
            edition_uuid: nft.edition_uuid,
            owner: nft.owner.clone(),
            tx_hash: nft.tx_hash.clone(),
            name: nft.name.clone(),
            description: nft.description.clone(),
            image_url: nft.image_url.clone(),
            image_preview_url: nft.image_preview_url.clone(),
            image_thumbnail_url: nft.image_thumbnail_url.clone(),
            image_original_url: nft.image_original_url.clone(),
            properties: nft.properties.clone(),
            royalties: nft.royalties.clone(),
        };
        self.working.nfts.push(row.clone());
        Ok(row)
    }

    async fn delete_saved_nft_by_token_uri(&mut self, token_uri: &str) -> StoreResult<u64> {
        let position = self
            .working
            .saved_nfts
            .iter()
            .enumerate()
            .filter(|(_, s)| s.token_uri == token_uri)
            .min_by_key(|(_, s)| s.id)
            .map(|(i, _)| i);
        match position {
            Some(i) => {
                self.working.saved_nfts.remove(i);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn commit(self) -> StoreResult<()> {
        let Self {
            mut guard,
            working,
            fail_next_commit,
        } = self;
        if fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(ReconcileError::Persistence(
                "commit rejected by store".to_string(),
            ));
        }
        *guard = working;
        Ok(())
    }
}
