//! PostgreSQL implementation of the persistence layer.
//!
//! Event rows are locked with `SELECT … FOR UPDATE` before their
//! `processed` flag is re-checked, so two reconciler replicas serialize on
//! the event row instead of both applying it. Domain lookups inside a
//! transaction also lock the matched row for the transaction's duration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Store, StoreResult, StoreTx};
use crate::config::ReconcilerConfig;
use crate::domain::{
    Address, Auction, MintingCollection, NewNft, NewNftCollection, Nft, NftCollection, RawEvent,
    RewardTierNft,
};
use crate::error::ReconcileError;

type EventRow = (
    i64,
    bool,
    String,
    i32,
    i32,
    DateTime<Utc>,
    i64,
    serde_json::Value,
    DateTime<Utc>,
);

type AuctionRow = (
    i64,
    String,
    Option<String>,
    bool,
    Option<i64>,
    Option<String>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    bool,
    bool,
    bool,
);

type CollectionRow = (
    i64,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    DateTime<Utc>,
);

type RewardTierRow = (i64, i64, i64, String, String, bool);

type NftRow = (
    i64,
    i64,
    String,
    String,
    Uuid,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<serde_json::Value>,
    Option<serde_json::Value>,
);

const AUCTION_COLUMNS: &str = "id, name, create_auction_tx_hash, on_chain, on_chain_id, owner, \
     on_chain_start_time, on_chain_end_time, deposited_nfts, canceled, finalized";

const NFT_COLUMNS: &str = "id, collection_id, token_id, token_uri, edition_uuid, owner, tx_hash, \
     name, description, image_url, image_preview_url, image_thumbnail_url, image_original_url, \
     properties, royalties";

fn db_err(err: sqlx::Error) -> ReconcileError {
    ReconcileError::Persistence(err.to_string())
}

fn event_from_row(row: EventRow) -> RawEvent {
    let (
        id,
        processed,
        tx_hash,
        tx_index,
        log_index,
        block_timestamp,
        included_in_block,
        data,
        created_at,
    ) = row;
    RawEvent {
        id,
        processed,
        tx_hash,
        tx_index,
        log_index,
        block_timestamp,
        included_in_block,
        data,
        created_at,
    }
}

fn auction_from_row(row: AuctionRow) -> Auction {
    let (
        id,
        name,
        create_auction_tx_hash,
        on_chain,
        on_chain_id,
        owner,
        on_chain_start_time,
        on_chain_end_time,
        deposited_nfts,
        canceled,
        finalized,
    ) = row;
    Auction {
        id,
        name,
        create_auction_tx_hash,
        on_chain,
        on_chain_id,
        owner: owner.map(Address::from),
        on_chain_start_time,
        on_chain_end_time,
        deposited_nfts,
        canceled,
        finalized,
    }
}

fn collection_from_row(row: CollectionRow) -> NftCollection {
    let (id, address, owner, name, symbol, short_url, cover_url, description, tx_hash, created_at) =
        row;
    NftCollection {
        id,
        address: Address::from(address),
        owner: Address::from(owner),
        name,
        symbol,
        short_url,
        cover_url,
        description,
        tx_hash,
        created_at,
    }
}

fn nft_from_row(row: NftRow) -> Nft {
    let (
        id,
        collection_id,
        token_id,
        token_uri,
        edition_uuid,
        owner,
        tx_hash,
        name,
        description,
        image_url,
        image_preview_url,
        image_thumbnail_url,
        image_original_url,
        properties,
        royalties,
    ) = row;
    Nft {
        id,
        collection_id,
        token_id,
        token_uri,
        edition_uuid,
        owner: Address::from(owner),
        tx_hash,
        name,
        description,
        image_url,
        image_preview_url,
        image_thumbnail_url,
        image_original_url,
        properties,
        royalties,
    }
}

/// PostgreSQL-backed store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over an existing connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool sized according to `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Persistence`] if the database is
    /// unreachable or the URL is invalid.
    pub async fn connect(config: &ReconcilerConfig) -> Result<Self, ReconcileError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    /// Applies the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Persistence`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), ReconcileError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReconcileError::Persistence(e.to_string()))
    }
}

impl Store for PostgresStore {
    type Tx = PostgresTx;

    async fn unprocessed(
        &self,
        table: &'static str,
        after_id: i64,
        limit: u32,
    ) -> StoreResult<Vec<RawEvent>> {
        let sql = format!(
            "SELECT id, processed, tx_hash, tx_index, log_index, block_timestamp, \
             included_in_block, data, created_at FROM {table} \
             WHERE processed = false AND id > $2 ORDER BY id ASC LIMIT $1"
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(i64::from(limit))
            .bind(after_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(rows.into_iter().map(event_from_row).collect())
    }

    async fn begin(&self) -> StoreResult<PostgresTx> {
        let tx = self.pool.begin().await.map_err(db_err)?;
        Ok(PostgresTx { tx })
    }
}

/// Transaction over a [`PostgresStore`]. Rolls back when dropped.
pub struct PostgresTx {
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTx").finish_non_exhaustive()
    }
}

impl StoreTx for PostgresTx {
    async fn lock_event(&mut self, table: &'static str, id: i64) -> StoreResult<Option<bool>> {
        let sql = format!("SELECT processed FROM {table} WHERE id = $1 FOR UPDATE");
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)
    }

    async fn mark_processed(&mut self, table: &'static str, id: i64) -> StoreResult<()> {
        let sql = format!("UPDATE {table} SET processed = true WHERE id = $1");
        sqlx::query(&sql)
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn auction_by_create_tx_hash(&mut self, tx_hash: &str) -> StoreResult<Option<Auction>> {
        let sql = format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE create_auction_tx_hash = $1 \
             ORDER BY id LIMIT 1 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, AuctionRow>(&sql)
            .bind(tx_hash)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(row.map(auction_from_row))
    }

    async fn auction_by_on_chain_id(&mut self, on_chain_id: i64) -> StoreResult<Option<Auction>> {
        let sql = format!(
            "SELECT {AUCTION_COLUMNS} FROM auctions WHERE on_chain_id = $1 \
             ORDER BY id LIMIT 1 FOR UPDATE"
        );
        let row = sqlx::query_as::<_, AuctionRow>(&sql)
            .bind(on_chain_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(row.map(auction_from_row))
    }

    async fn save_auction(&mut self, auction: &Auction) -> StoreResult<()> {
        sqlx::query(
            "UPDATE auctions SET on_chain = $2, on_chain_id = $3, owner = $4, \
             on_chain_start_time = $5, on_chain_end_time = $6, deposited_nfts = $7, \
             canceled = $8, finalized = $9, updated_at = now() WHERE id = $1",
        )
        .bind(auction.id)
        .bind(auction.on_chain)
        .bind(auction.on_chain_id)
        .bind(auction.owner.as_ref().map(Address::as_str))
        .bind(auction.on_chain_start_time)
        .bind(auction.on_chain_end_time)
        .bind(auction.deposited_nfts)
        .bind(auction.canceled)
        .bind(auction.finalized)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn reward_tier_nft(
        &mut self,
        auction_id: i64,
        slot_index: i64,
        contract_address: &Address,
        token_id: &str,
    ) -> StoreResult<Option<RewardTierNft>> {
        let row = sqlx::query_as::<_, RewardTierRow>(
            "SELECT id, auction_id, slot_index, contract_address, token_id, deposited \
             FROM reward_tier_nfts WHERE auction_id = $1 AND slot_index = $2 \
             AND contract_address = $3 AND token_id = $4 LIMIT 1 FOR UPDATE",
        )
        .bind(auction_id)
        .bind(slot_index)
        .bind(contract_address.as_str())
        .bind(token_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(row.map(
            |(id, auction_id, slot_index, contract_address, token_id, deposited)| RewardTierNft {
                id,
                auction_id,
                slot_index,
                contract_address: Address::from(contract_address),
                token_id,
                deposited,
            },
        ))
    }

    async fn save_reward_tier_nft(&mut self, nft: &RewardTierNft) -> StoreResult<()> {
        sqlx::query("UPDATE reward_tier_nfts SET deposited = $2 WHERE id = $1")
            .bind(nft.id)
            .bind(nft.deposited)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn collection_by_address(
        &mut self,
        address: &Address,
    ) -> StoreResult<Option<NftCollection>> {
        let row = sqlx::query_as::<_, CollectionRow>(
            "SELECT id, address, owner, name, symbol, short_url, cover_url, description, \
             tx_hash, created_at FROM nft_collections WHERE address = $1 LIMIT 1",
        )
        .bind(address.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(row.map(collection_from_row))
    }

    async fn insert_collection(
        &mut self,
        collection: &NewNftCollection,
    ) -> StoreResult<NftCollection> {
        let row = sqlx::query_as::<_, CollectionRow>(
            "INSERT INTO nft_collections \
             (address, owner, name, symbol, short_url, cover_url, description, tx_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id, address, owner, name, symbol, short_url, cover_url, description, \
             tx_hash, created_at",
        )
        .bind(collection.address.as_str())
        .bind(collection.owner.as_str())
        .bind(&collection.name)
        .bind(&collection.symbol)
        .bind(&collection.short_url)
        .bind(&collection.cover_url)
        .bind(&collection.description)
        .bind(&collection.tx_hash)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(collection_from_row(row))
    }

    async fn minting_collection_by_tx_hash(
        &mut self,
        tx_hash: &str,
    ) -> StoreResult<Option<MintingCollection>> {
        let row = sqlx::query_as::<_, (i64, String, String, Option<String>, Option<String>, Option<String>)>(
            "SELECT id, tx_hash, name, short_url, cover_url, description \
             FROM minting_collections WHERE tx_hash = $1 ORDER BY id LIMIT 1 FOR UPDATE",
        )
        .bind(tx_hash)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        Ok(row.map(
            |(id, tx_hash, name, short_url, cover_url, description)| MintingCollection {
                id,
                tx_hash,
                name,
                short_url,
                cover_url,
                description,
            },
        ))
    }

    async fn delete_minting_collection(&mut self, id: i64) -> StoreResult<()> {
        sqlx::query("DELETE FROM minting_collections WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn nft_by_token(&mut self, collection_id: i64, token_id: &str) -> StoreResult<Option<Nft>> {
        let sql = format!(
            "SELECT {NFT_COLUMNS} FROM nfts WHERE collection_id = $1 AND token_id = $2 LIMIT 1"
        );
        let row = sqlx::query_as::<_, NftRow>(&sql)
            .bind(collection_id)
            .bind(token_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(row.map(nft_from_row))
    }

    async fn edition_for_token_uri(
        &mut self,
        collection_id: i64,
        token_uri: &str,
    ) -> StoreResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT edition_uuid FROM nfts WHERE collection_id = $1 AND token_uri = $2 \
             ORDER BY id LIMIT 1",
        )
        .bind(collection_id)
        .bind(token_uri)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn insert_nft(&mut self, nft: &NewNft) -> StoreResult<Nft> {
        let sql = format!(
            "INSERT INTO nfts (collection_id, token_id, token_uri, edition_uuid, owner, tx_hash, \
             name, description, image_url, image_preview_url, image_thumbnail_url, \
             image_original_url, properties, royalties) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {NFT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, NftRow>(&sql)
            .bind(nft.collection_id)
            .bind(&nft.token_id)
            .bind(&nft.token_uri)
            .bind(nft.edition_uuid)
            .bind(nft.owner.as_str())
            .bind(&nft.tx_hash)
            .bind(&nft.name)
            .bind(&nft.description)
            .bind(&nft.image_url)
            .bind(&nft.image_preview_url)
            .bind(&nft.image_thumbnail_url)
            .bind(&nft.image_original_url)
            .bind(&nft.properties)
            .bind(&nft.royalties)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err)?;
        Ok(nft_from_row(row))
    }

    async fn delete_saved_nft_by_token_uri(&mut self, token_uri: &str) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM saved_nfts WHERE id = \
             (SELECT id FROM saved_nfts WHERE token_uri = $1 ORDER BY id LIMIT 1)",
        )
        .bind(token_uri)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }
}
