//! Auction lifecycle events → [`Auction`].
//!
//! * `AuctionCreated` confirms a pending auction, correlated by the hash
//!   of the transaction the user submitted.
//! * `Erc721Deposited` marks the auction funded, correlated by on-chain ID.
//! * `AuctionCanceled` / `AuctionFinalized` set the terminal flags.
//!
//! Every transition only sets fields. Replaying an event against a record
//! already in the target state writes nothing and announces nothing, but
//! the event is still marked processed.

use chrono::Utc;

use super::{CorrelationKey, Reconciler};
use crate::domain::events::{
    AuctionCanceled, AuctionCreated, AuctionFinalized, Erc721Deposited, unix_time,
};
use crate::domain::{Auction, DomainChange, EventRecord};
use crate::persistence::{StoreResult, StoreTx};

/// Reconciler for [`AuctionCreated`] events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionCreatedReconciler;

impl Reconciler for AuctionCreatedReconciler {
    type Payload = AuctionCreated;
    type Target = Auction;

    fn key(&self, event: &EventRecord<AuctionCreated>) -> CorrelationKey {
        CorrelationKey::TxHash(event.tx_hash.clone())
    }

    async fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<AuctionCreated>],
    ) -> StoreResult<Option<Auction>> {
        let Some(event) = unit.first() else {
            return Ok(None);
        };
        tx.auction_by_create_tx_hash(&event.tx_hash).await
    }

    async fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<AuctionCreated>],
        mut auction: Auction,
    ) -> StoreResult<Vec<DomainChange>> {
        let Some(event) = unit.first() else {
            return Ok(Vec::new());
        };
        let data = &event.data;

        if auction.on_chain {
            if auction.on_chain_id != Some(data.auction_id) {
                tracing::warn!(
                    auction_id = auction.id,
                    stored_on_chain_id = ?auction.on_chain_id,
                    event_on_chain_id = data.auction_id,
                    "auction already confirmed with a different on-chain id, keeping stored id"
                );
            }
            return Ok(Vec::new());
        }

        let start = unix_time(data.start_time);
        let end = unix_time(data.end_time);
        if start.is_none() || end.is_none() {
            tracing::warn!(
                auction_id = auction.id,
                start_time = data.start_time,
                end_time = data.end_time,
                "auction times out of range"
            );
        }
        auction.on_chain = true;
        auction.on_chain_id = Some(data.auction_id);
        auction.owner = Some(data.auction_owner.clone());
        auction.on_chain_start_time = start;
        auction.on_chain_end_time = end;
        tx.save_auction(&auction).await?;

        tracing::info!(
            auction_id = auction.id,
            on_chain_id = data.auction_id,
            "auction confirmed on chain"
        );
        Ok(vec![DomainChange::AuctionConfirmed {
            auction_id: auction.id,
            on_chain_id: data.auction_id,
            owner: data.auction_owner.clone(),
            timestamp: Utc::now(),
        }])
    }
}

async fn auction_by_on_chain_id<T: StoreTx>(
    tx: &mut T,
    on_chain_id: Option<i64>,
) -> StoreResult<Option<Auction>> {
    match on_chain_id {
        Some(id) => tx.auction_by_on_chain_id(id).await,
        None => Ok(None),
    }
}

/// Reconciler for [`Erc721Deposited`] events.
#[derive(Debug, Clone, Copy, Default)]
pub struct Erc721DepositedReconciler;

impl Reconciler for Erc721DepositedReconciler {
    type Payload = Erc721Deposited;
    type Target = Auction;

    fn key(&self, event: &EventRecord<Erc721Deposited>) -> CorrelationKey {
        CorrelationKey::OnChainId(event.data.auction_id)
    }

    async fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<Erc721Deposited>],
    ) -> StoreResult<Option<Auction>> {
        auction_by_on_chain_id(tx, unit.first().map(|e| e.data.auction_id)).await
    }

    async fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<Erc721Deposited>],
        mut auction: Auction,
    ) -> StoreResult<Vec<DomainChange>> {
        let Some(event) = unit.first() else {
            return Ok(Vec::new());
        };
        let data = &event.data;
        let mut changed = false;

        if !auction.deposited_nfts {
            auction.deposited_nfts = true;
            tx.save_auction(&auction).await?;
            changed = true;
        }

        match tx
            .reward_tier_nft(auction.id, data.slot_index, &data.token_address, &data.token_id)
            .await?
        {
            Some(mut reward) if !reward.deposited => {
                reward.deposited = true;
                tx.save_reward_tier_nft(&reward).await?;
                changed = true;
            }
            Some(_) => {}
            None => tracing::debug!(
                auction_id = auction.id,
                slot_index = data.slot_index,
                token_address = %data.token_address,
                token_id = %data.token_id,
                "deposit has no matching reward tier nft"
            ),
        }

        if !changed {
            return Ok(Vec::new());
        }
        tracing::info!(
            auction_id = auction.id,
            on_chain_id = data.auction_id,
            slot_index = data.slot_index,
            depositor = %data.depositor,
            "reward nft deposited"
        );
        Ok(vec![DomainChange::AuctionFunded {
            auction_id: auction.id,
            on_chain_id: data.auction_id,
            slot_index: data.slot_index,
            timestamp: Utc::now(),
        }])
    }
}

/// Reconciler for [`AuctionCanceled`] events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionCanceledReconciler;

impl Reconciler for AuctionCanceledReconciler {
    type Payload = AuctionCanceled;
    type Target = Auction;

    fn key(&self, event: &EventRecord<AuctionCanceled>) -> CorrelationKey {
        CorrelationKey::OnChainId(event.data.auction_id)
    }

    async fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<AuctionCanceled>],
    ) -> StoreResult<Option<Auction>> {
        auction_by_on_chain_id(tx, unit.first().map(|e| e.data.auction_id)).await
    }

    async fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<AuctionCanceled>],
        mut auction: Auction,
    ) -> StoreResult<Vec<DomainChange>> {
        let Some(event) = unit.first() else {
            return Ok(Vec::new());
        };
        if auction.canceled {
            return Ok(Vec::new());
        }
        auction.canceled = true;
        tx.save_auction(&auction).await?;

        tracing::info!(auction_id = auction.id, on_chain_id = event.data.auction_id, "auction canceled");
        Ok(vec![DomainChange::AuctionCanceled {
            auction_id: auction.id,
            on_chain_id: event.data.auction_id,
            timestamp: Utc::now(),
        }])
    }
}

/// Reconciler for [`AuctionFinalized`] events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionFinalizedReconciler;

impl Reconciler for AuctionFinalizedReconciler {
    type Payload = AuctionFinalized;
    type Target = Auction;

    fn key(&self, event: &EventRecord<AuctionFinalized>) -> CorrelationKey {
        CorrelationKey::OnChainId(event.data.auction_id)
    }

    async fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<AuctionFinalized>],
    ) -> StoreResult<Option<Auction>> {
        auction_by_on_chain_id(tx, unit.first().map(|e| e.data.auction_id)).await
    }

    async fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<AuctionFinalized>],
        mut auction: Auction,
    ) -> StoreResult<Vec<DomainChange>> {
        let Some(event) = unit.first() else {
            return Ok(Vec::new());
        };
        if auction.finalized {
            return Ok(Vec::new());
        }
        auction.finalized = true;
        tx.save_auction(&auction).await?;

        tracing::info!(auction_id = auction.id, on_chain_id = event.data.auction_id, "auction finalized");
        Ok(vec![DomainChange::AuctionFinalized {
            auction_id: auction.id,
            on_chain_id: event.data.auction_id,
            timestamp: Utc::now(),
        }])
    }
}
