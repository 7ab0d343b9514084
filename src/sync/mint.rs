//! `MintNft` → [`Nft`](crate::domain::Nft) editions.
//!
//! Mints sharing a token URI are editions of one artwork. They are
//! reconciled as a single unit: metadata is fetched once, every edition
//! gets the same edition UUID, and one saved draft for the URI is
//! consumed.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use uuid::Uuid;

use super::{CorrelationKey, Reconciler};
use crate::domain::events::MintNft;
use crate::domain::{Address, DomainChange, EventRecord, NewNft, NftCollection};
use crate::metadata::MetadataFetcher;
use crate::persistence::{StoreResult, StoreTx};

/// Reconciler for [`MintNft`] events.
#[derive(Debug, Clone)]
pub struct MintReconciler<F> {
    fetcher: F,
}

impl<F: MetadataFetcher> MintReconciler<F> {
    /// Creates a reconciler enriching mints through `fetcher`.
    #[must_use]
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: MetadataFetcher + 'static> Reconciler for MintReconciler<F> {
    type Payload = MintNft;
    type Target = NftCollection;

    /// Groups by `(contract, token URI)`, in order of first appearance.
    fn group(&self, events: Vec<EventRecord<MintNft>>) -> Vec<Vec<EventRecord<MintNft>>> {
        let mut index: HashMap<(Address, String), usize> = HashMap::new();
        let mut units: Vec<Vec<EventRecord<MintNft>>> = Vec::new();
        for event in events {
            let key = (event.data.contract_address.clone(), event.data.token_uri.clone());
            match index.get(&key).and_then(|&i| units.get_mut(i)) {
                Some(unit) => unit.push(event),
                None => {
                    index.insert(key, units.len());
                    units.push(vec![event]);
                }
            }
        }
        units
    }

    fn key(&self, event: &EventRecord<MintNft>) -> CorrelationKey {
        CorrelationKey::ContractAddress(event.data.contract_address.clone())
    }

    async fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<MintNft>],
    ) -> StoreResult<Option<NftCollection>> {
        let Some(event) = unit.first() else {
            return Ok(None);
        };
        tx.collection_by_address(&event.data.contract_address).await
    }

    async fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<MintNft>],
        collection: NftCollection,
    ) -> StoreResult<Vec<DomainChange>> {
        let Some(first) = unit.first() else {
            return Ok(Vec::new());
        };
        let token_uri = first.data.token_uri.as_str();

        let mut seen = HashSet::with_capacity(unit.len());
        let mut fresh = Vec::with_capacity(unit.len());
        for event in unit {
            if !seen.insert(event.data.token_id.as_str()) {
                tracing::debug!(
                    collection_id = collection.id,
                    token_id = %event.data.token_id,
                    "duplicate mint in batch"
                );
            } else if tx.nft_by_token(collection.id, &event.data.token_id).await?.is_some() {
                tracing::debug!(
                    collection_id = collection.id,
                    token_id = %event.data.token_id,
                    "nft already recorded"
                );
            } else {
                fresh.push(event);
            }
        }
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let metadata = self.fetcher.fetch(token_uri).await?;
        let existing_edition = tx.edition_for_token_uri(collection.id, token_uri).await?;
        let edition_uuid = existing_edition.unwrap_or_else(Uuid::new_v4);

        let mut changes = Vec::with_capacity(fresh.len());
        for event in fresh {
            let nft = tx
                .insert_nft(&NewNft {
                    collection_id: collection.id,
                    token_id: event.data.token_id.clone(),
                    token_uri: token_uri.to_string(),
                    edition_uuid,
                    owner: event.data.receiver.clone(),
                    tx_hash: event.tx_hash.clone(),
                    name: metadata.name.clone(),
                    description: metadata.description.clone(),
                    image_url: metadata.image_url.clone(),
                    image_preview_url: metadata.image_preview_url.clone(),
                    image_thumbnail_url: metadata.image_thumbnail_url.clone(),
                    image_original_url: metadata.image_original_url.clone(),
                    properties: metadata.traits.clone(),
                    royalties: metadata.royalties.clone(),
                })
                .await?;
            changes.push(DomainChange::NftMinted {
                nft_id: nft.id,
                collection_id: collection.id,
                token_id: nft.token_id,
                edition_uuid,
                timestamp: Utc::now(),
            });
        }

        // The draft belongs to the artwork, so only its first edition consumes it.
        if existing_edition.is_none() && tx.delete_saved_nft_by_token_uri(token_uri).await? == 0 {
            tracing::debug!(
                key = %CorrelationKey::TokenUri(token_uri.to_string()),
                "no saved draft to consume"
            );
        }
        tracing::info!(
            collection_id = collection.id,
            %edition_uuid,
            editions = changes.len(),
            "nfts minted"
        );
        Ok(changes)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::{EventBus, EventPayload, SavedNft};
    use crate::error::ReconcileError;
    use crate::metadata::TokenMetadata;
    use crate::persistence::memory::MemoryStore;
    use crate::sync::{BatchReport, Synchronizer};
    use serde_json::json;

    #[derive(Debug, Clone, Default)]
    struct CountingFetcher {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl MetadataFetcher for CountingFetcher {
        async fn fetch(&self, token_uri: &str) -> Result<TokenMetadata, ReconcileError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ReconcileError::Metadata(format!("GET {token_uri}: timed out")));
            }
            Ok(TokenMetadata {
                name: Some("Sunset".to_string()),
                image_url: Some("https://img/sunset.png".to_string()),
                ..TokenMetadata::default()
            })
        }
    }

    fn mint(contract: &str, token_id: u64, token_uri: &str) -> serde_json::Value {
        json!({
            "contractAddress": contract,
            "tokenId": token_id,
            "tokenUri": token_uri,
            "receiver": "0xReceiver",
        })
    }

    async fn store_with_collection(address: &str) -> (MemoryStore, i64) {
        let store = MemoryStore::new();
        let id = store
            .add_collection(NftCollection {
                id: 0,
                address: Address::new(address),
                owner: Address::new("0xfeed"),
                name: "Foo".to_string(),
                symbol: "FOO".to_string(),
                short_url: None,
                cover_url: None,
                description: None,
                tx_hash: "0xdeploy".to_string(),
                created_at: Utc::now(),
            })
            .await;
        (store, id)
    }

    async fn add_draft(store: &MemoryStore, token_uri: &str) {
        store
            .add_saved_nft(SavedNft {
                id: 0,
                name: "Sunset".to_string(),
                token_uri: token_uri.to_string(),
            })
            .await;
    }

    #[tokio::test]
    async fn editions_share_uuid_and_consume_one_draft() {
        let (store, collection_id) = store_with_collection("0xcafe").await;
        add_draft(&store, "ipfs://sunset").await;
        add_draft(&store, "ipfs://sunset").await;
        for token_id in 1..=3 {
            store
                .append_event(
                    MintNft::TABLE,
                    &format!("0xmint{token_id}"),
                    mint("0xCAFE", token_id, "ipfs://sunset"),
                )
                .await;
        }
        let fetcher = CountingFetcher::default();
        let calls = Arc::clone(&fetcher.calls);
        let sync = Synchronizer::new(MintReconciler::new(fetcher), 100, EventBus::new(16));

        let Ok(report) = sync.sync_all(&store).await else {
            panic!("sync_all failed");
        };
        assert_eq!(report.fetched, 3);
        assert_eq!(report.applied, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let nfts = store.nfts().await;
        assert_eq!(nfts.len(), 3);
        let Some(edition) = nfts.first().map(|n| n.edition_uuid) else {
            panic!("no nfts");
        };
        assert!(nfts.iter().all(|n| n.edition_uuid == edition));
        assert!(nfts.iter().all(|n| n.collection_id == collection_id));
        assert!(nfts.iter().all(|n| n.owner.as_str() == "0xreceiver"));
        assert!(nfts.iter().all(|n| n.name.as_deref() == Some("Sunset")));
        assert_eq!(store.saved_nfts().await.len(), 1);
    }

    #[tokio::test]
    async fn later_editions_reuse_existing_uuid() {
        let (store, _) = store_with_collection("0xcafe").await;
        store
            .append_event(MintNft::TABLE, "0xm1", mint("0xcafe", 1, "ipfs://sunset"))
            .await;
        let sync = Synchronizer::new(
            MintReconciler::new(CountingFetcher::default()),
            100,
            EventBus::new(16),
        );
        assert!(sync.sync_all(&store).await.is_ok());

        store
            .append_event(MintNft::TABLE, "0xm2", mint("0xcafe", 2, "ipfs://sunset"))
            .await;
        store
            .append_event(MintNft::TABLE, "0xm3", mint("0xcafe", 3, "ipfs://other"))
            .await;
        assert!(sync.sync_all(&store).await.is_ok());

        let nfts = store.nfts().await;
        let uuid_of = |token_id: &str| {
            nfts.iter()
                .find(|n| n.token_id == token_id)
                .map(|n| n.edition_uuid)
        };
        assert!(uuid_of("1").is_some());
        assert_eq!(uuid_of("1"), uuid_of("2"));
        assert_ne!(uuid_of("1"), uuid_of("3"));
    }

    #[tokio::test]
    async fn redundant_mint_rows_insert_one_nft() {
        let (store, _) = store_with_collection("0xcafe").await;
        let first = store
            .append_event(MintNft::TABLE, "0xm1", mint("0xcafe", 1, "ipfs://sunset"))
            .await;
        let copy = store
            .append_event(MintNft::TABLE, "0xm1", mint("0xcafe", 1, "ipfs://sunset"))
            .await;
        let sync = Synchronizer::new(
            MintReconciler::new(CountingFetcher::default()),
            100,
            EventBus::new(16),
        );

        let Ok(report) = sync.sync_all(&store).await else {
            panic!("sync_all failed");
        };
        assert_eq!(report.applied, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(store.nfts().await.len(), 1);
        for id in [first, copy] {
            let processed = store.event(MintNft::TABLE, id).await.map(|e| e.processed);
            assert_eq!(processed, Some(true), "event {id}");
        }
    }

    #[tokio::test]
    async fn editions_across_ticks_consume_one_draft() {
        let (store, _) = store_with_collection("0xcafe").await;
        add_draft(&store, "ipfs://sunset").await;
        add_draft(&store, "ipfs://sunset").await;
        let sync = Synchronizer::new(
            MintReconciler::new(CountingFetcher::default()),
            100,
            EventBus::new(16),
        );

        store
            .append_event(MintNft::TABLE, "0xm1", mint("0xcafe", 1, "ipfs://sunset"))
            .await;
        assert!(sync.sync_all(&store).await.is_ok());
        assert_eq!(store.saved_nfts().await.len(), 1);

        store
            .append_event(MintNft::TABLE, "0xm2", mint("0xcafe", 2, "ipfs://sunset"))
            .await;
        assert!(sync.sync_all(&store).await.is_ok());
        assert_eq!(store.nfts().await.len(), 2);
        assert_eq!(store.saved_nfts().await.len(), 1);
    }

    #[tokio::test]
    async fn unknown_collection_leaves_mints_pending() {
        let (store, _) = store_with_collection("0xcafe").await;
        let id = store
            .append_event(MintNft::TABLE, "0xm1", mint("0xbeef", 1, "ipfs://x"))
            .await;
        let fetcher = CountingFetcher::default();
        let calls = Arc::clone(&fetcher.calls);
        let sync = Synchronizer::new(MintReconciler::new(fetcher), 100, EventBus::new(16));

        let Ok(report) = sync.sync_all(&store).await else {
            panic!("sync_all failed");
        };
        assert_eq!(report.unmatched, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(store.nfts().await.is_empty());
        let processed = store.event(MintNft::TABLE, id).await.map(|e| e.processed);
        assert_eq!(processed, Some(false));
    }

    #[tokio::test]
    async fn metadata_failure_is_transient() {
        let (store, _) = store_with_collection("0xcafe").await;
        add_draft(&store, "ipfs://x").await;
        let id = store
            .append_event(MintNft::TABLE, "0xm1", mint("0xcafe", 1, "ipfs://x"))
            .await;
        let fetcher = CountingFetcher {
            fail: true,
            ..CountingFetcher::default()
        };
        let sync = Synchronizer::new(MintReconciler::new(fetcher), 100, EventBus::new(16));

        let Ok(report) = sync.sync_all(&store).await else {
            panic!("sync_all failed");
        };
        assert_eq!(
            report,
            BatchReport {
                fetched: 1,
                failed: 1,
                ..BatchReport::default()
            }
        );
        assert!(store.nfts().await.is_empty());
        assert_eq!(store.saved_nfts().await.len(), 1);
        let processed = store.event(MintNft::TABLE, id).await.map(|e| e.processed);
        assert_eq!(processed, Some(false));
    }

    #[tokio::test]
    async fn grouping_separates_contracts_with_equal_uri() {
        let reconciler = MintReconciler::new(CountingFetcher::default());
        let store = MemoryStore::new();
        let mut events = Vec::new();
        for (contract, token_id) in [("0xa", 1), ("0xb", 1), ("0xA", 2)] {
            let id = store
                .append_event(MintNft::TABLE, "0xm", mint(contract, token_id, "ipfs://same"))
                .await;
            let Some(raw) = store.event(MintNft::TABLE, id).await else {
                panic!("event missing");
            };
            let Ok(event) = raw.decode::<MintNft>() else {
                panic!("decode failed");
            };
            events.push(event);
        }

        let units = reconciler.group(events);
        let sizes: Vec<usize> = units.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 1]);
    }
}
