//! `DeployCollection` → [`NftCollection`].
//!
//! A deploy event creates the collection row unless one already exists for
//! the address. If the user left a minting draft for the deployment
//! transaction, its presentation fields are merged in and the draft is
//! consumed. This correlation never misses.

use chrono::Utc;

use super::{CorrelationKey, Reconciler};
use crate::domain::events::DeployCollection;
use crate::domain::{DomainChange, EventRecord, MintingCollection, NewNftCollection, NftCollection};
use crate::persistence::{StoreResult, StoreTx};

/// What a deploy event resolves to.
#[derive(Debug)]
pub enum CollectionTarget {
    /// The collection was already created; only mark the event processed.
    Existing(NftCollection),
    /// No collection yet; create it, consuming the draft if any.
    New(Option<MintingCollection>),
}

/// Reconciler for [`DeployCollection`] events.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployCollectionReconciler;

impl Reconciler for DeployCollectionReconciler {
    type Payload = DeployCollection;
    type Target = CollectionTarget;

    fn key(&self, event: &EventRecord<DeployCollection>) -> CorrelationKey {
        CorrelationKey::ContractAddress(event.data.contract_address.clone())
    }

    async fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<DeployCollection>],
    ) -> StoreResult<Option<CollectionTarget>> {
        let Some(event) = unit.first() else {
            return Ok(None);
        };
        if let Some(existing) = tx.collection_by_address(&event.data.contract_address).await? {
            return Ok(Some(CollectionTarget::Existing(existing)));
        }
        let draft = tx.minting_collection_by_tx_hash(&event.tx_hash).await?;
        Ok(Some(CollectionTarget::New(draft)))
    }

    async fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<DeployCollection>],
        target: CollectionTarget,
    ) -> StoreResult<Vec<DomainChange>> {
        let Some(event) = unit.first() else {
            return Ok(Vec::new());
        };
        let draft = match target {
            CollectionTarget::Existing(existing) => {
                tracing::debug!(
                    collection_id = existing.id,
                    address = %existing.address,
                    "collection already recorded"
                );
                return Ok(Vec::new());
            }
            CollectionTarget::New(draft) => draft,
        };

        let (short_url, cover_url, description) = match &draft {
            Some(d) => (d.short_url.clone(), d.cover_url.clone(), d.description.clone()),
            None => (None, None, None),
        };
        let collection = tx
            .insert_collection(&NewNftCollection {
                address: event.data.contract_address.clone(),
                owner: event.data.owner.clone(),
                name: event.data.token_name.clone(),
                symbol: event.data.token_symbol.clone(),
                short_url,
                cover_url,
                description,
                tx_hash: event.tx_hash.clone(),
            })
            .await?;
        if let Some(draft) = draft {
            tx.delete_minting_collection(draft.id).await?;
        }

        tracing::info!(
            collection_id = collection.id,
            address = %collection.address,
            "collection deployed"
        );
        Ok(vec![DomainChange::CollectionDeployed {
            collection_id: collection.id,
            address: collection.address,
            owner: collection.owner,
            timestamp: Utc::now(),
        }])
    }
}
