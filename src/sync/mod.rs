//! Event synchronizers.
//!
//! A [`Synchronizer`] drains one event table. It owns the mechanics that
//! every event type shares: page through unprocessed rows, decode them,
//! split them into units of work, and run each unit in its own
//! transaction (lock, correlate, apply, mark processed, commit, notify).
//! What differs per event type lives behind the [`Reconciler`] trait.
//!
//! ```text
//! unprocessed rows ─decode─► EventRecord<P> ─group─► units
//!                                                     │
//!            ┌────────────────── per unit (one tx) ◄──┘
//!            ▼
//!   lock_event ─► correlate ─► apply ─► mark_processed ─► commit ─► EventBus
//!       │             │
//!   processed?     miss: commit nothing, retry next tick
//! ```

pub mod auction;
pub mod collection;
pub mod correlation;
pub mod mint;

use std::future::Future;

use futures_util::future::BoxFuture;
use serde::Serialize;

pub use correlation::CorrelationKey;

use crate::domain::{DomainChange, EventBus, EventPayload, EventRecord, RawEvent};
use crate::error::ReconcileError;
use crate::persistence::{Store, StoreResult, StoreTx};

/// Event-type-specific half of a synchronizer.
///
/// `correlate` must only read. `apply` performs the field-level transition
/// and returns the changes to announce once the transaction commits; it
/// must be a no-op for a target already in the post-transition state.
pub trait Reconciler: Send + Sync + 'static {
    /// Decoded event payload.
    type Payload: EventPayload;
    /// Record the event correlates with.
    type Target: Send;

    /// Splits a page of events into units of work. One event per unit
    /// unless overridden. Units must be non-empty.
    fn group(
        &self,
        events: Vec<EventRecord<Self::Payload>>,
    ) -> Vec<Vec<EventRecord<Self::Payload>>> {
        events.into_iter().map(|event| vec![event]).collect()
    }

    /// Key used to correlate `event`, for diagnostics.
    fn key(&self, event: &EventRecord<Self::Payload>) -> CorrelationKey;

    /// Looks up the record a unit refers to.
    fn correlate<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<Self::Payload>],
    ) -> impl Future<Output = StoreResult<Option<Self::Target>>> + Send;

    /// Applies the unit's transition to `target`.
    fn apply<T: StoreTx>(
        &self,
        tx: &mut T,
        unit: &[EventRecord<Self::Payload>],
        target: Self::Target,
    ) -> impl Future<Output = StoreResult<Vec<DomainChange>>> + Send;
}

/// Result of synchronizing one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The transition was applied and the events marked processed.
    Applied,
    /// No record correlated; nothing was written.
    Unmatched,
    /// Every event in the unit was already processed.
    AlreadyProcessed,
}

/// Counters for one [`Synchronizer::sync_all`] run.
///
/// `fetched` and decode failures count rows; the other counters count
/// units of work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct BatchReport {
    /// Unprocessed rows read.
    pub fetched: usize,
    /// Units whose transition was committed.
    pub applied: usize,
    /// Units left for a later tick because nothing correlated.
    pub unmatched: usize,
    /// Units skipped because another pass got there first.
    pub already_processed: usize,
    /// Rows that failed to decode plus units that errored.
    pub failed: usize,
}

/// Drains one event table through a [`Reconciler`].
#[derive(Debug)]
pub struct Synchronizer<R> {
    reconciler: R,
    page_size: u32,
    event_bus: EventBus,
}

impl<R: Reconciler> Synchronizer<R> {
    /// Creates a synchronizer fetching up to `page_size` rows per run.
    #[must_use]
    pub fn new(reconciler: R, page_size: u32, event_bus: EventBus) -> Self {
        Self {
            reconciler,
            page_size: page_size.max(1),
            event_bus,
        }
    }

    /// Returns the wrapped reconciler.
    #[must_use]
    pub fn reconciler(&self) -> &R {
        &self.reconciler
    }

    /// Synchronizes one unit of work in its own transaction.
    ///
    /// Events in the unit that are already processed are dropped from it
    /// after locking; the rest are correlated together.
    ///
    /// # Errors
    ///
    /// Returns the first store or metadata error. The transaction is
    /// rolled back and no change is published.
    pub async fn sync_unit<S: Store>(
        &self,
        store: &S,
        unit: &[EventRecord<R::Payload>],
    ) -> Result<SyncOutcome, ReconcileError> {
        let table = <R::Payload as EventPayload>::TABLE;
        let mut tx = store.begin().await?;

        let mut pending = Vec::with_capacity(unit.len());
        for event in unit {
            match tx.lock_event(table, event.id).await? {
                Some(false) => pending.push(event.clone()),
                Some(true) => {}
                None => {
                    return Err(ReconcileError::Persistence(format!(
                        "{table}#{} disappeared",
                        event.id
                    )));
                }
            }
        }
        let Some(first) = pending.first() else {
            return Ok(SyncOutcome::AlreadyProcessed);
        };

        let Some(target) = self.reconciler.correlate(&mut tx, &pending).await? else {
            tracing::warn!(
                event = <R::Payload as EventPayload>::NAME,
                event_id = first.id,
                events = pending.len(),
                key = %self.reconciler.key(first),
                "no matching record, will retry next tick"
            );
            tx.commit().await?;
            return Ok(SyncOutcome::Unmatched);
        };

        let changes = self.reconciler.apply(&mut tx, &pending, target).await?;
        for event in &pending {
            tx.mark_processed(table, event.id).await?;
        }
        tx.commit().await?;

        tracing::debug!(
            event = <R::Payload as EventPayload>::NAME,
            event_id = first.id,
            events = pending.len(),
            changes = changes.len(),
            "events reconciled"
        );
        for change in changes {
            self.event_bus.publish(change);
        }
        Ok(SyncOutcome::Applied)
    }

    /// Walks the whole unprocessed backlog, one page at a time.
    ///
    /// Pages are keyed on the last row ID seen, so rows left unprocessed
    /// earlier in the pass never hide newer ones. Per-row decode failures
    /// and per-unit errors are logged and counted; the rest of the backlog
    /// still runs.
    ///
    /// # Errors
    ///
    /// Returns an error only if a page cannot be read.
    pub async fn sync_all<S: Store>(&self, store: &S) -> Result<BatchReport, ReconcileError> {
        let table = <R::Payload as EventPayload>::TABLE;
        let page_len = usize::try_from(self.page_size).unwrap_or(usize::MAX);
        let mut report = BatchReport::default();
        let mut after_id = 0;

        loop {
            let rows = store.unprocessed(table, after_id, self.page_size).await?;
            let Some(last) = rows.last() else {
                break;
            };
            after_id = last.id;
            let short_page = rows.len() < page_len;
            self.sync_page(store, rows, &mut report).await;
            if short_page {
                break;
            }
        }

        if report.fetched > 0 {
            tracing::info!(
                event = <R::Payload as EventPayload>::NAME,
                fetched = report.fetched,
                applied = report.applied,
                unmatched = report.unmatched,
                failed = report.failed,
                "synchronizer run finished"
            );
        }
        Ok(report)
    }

    async fn sync_page<S: Store>(
        &self,
        store: &S,
        rows: Vec<RawEvent>,
        report: &mut BatchReport,
    ) {
        report.fetched += rows.len();

        let mut decoded = Vec::with_capacity(rows.len());
        for row in rows {
            match row.decode::<R::Payload>() {
                Ok(event) => decoded.push(event),
                Err(e) => {
                    tracing::error!(error = %e, "undecodable event left unprocessed");
                    report.failed += 1;
                }
            }
        }

        for unit in self.reconciler.group(decoded) {
            match self.sync_unit(store, &unit).await {
                Ok(SyncOutcome::Applied) => report.applied += 1,
                Ok(SyncOutcome::Unmatched) => report.unmatched += 1,
                Ok(SyncOutcome::AlreadyProcessed) => report.already_processed += 1,
                Err(e) => {
                    tracing::error!(
                        event = <R::Payload as EventPayload>::NAME,
                        event_ids = ?unit.iter().map(|event| event.id).collect::<Vec<_>>(),
                        error = %e,
                        "failed to reconcile events"
                    );
                    report.failed += 1;
                }
            }
        }
    }
}

/// One step of a reconciliation pass, erased over the event type.
pub trait Stage<S: Store>: Send + Sync {
    /// Name used in logs and pass reports.
    fn name(&self) -> &'static str;

    /// Runs the stage once against `store`.
    fn run<'a>(&'a self, store: &'a S) -> BoxFuture<'a, Result<BatchReport, ReconcileError>>;
}

impl<S: Store, R: Reconciler> Stage<S> for Synchronizer<R> {
    fn name(&self) -> &'static str {
        <R::Payload as EventPayload>::NAME
    }

    fn run<'a>(&'a self, store: &'a S) -> BoxFuture<'a, Result<BatchReport, ReconcileError>> {
        Box::pin(self.sync_all(store))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::auction::AuctionCreatedReconciler;
    use super::*;
    use crate::domain::events::AuctionCreated;
    use crate::domain::Auction;
    use crate::persistence::memory::MemoryStore;
    use serde_json::json;

    fn created_payload(auction_id: i64) -> serde_json::Value {
        json!({
            "auctionId": auction_id,
            "auctionOwner": "0xOwner",
            "numberOfSlots": 1,
            "startTime": 1_700_000_000,
            "endTime": 1_700_086_400,
        })
    }

    async fn decoded(store: &MemoryStore, id: i64) -> EventRecord<AuctionCreated> {
        let Some(raw) = store.event(AuctionCreated::TABLE, id).await else {
            panic!("event {id} missing");
        };
        let Ok(event) = RawEvent::decode::<AuctionCreated>(raw) else {
            panic!("event {id} undecodable");
        };
        event
    }

    fn synchronizer() -> Synchronizer<AuctionCreatedReconciler> {
        Synchronizer::new(AuctionCreatedReconciler, 100, EventBus::new(16))
    }

    #[tokio::test]
    async fn sync_unit_is_idempotent() {
        let store = MemoryStore::new();
        store.add_auction(Auction::pending(0, "Drop", "0xtx")).await;
        let id = store
            .append_event(AuctionCreated::TABLE, "0xtx", created_payload(9))
            .await;
        let event = decoded(&store, id).await;
        let sync = synchronizer();

        let first = sync.sync_unit(&store, std::slice::from_ref(&event)).await;
        assert_eq!(first.ok(), Some(SyncOutcome::Applied));
        let after_first = store.auctions().await;

        let second = sync.sync_unit(&store, std::slice::from_ref(&event)).await;
        assert_eq!(second.ok(), Some(SyncOutcome::AlreadyProcessed));
        assert_eq!(store.auctions().await, after_first);
    }

    #[tokio::test]
    async fn failed_commit_rolls_back_and_publishes_nothing() {
        let store = MemoryStore::new();
        store.add_auction(Auction::pending(0, "Drop", "0xtx")).await;
        let id = store
            .append_event(AuctionCreated::TABLE, "0xtx", created_payload(9))
            .await;
        let event = decoded(&store, id).await;
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sync = Synchronizer::new(AuctionCreatedReconciler, 100, bus);

        store.fail_next_commit();
        assert!(sync.sync_unit(&store, &[event]).await.is_err());

        let auctions = store.auctions().await;
        let Some(auction) = auctions.first() else {
            panic!("auction missing");
        };
        assert!(!auction.on_chain);
        assert_eq!(auction.on_chain_id, None);
        let processed = store.event(AuctionCreated::TABLE, id).await.map(|e| e.processed);
        assert_eq!(processed, Some(false));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn sync_all_counts_decode_failures_and_continues() {
        let store = MemoryStore::new();
        store.add_auction(Auction::pending(0, "Drop", "0xgood")).await;
        let bad = store
            .append_event(AuctionCreated::TABLE, "0xbad", json!({ "auctionId": "x" }))
            .await;
        let good = store
            .append_event(AuctionCreated::TABLE, "0xgood", created_payload(3))
            .await;
        let unmatched = store
            .append_event(AuctionCreated::TABLE, "0xnobody", created_payload(4))
            .await;

        let Ok(report) = synchronizer().sync_all(&store).await else {
            panic!("sync_all failed");
        };
        assert_eq!(
            report,
            BatchReport {
                fetched: 3,
                applied: 1,
                unmatched: 1,
                already_processed: 0,
                failed: 1,
            }
        );
        for (id, processed) in [(bad, false), (good, true), (unmatched, false)] {
            let flag = store.event(AuctionCreated::TABLE, id).await.map(|e| e.processed);
            assert_eq!(flag, Some(processed), "event {id}");
        }
    }

    #[tokio::test]
    async fn unmatched_rows_do_not_hide_later_pages() {
        let store = MemoryStore::new();
        store.add_auction(Auction::pending(0, "Drop", "0xlate")).await;
        for hash in ["0xnobody", "0xnoone", "0xnothing"] {
            store
                .append_event(AuctionCreated::TABLE, hash, created_payload(1))
                .await;
        }
        let matched = store
            .append_event(AuctionCreated::TABLE, "0xlate", created_payload(2))
            .await;
        let sync = Synchronizer::new(AuctionCreatedReconciler, 2, EventBus::new(16));

        let Ok(report) = sync.sync_all(&store).await else {
            panic!("sync_all failed");
        };
        assert_eq!(report.fetched, 4);
        assert_eq!(report.unmatched, 3);
        assert_eq!(report.applied, 1);
        let processed = store
            .event(AuctionCreated::TABLE, matched)
            .await
            .map(|e| e.processed);
        assert_eq!(processed, Some(true));
    }

    #[tokio::test]
    async fn applied_changes_are_published_after_commit() {
        let store = MemoryStore::new();
        let auction_id = store.add_auction(Auction::pending(0, "Drop", "0xtx")).await;
        store
            .append_event(AuctionCreated::TABLE, "0xtx", created_payload(12))
            .await;
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let sync = Synchronizer::new(AuctionCreatedReconciler, 100, bus);

        assert!(sync.sync_all(&store).await.is_ok());
        let Ok(DomainChange::AuctionConfirmed {
            auction_id: changed,
            on_chain_id,
            ..
        }) = rx.try_recv()
        else {
            panic!("expected an auction_confirmed change");
        };
        assert_eq!(changed, auction_id);
        assert_eq!(on_chain_id, 12);
    }

    #[tokio::test]
    async fn stage_name_is_the_event_name() {
        let sync = synchronizer();
        let stage: &dyn Stage<MemoryStore> = &sync;
        assert_eq!(stage.name(), "auction_created");
        let store = MemoryStore::new();
        assert_eq!(stage.run(&store).await.ok(), Some(BatchReport::default()));
    }
}
