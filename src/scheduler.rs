//! Periodic reconciliation passes with a single-flight guard.
//!
//! A pass runs every [`Stage`] of a [`Pipeline`] in order. At most one pass
//! is in flight per scheduler: a tick that finds the guard taken is
//! dropped, not queued. A stage error aborts the rest of the pass; the
//! next tick starts over from the first stage.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::time::MissedTickBehavior;

use crate::domain::EventBus;
use crate::metadata::MetadataFetcher;
use crate::persistence::Store;
use crate::sync::auction::{
    AuctionCanceledReconciler, AuctionCreatedReconciler, AuctionFinalizedReconciler,
    Erc721DepositedReconciler,
};
use crate::sync::collection::DeployCollectionReconciler;
use crate::sync::mint::MintReconciler;
use crate::sync::{BatchReport, Stage, Synchronizer};

/// Ordered list of stages making up one pass.
pub struct Pipeline<S> {
    stages: Vec<Box<dyn Stage<S>>>,
}

impl<S: Store> Pipeline<S> {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Stage<S> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Builds the marketplace pipeline.
    ///
    /// Collections run before mints and confirmations before deposits and
    /// terminal flags, so one pass usually resolves a whole dependency
    /// chain. Correctness does not depend on the order.
    #[must_use]
    pub fn standard<F: MetadataFetcher + 'static>(
        fetcher: F,
        page_size: u32,
        event_bus: &EventBus,
    ) -> Self {
        Self::new()
            .with_stage(Synchronizer::new(
                DeployCollectionReconciler,
                page_size,
                event_bus.clone(),
            ))
            .with_stage(Synchronizer::new(
                MintReconciler::new(fetcher),
                page_size,
                event_bus.clone(),
            ))
            .with_stage(Synchronizer::new(
                AuctionCreatedReconciler,
                page_size,
                event_bus.clone(),
            ))
            .with_stage(Synchronizer::new(
                Erc721DepositedReconciler,
                page_size,
                event_bus.clone(),
            ))
            .with_stage(Synchronizer::new(
                AuctionCanceledReconciler,
                page_size,
                event_bus.clone(),
            ))
            .with_stage(Synchronizer::new(
                AuctionFinalizedReconciler,
                page_size,
                event_bus.clone(),
            ))
    }

    /// Stage names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

impl<S: Store> Default for Pipeline<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> fmt::Debug for Pipeline<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

/// Report of one stage within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct StageReport {
    /// Stage name (the event type it drains).
    pub stage: String,
    /// Counters for the stage's run.
    pub report: BatchReport,
}

/// Report of a completed pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct PassReport {
    /// When the pass acquired the guard.
    pub started_at: DateTime<Utc>,
    /// When the last stage returned.
    pub finished_at: DateTime<Utc>,
    /// Per-stage counters, in execution order.
    pub stages: Vec<StageReport>,
}

/// Result of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A pass was already in flight; nothing ran.
    Skipped,
    /// Every stage ran.
    Completed(PassReport),
    /// A stage failed and the remaining stages were not run.
    Failed {
        /// Failing stage.
        stage: String,
        /// Error message.
        error: String,
    },
}

/// Observable scheduler state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct SchedulerStatus {
    /// Whether a pass is in flight right now.
    pub running: bool,
    /// Passes that ran every stage.
    pub passes_completed: u64,
    /// Passes aborted by a stage error.
    pub passes_failed: u64,
    /// Ticks dropped because a pass was in flight.
    pub ticks_skipped: u64,
    /// Start of the most recent pass.
    pub last_started_at: Option<DateTime<Utc>>,
    /// End of the most recent pass.
    pub last_finished_at: Option<DateTime<Utc>>,
    /// Report of the most recent completed pass.
    pub last_report: Option<PassReport>,
    /// Error of the most recent failed pass, cleared by the next success.
    pub last_error: Option<String>,
}

/// Object-safe view of a scheduler for the HTTP layer.
pub trait ReconcilerHandle: Send + Sync + fmt::Debug {
    /// Runs one pass now, subject to the single-flight guard.
    fn trigger(&self) -> BoxFuture<'_, TickOutcome>;

    /// Returns a snapshot of the scheduler state.
    fn status(&self) -> BoxFuture<'_, SchedulerStatus>;
}

/// Drives a [`Pipeline`] against a store.
pub struct ReconcileScheduler<S> {
    store: S,
    pipeline: Pipeline<S>,
    guard: Mutex<()>,
    running: AtomicBool,
    status: RwLock<SchedulerStatus>,
}

/// Clears the running flag when the pass ends, including by unwinding.
struct RunningFlag<'a>(&'a AtomicBool);

impl<'a> RunningFlag<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RunningFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<S: Store> ReconcileScheduler<S> {
    /// Creates a scheduler for `pipeline` over `store`.
    #[must_use]
    pub fn new(store: S, pipeline: Pipeline<S>) -> Self {
        Self {
            store,
            pipeline,
            guard: Mutex::new(()),
            running: AtomicBool::new(false),
            status: RwLock::new(SchedulerStatus::default()),
        }
    }

    /// Runs one pass unless another is in flight.
    pub async fn tick(&self) -> TickOutcome {
        let Ok(_in_flight) = self.guard.try_lock() else {
            self.status.write().await.ticks_skipped += 1;
            tracing::debug!("reconciliation pass in flight, tick skipped");
            return TickOutcome::Skipped;
        };

        let _running = RunningFlag::raise(&self.running);

        let started_at = Utc::now();
        self.status.write().await.last_started_at = Some(started_at);
        let outcome = self.run_pass(started_at).await;

        let mut status = self.status.write().await;
        status.last_finished_at = Some(Utc::now());
        match &outcome {
            TickOutcome::Completed(report) => {
                status.passes_completed += 1;
                status.last_report = Some(report.clone());
                status.last_error = None;
            }
            TickOutcome::Failed { stage, error } => {
                status.passes_failed += 1;
                status.last_error = Some(format!("{stage}: {error}"));
            }
            TickOutcome::Skipped => {}
        }
        outcome
    }

    async fn run_pass(&self, started_at: DateTime<Utc>) -> TickOutcome {
        let mut stages = Vec::with_capacity(self.pipeline.stages.len());
        for stage in &self.pipeline.stages {
            match stage.run(&self.store).await {
                Ok(report) => stages.push(StageReport {
                    stage: stage.name().to_string(),
                    report,
                }),
                Err(e) => {
                    tracing::error!(
                        stage = stage.name(),
                        error = %e,
                        "reconciliation pass aborted"
                    );
                    return TickOutcome::Failed {
                        stage: stage.name().to_string(),
                        error: e.to_string(),
                    };
                }
            }
        }
        TickOutcome::Completed(PassReport {
            started_at,
            finished_at: Utc::now(),
            stages,
        })
    }

    /// Returns a snapshot of the scheduler state.
    pub async fn status(&self) -> SchedulerStatus {
        let mut status = self.status.read().await.clone();
        status.running = self.running.load(Ordering::SeqCst);
        status
    }

    /// Ticks every `period` until `shutdown` flips to `true` or its sender
    /// is dropped.
    ///
    /// Each tick runs on its own task so the timer keeps firing while a
    /// pass is in flight; overlapping ticks are dropped by the guard.
    pub async fn run(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            interval_secs = period.as_secs(),
            stages = ?self.pipeline.names(),
            "reconciliation scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let scheduler = Arc::clone(&self);
                    tokio::spawn(async move {
                        scheduler.tick().await;
                    });
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciliation scheduler stopped");
    }
}

impl<S: Store> fmt::Debug for ReconcileScheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileScheduler")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl<S: Store> ReconcilerHandle for ReconcileScheduler<S> {
    fn trigger(&self) -> BoxFuture<'_, TickOutcome> {
        Box::pin(self.tick())
    }

    fn status(&self) -> BoxFuture<'_, SchedulerStatus> {
        Box::pin(ReconcileScheduler::status(self))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;
    use crate::error::ReconcileError;
    use crate::metadata::TokenMetadata;
    use crate::persistence::memory::MemoryStore;

    /// Counts runs and, when gated, parks until released.
    #[derive(Debug, Default)]
    struct CountingStage {
        calls: Arc<AtomicUsize>,
        gate: Option<(Arc<Notify>, Arc<Notify>)>,
    }

    impl Stage<MemoryStore> for CountingStage {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn run<'a>(
            &'a self,
            _store: &'a MemoryStore,
        ) -> BoxFuture<'a, Result<BatchReport, ReconcileError>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if let Some((entered, release)) = &self.gate {
                    entered.notify_one();
                    release.notified().await;
                }
                Ok(BatchReport::default())
            })
        }
    }

    #[derive(Debug)]
    struct FailingStage;

    impl Stage<MemoryStore> for FailingStage {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run<'a>(
            &'a self,
            _store: &'a MemoryStore,
        ) -> BoxFuture<'a, Result<BatchReport, ReconcileError>> {
            Box::pin(async { Err(ReconcileError::Persistence("connection reset".to_string())) })
        }
    }

    #[derive(Debug)]
    struct NoMetadata;

    impl MetadataFetcher for NoMetadata {
        async fn fetch(&self, _token_uri: &str) -> Result<TokenMetadata, ReconcileError> {
            Ok(TokenMetadata::default())
        }
    }

    #[tokio::test]
    async fn overlapping_ticks_run_the_pass_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let stage = CountingStage {
            calls: Arc::clone(&calls),
            gate: Some((Arc::clone(&entered), Arc::clone(&release))),
        };
        let scheduler = Arc::new(ReconcileScheduler::new(
            MemoryStore::new(),
            Pipeline::new().with_stage(stage),
        ));

        let first = tokio::spawn({
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.tick().await }
        });
        entered.notified().await;

        assert_eq!(scheduler.tick().await, TickOutcome::Skipped);
        assert_eq!(scheduler.tick().await, TickOutcome::Skipped);
        assert!(scheduler.status().await.running);

        release.notify_one();
        let Ok(TickOutcome::Completed(report)) = first.await else {
            panic!("first tick did not complete");
        };
        assert_eq!(report.stages.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let status = scheduler.status().await;
        assert!(!status.running);
        assert_eq!(status.passes_completed, 1);
        assert_eq!(status.ticks_skipped, 2);
    }

    #[tokio::test]
    async fn failing_stage_aborts_pass_and_releases_guard() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = ReconcileScheduler::new(
            MemoryStore::new(),
            Pipeline::new().with_stage(FailingStage).with_stage(CountingStage {
                calls: Arc::clone(&calls),
                gate: None,
            }),
        );

        let TickOutcome::Failed { stage, error } = scheduler.tick().await else {
            panic!("expected a failed pass");
        };
        assert_eq!(stage, "failing");
        assert!(error.contains("connection reset"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(matches!(scheduler.tick().await, TickOutcome::Failed { .. }));
        let status = scheduler.status().await;
        assert_eq!(status.passes_failed, 2);
        assert_eq!(status.ticks_skipped, 0);
        assert!(status.last_error.is_some());
    }

    #[tokio::test]
    async fn standard_pipeline_order() {
        let pipeline: Pipeline<MemoryStore> =
            Pipeline::standard(NoMetadata, 50, &EventBus::new(16));
        assert_eq!(
            pipeline.names(),
            vec![
                "deploy_collection",
                "mint_nft",
                "auction_created",
                "erc721_deposited",
                "auction_canceled",
                "auction_finalized",
            ]
        );
    }

    #[test]
    fn debug_lists_stage_names() {
        let pipeline: Pipeline<MemoryStore> =
            Pipeline::standard(NoMetadata, 50, &EventBus::new(16));
        let scheduler = ReconcileScheduler::new(MemoryStore::new(), pipeline);
        let rendered = format!("{scheduler:?}");
        assert!(rendered.starts_with("ReconcileScheduler"), "{rendered}");
        assert!(rendered.contains("\"mint_nft\""), "{rendered}");
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = Arc::new(ReconcileScheduler::new(
            MemoryStore::new(),
            Pipeline::new().with_stage(CountingStage {
                calls: Arc::clone(&calls),
                gate: None,
            }),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&scheduler).run(Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(tx.send(true).is_ok());
        assert!(handle.await.is_ok());
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
