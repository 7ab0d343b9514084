//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::domain::EventBus;
use crate::scheduler::ReconcilerHandle;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Reconciliation scheduler, erased over its store.
    pub reconciler: Arc<dyn ReconcilerHandle>,
    /// Event bus for WebSocket subscriptions.
    pub event_bus: EventBus,
}
