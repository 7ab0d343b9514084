//! Per-connection subscription manager.
//!
//! Tracks which record kinds a WebSocket client is subscribed to and
//! provides server-side change filtering.

use std::collections::HashSet;

use crate::domain::RecordKind;

/// Manages the set of record-kind subscriptions for a single WebSocket
/// connection.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// Subscribed kinds. If `subscribe_all` is true, this set is ignored.
    kinds: HashSet<RecordKind>,
    /// Whether the client subscribes to all kinds (wildcard `"*"`).
    subscribe_all: bool,
}

impl SubscriptionManager {
    /// Creates a new empty subscription manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds kinds to the subscription set. `wildcard` enables `"*"`.
    pub fn subscribe(&mut self, kinds: &[RecordKind], wildcard: bool) {
        if wildcard {
            self.subscribe_all = true;
        }
        self.kinds.extend(kinds.iter().copied());
    }

    /// Removes kinds from the subscription set. `wildcard` clears
    /// everything, including the wildcard itself.
    pub fn unsubscribe(&mut self, kinds: &[RecordKind], wildcard: bool) {
        if wildcard {
            self.subscribe_all = false;
            self.kinds.clear();
            return;
        }
        for kind in kinds {
            self.kinds.remove(kind);
        }
    }

    /// Returns `true` if changes of `kind` pass the filter.
    #[must_use]
    pub fn matches(&self, kind: RecordKind) -> bool {
        self.subscribe_all || self.kinds.contains(&kind)
    }

    /// Returns the number of explicitly subscribed kinds.
    #[must_use]
    pub fn count(&self) -> usize {
        self.kinds.len()
    }

    /// Returns `true` if the wildcard subscription is active.
    #[must_use]
    pub fn is_subscribed_all(&self) -> bool {
        self.subscribe_all
    }
}
