//! # marketplace-reconciler
//!
//! Event reconciliation pipeline for an NFT marketplace backend.
//!
//! External ingesters append on-chain logs to one SQL table per event
//! type. This crate drains those tables: each event is correlated with the
//! mutable record it affects (auction, collection, NFT) and its state
//! transition is applied exactly once, in the same transaction that marks
//! the event processed. Events may arrive late, twice, or before the
//! record they refer to exists; unmatched events simply wait for a later
//! tick.
//!
//! ## Architecture
//!
//! ```text
//! Operators (HTTP, WebSocket)
//!     │
//!     ├── REST Handlers (api/)      ── trigger / status
//!     ├── WS Handler (ws/)          ◄── EventBus (domain/)
//!     │                                   ▲
//!     ├── ReconcileScheduler (scheduler/) │ DomainChange after commit
//!     │     └── Pipeline of Synchronizers (sync/)
//!     │           ├── Reconcilers: collection, mint, auction
//!     │           └── MetadataFetcher (metadata/)
//!     │
//!     └── Store (persistence/): PostgreSQL or in-memory
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod metadata;
pub mod persistence;
pub mod scheduler;
pub mod sync;
pub mod ws;
