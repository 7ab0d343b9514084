//! WebSocket layer: connection handling, message routing, subscriptions.
//!
//! The WebSocket endpoint at `/ws` streams committed [`crate::domain::DomainChange`]s
//! to clients, filtered by the record kinds each client subscribed to.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
