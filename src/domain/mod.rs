//! Domain layer: event log payloads, mutable records, and change fan-out.
//!
//! This module contains the reconciler's data model: the immutable events
//! captured by external ingesters, the business records reconciliation
//! writes into, the checksum-insensitive [`Address`] type, and the event
//! bus that broadcasts committed changes.

pub mod address;
pub mod change;
pub mod event_bus;
pub mod events;
pub mod records;

pub use address::Address;
pub use change::{DomainChange, RecordKind};
pub use event_bus::EventBus;
pub use events::{EventPayload, EventRecord, RawEvent};
pub use records::{
    Auction, MintingCollection, NewNft, NewNftCollection, Nft, NftCollection, RewardTierNft,
    SavedNft,
};
