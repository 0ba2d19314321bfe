//! Port traits. API boundaries for the hexagon.
//!
//! - Outbound: Called by application into infrastructure
//! - Store: persistent JSON documents
//! - Archive: downloaded history on disk

pub mod outbound;
pub mod store;

pub use outbound::{ArchiveRepo, TgClient, TgClientFactory};
pub use store::KvStore;
