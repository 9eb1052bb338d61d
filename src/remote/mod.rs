//! Remote Store Adapter: collection operations against the persistence boundary.
//!
//! Implementations perform no retries; failures are returned as-is.

pub mod config;
pub mod memory;
pub mod rest;

use crate::core::{ItemDraft, Result, TrackedItem};
use async_trait::async_trait;
use std::fmt;

pub use config::RestStoreConfig;
pub use memory::InMemoryRemoteStore;
pub use rest::RestRemoteStore;

/// Row store scoped by owner identity.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Lists all rows owned by `owner_id`.
    async fn list(&self, owner_id: &str) -> Result<Vec<TrackedItem>>;

    /// Inserts or updates the row for `(owner_id, item.item_id)` and returns its row id.
    ///
    /// Calling twice with the same key updates rather than duplicates.
    async fn upsert(&self, owner_id: &str, item: &ItemDraft) -> Result<String>;

    /// Deletes one row. Returns whether a row existed.
    async fn remove(&self, owner_id: &str, item_id: &str) -> Result<bool>;

    /// Deletes every row owned by `owner_id`. Returns whether any row existed.
    async fn remove_all(&self, owner_id: &str) -> Result<bool>;
}

/// Operation kinds, used for call accounting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Upsert,
    Remove,
    RemoveAll,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => write!(f, "list"),
            Self::Upsert => write!(f, "upsert"),
            Self::Remove => write!(f, "remove"),
            Self::RemoveAll => write!(f, "remove_all"),
        }
    }
}
