use crate::core::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A confirmed change to a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollectionChange {
    Added { item_id: String, name: String },
    Removed { item_id: String },
    QuantityChanged { item_id: String, quantity: u32 },
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionEvent {
    pub collection: String,
    pub owner_id: String,
    pub change: CollectionChange,
    pub at: DateTime<Utc>,
}

impl CollectionEvent {
    pub fn new(collection: &str, owner_id: &str, change: CollectionChange) -> Self {
        Self {
            collection: collection.to_string(),
            owner_id: owner_id.to_string(),
            change,
            at: Utc::now(),
        }
    }
}

/// Receives collection changes after the remote store confirmed them.
///
/// Delivery is best-effort: errors are logged and never reach the caller of the mutation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: CollectionEvent) -> Result<()>;
}

/// Spawns delivery on the current runtime without waiting for it.
pub(crate) fn dispatch(notifier: Arc<dyn Notifier>, event: CollectionEvent) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        warn!(
            "no async runtime available; dropping {} notification for '{}'",
            event.collection, event.owner_id
        );
        return;
    };

    runtime.spawn(async move {
        let collection = event.collection.clone();
        if let Err(err) = notifier.notify(event).await {
            warn!("{} notification failed: {}", collection, err);
        }
    });
}
