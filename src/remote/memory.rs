use super::{RemoteStore, StoreOp};
use crate::core::{ItemDraft, Result, SyncError, TrackedItem};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use tokio::sync::{Mutex, watch};

#[derive(Default)]
struct CallCounters {
    list: AtomicUsize,
    upsert: AtomicUsize,
    remove: AtomicUsize,
    remove_all: AtomicUsize,
}

impl CallCounters {
    fn slot(&self, op: StoreOp) -> &AtomicUsize {
        match op {
            StoreOp::List => &self.list,
            StoreOp::Upsert => &self.upsert,
            StoreOp::Remove => &self.remove,
            StoreOp::RemoveAll => &self.remove_all,
        }
    }
}

struct Shared {
    rows: Mutex<HashMap<String, Vec<TrackedItem>>>,
    faults: std::sync::Mutex<HashMap<StoreOp, SyncError>>,
    calls: CallCounters,
    next_row: AtomicU64,
    gate: watch::Sender<bool>,
}

/// An in-memory implementation of `RemoteStore`.
///
/// Rows are kept per owner in insertion order. Faults can be injected per
/// operation, and `pause` holds every call at the gate until `resume`, which
/// lets callers observe state while remote calls are in flight.
#[derive(Clone)]
pub struct InMemoryRemoteStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                rows: Mutex::new(HashMap::new()),
                faults: std::sync::Mutex::new(HashMap::new()),
                calls: CallCounters::default(),
                next_row: AtomicU64::new(1),
                gate,
            }),
        }
    }
}

impl InMemoryRemoteStore {
    /// Creates a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts rows for `owner_id` directly, bypassing gate and faults.
    pub async fn seed(&self, owner_id: &str, drafts: Vec<ItemDraft>) {
        let mut rows = self.shared.rows.lock().await;
        let owned = rows.entry(owner_id.to_string()).or_default();
        for draft in drafts {
            let row_id = self.next_row_id();
            owned.retain(|row| row.item_id != draft.item_id);
            owned.push(TrackedItem::persisted(owner_id, draft, row_id));
        }
    }

    /// Current rows of `owner_id`, in insertion order.
    pub async fn rows(&self, owner_id: &str) -> Vec<TrackedItem> {
        let rows = self.shared.rows.lock().await;
        rows.get(owner_id).cloned().unwrap_or_default()
    }

    /// Item ids of `owner_id`, in insertion order.
    pub async fn item_ids(&self, owner_id: &str) -> Vec<String> {
        self.rows(owner_id)
            .await
            .into_iter()
            .map(|row| row.item_id)
            .collect()
    }

    /// Makes every subsequent `op` fail with `RemoteUnavailable` until healed.
    pub fn fail(&self, op: StoreOp) {
        self.fail_with(op, SyncError::RemoteUnavailable(format!("injected {} failure", op)));
    }

    pub fn fail_with(&self, op: StoreOp, error: SyncError) {
        self.faults().insert(op, error);
    }

    pub fn heal(&self, op: StoreOp) {
        self.faults().remove(&op);
    }

    /// Number of calls issued for `op`, including failed and held ones.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.shared.calls.slot(op).load(Ordering::SeqCst)
    }

    /// Holds every subsequent call at the gate.
    pub fn pause(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Releases held calls.
    pub fn resume(&self) {
        self.shared.gate.send_replace(false);
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, HashMap<StoreOp, SyncError>> {
        self.shared
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn next_row_id(&self) -> String {
        format!("row-{}", self.shared.next_row.fetch_add(1, Ordering::SeqCst))
    }

    async fn enter(&self, op: StoreOp) -> Result<()> {
        self.shared.calls.slot(op).fetch_add(1, Ordering::SeqCst);

        let mut gate = self.shared.gate.subscribe();
        let released = gate.wait_for(|paused| !*paused).await.is_ok();
        if !released {
            return Err(SyncError::RemoteUnavailable("store gate closed".to_string()));
        }

        match self.faults().get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn list(&self, owner_id: &str) -> Result<Vec<TrackedItem>> {
        self.enter(StoreOp::List).await?;
        Ok(self.rows(owner_id).await)
    }

    async fn upsert(&self, owner_id: &str, item: &ItemDraft) -> Result<String> {
        self.enter(StoreOp::Upsert).await?;
        let mut rows = self.shared.rows.lock().await;
        let owned = rows.entry(owner_id.to_string()).or_default();

        if let Some(existing) = owned.iter_mut().find(|row| row.item_id == item.item_id) {
            existing.fields = item.fields.clone();
            existing.quantity = item.quantity;
            return existing
                .remote_row_id
                .assigned()
                .map(str::to_string)
                .ok_or_else(|| SyncError::Conflict(format!("row for '{}' has no id", item.item_id)));
        }

        let row_id = self.next_row_id();
        owned.push(TrackedItem::persisted(owner_id, item.clone(), row_id.clone()));
        Ok(row_id)
    }

    async fn remove(&self, owner_id: &str, item_id: &str) -> Result<bool> {
        self.enter(StoreOp::Remove).await?;
        let mut rows = self.shared.rows.lock().await;
        let Some(owned) = rows.get_mut(owner_id) else {
            return Ok(false);
        };
        let before = owned.len();
        owned.retain(|row| row.item_id != item_id);
        Ok(owned.len() != before)
    }

    async fn remove_all(&self, owner_id: &str) -> Result<bool> {
        self.enter(StoreOp::RemoveAll).await?;
        let mut rows = self.shared.rows.lock().await;
        Ok(rows.remove(owner_id).is_some_and(|owned| !owned.is_empty()))
    }
}
