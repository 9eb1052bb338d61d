use super::lanes::{Confirmation, Lanes, Tail, Ticket, is_released};
use super::mirror::{Mirror, MirrorEntry};
use super::notify::{CollectionChange, CollectionEvent, Notifier, dispatch};
use crate::core::{CollectionPhase, ItemDraft, Result, SyncError, TrackedItem};
use crate::remote::RemoteStore;
use futures::future::{self, BoxFuture, FutureExt, join_all};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{Instrument, Level, event, info_span};

/// Handle on the remote half of a mutation. The mirror change has already
/// happened when this is returned, and the remote call settles whether or not
/// the handle is awaited.
pub type PendingMutation = BoxFuture<'static, Result<MutationOutcome>>;

/// Handle on the remote half of `attach`.
pub type PendingLoad = BoxFuture<'static, LoadOutcome>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Added,
    /// `add` of an item already in the mirror; no remote call was made.
    AlreadyPresent,
    Removed,
    /// `remove` of an item not in the mirror; no remote call was made.
    NotPresent,
    QuantityChanged,
    /// `set_quantity` to the current quantity; no remote call was made.
    Unchanged,
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize },
    /// `list` failed; the collection is ready with an empty mirror.
    FailedOpen { error: SyncError },
    /// The owner changed before `list` returned; the result was dropped.
    Superseded,
}

struct CollectionState {
    phase: CollectionPhase,
    owner_id: Option<String>,
    epoch: u64,
    next_token: u64,
    mirror: Mirror,
    lanes: Lanes,
    /// Calls still running from earlier sessions, keyed by the owner they target.
    retired: Vec<(String, Tail)>,
}

impl CollectionState {
    fn new() -> Self {
        Self {
            phase: CollectionPhase::Uninitialized,
            owner_id: None,
            epoch: 0,
            next_token: 0,
            mirror: Mirror::new(),
            lanes: Lanes::new(),
            retired: Vec::new(),
        }
    }

    fn ready_owner(&self) -> Result<String> {
        match (&self.phase, &self.owner_id) {
            (CollectionPhase::Ready, Some(owner_id)) => Ok(owner_id.clone()),
            _ => Err(SyncError::NotReady(self.phase)),
        }
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    /// Drops everything tied to the current owner and starts a new epoch.
    fn rebind(&mut self, owner_id: Option<String>, phase: CollectionPhase) {
        self.epoch += 1;
        let outstanding = self.lanes.reset();
        self.retired.retain(|(_, tail)| !is_released(tail));
        if let Some(previous) = self.owner_id.take() {
            self.retired
                .extend(outstanding.into_iter().map(|tail| (previous.clone(), tail)));
        }
        self.owner_id = owner_id;
        self.phase = phase;
        self.mirror.clear();
    }

    /// Unfinished calls an earlier session issued against `owner_id`.
    fn retired_calls(&self, owner_id: &str) -> Vec<Tail> {
        self.retired
            .iter()
            .filter(|(owner, _)| owner == owner_id)
            .map(|(_, tail)| tail.clone())
            .collect()
    }
}

/// Identifies one issued remote call.
#[derive(Clone)]
struct Issued {
    owner_id: String,
    epoch: u64,
    token: u64,
}

struct Inner {
    name: String,
    store: Arc<dyn RemoteStore>,
    notifier: Option<Arc<dyn Notifier>>,
    state: Mutex<CollectionState>,
    revision: watch::Sender<u64>,
}

/// Builder for [`OptimisticCollection`].
pub struct CollectionBuilder {
    name: String,
    store: Arc<dyn RemoteStore>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl CollectionBuilder {
    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn build(self) -> OptimisticCollection {
        let (revision, _) = watch::channel(0);
        OptimisticCollection {
            inner: Arc::new(Inner {
                name: self.name,
                store: self.store,
                notifier: self.notifier,
                state: Mutex::new(CollectionState::new()),
                revision,
            }),
        }
    }
}

/// In-memory mirror of one owner's remote collection (favorites, cart).
///
/// Mutations apply to the mirror when they are called and return a
/// [`PendingMutation`] carrying the remote call. If the remote call fails, the
/// item goes back to the last state the store confirmed. Remote calls for the
/// same item reach the store in the order the mutations were issued, and only
/// the newest one settles the mirror.
///
/// Cloning yields another handle to the same collection.
#[derive(Clone)]
pub struct OptimisticCollection {
    inner: Arc<Inner>,
}

impl OptimisticCollection {
    pub fn new(name: impl Into<String>, store: Arc<dyn RemoteStore>) -> Self {
        Self::builder(name, store).build()
    }

    pub fn builder(name: impl Into<String>, store: Arc<dyn RemoteStore>) -> CollectionBuilder {
        CollectionBuilder {
            name: name.into(),
            store,
            notifier: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn phase(&self) -> CollectionPhase {
        self.state().phase
    }

    pub fn owner_id(&self) -> Option<String> {
        self.state().owner_id.clone()
    }

    /// Mirror content in insertion order.
    pub fn items(&self) -> Vec<TrackedItem> {
        self.state().mirror.items()
    }

    pub fn get(&self, item_id: &str) -> Option<TrackedItem> {
        self.state().mirror.get(item_id).map(|entry| entry.item.clone())
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.state().mirror.contains(item_id)
    }

    pub fn len(&self) -> usize {
        self.state().mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().mirror.is_empty()
    }

    /// Sum of `price * quantity` over the mirror.
    pub fn total(&self) -> f64 {
        self.items().iter().map(TrackedItem::subtotal).sum()
    }

    /// Number of items with remote calls still outstanding.
    pub fn in_flight(&self) -> usize {
        self.state().lanes.in_flight()
    }

    /// Whether no remote call is outstanding.
    pub fn is_idle(&self) -> bool {
        self.state().lanes.is_idle()
    }

    /// Revision counter bumped on every mirror change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    /// Binds `owner_id`, empties the mirror and enters `Loading`.
    ///
    /// The returned future lists the owner's rows once every call an earlier
    /// session issued for the same owner has finished. A failed list still ends
    /// in `Ready` with an empty mirror.
    pub fn attach(&self, owner_id: &str) -> PendingLoad {
        let owner_id = owner_id.to_string();
        let (epoch, retired) = {
            let mut state = self.state();
            state.rebind(Some(owner_id.clone()), CollectionPhase::Loading);
            (state.epoch, state.retired_calls(&owner_id))
        };
        self.bump();

        let span = info_span!("collection.load", collection = %self.inner.name, owner_id = %owner_id);
        let this = self.clone();
        let load = async move {
            if !retired.is_empty() {
                event!(Level::DEBUG, calls = retired.len(), "waiting for calls from the previous session");
                join_all(retired).await;
                let superseded = this.state().epoch != epoch;
                if superseded {
                    return LoadOutcome::Superseded;
                }
            }

            let listed = this.inner.store.list(&owner_id).await;

            let mut state = this.state();
            if state.epoch != epoch {
                event!(Level::DEBUG, "load superseded by a newer session");
                return LoadOutcome::Superseded;
            }

            state.phase = CollectionPhase::Ready;
            let outcome = match listed {
                Ok(items) => {
                    let items = items
                        .into_iter()
                        .map(|mut item| {
                            item.owner_id = owner_id.clone();
                            item
                        })
                        .collect();
                    state.mirror.replace_all(items);
                    event!(Level::DEBUG, count = state.mirror.len(), "collection loaded");
                    LoadOutcome::Loaded {
                        count: state.mirror.len(),
                    }
                }
                Err(error) => {
                    event!(Level::WARN, error = %error, "load failed; continuing with an empty collection");
                    LoadOutcome::FailedOpen { error }
                }
            };
            drop(state);
            this.bump();
            outcome
        }
        .instrument(span)
        .boxed();
        launch(load, |err| LoadOutcome::FailedOpen {
            error: SyncError::RemoteUnavailable(format!("load task failed: {}", err)),
        })
    }

    /// Unbinds the owner and empties the mirror without touching the remote store.
    ///
    /// Returns whether an owner was bound. Late completions of calls issued
    /// before this point are ignored.
    pub fn detach(&self) -> bool {
        let was_bound = {
            let mut state = self.state();
            let was_bound = state.owner_id.is_some();
            state.rebind(None, CollectionPhase::Uninitialized);
            was_bound
        };
        self.bump();
        was_bound
    }

    /// Adds `draft` to the mirror, then upserts it remotely.
    pub fn add(&self, draft: ItemDraft) -> PendingMutation {
        let mut state = self.state();
        self.begin_add(&mut state, draft)
    }

    /// Removes `item_id` from the mirror, then deletes it remotely.
    pub fn remove(&self, item_id: &str) -> PendingMutation {
        let mut state = self.state();
        self.begin_remove(&mut state, item_id)
    }

    /// Removes the item if present, adds it otherwise. Decided against the mirror as of this call.
    pub fn toggle(&self, draft: ItemDraft) -> PendingMutation {
        let mut state = self.state();
        if state.mirror.contains(&draft.item_id) {
            self.begin_remove(&mut state, &draft.item_id)
        } else {
            self.begin_add(&mut state, draft)
        }
    }

    /// Changes the quantity of a cart line. Zero removes the line.
    pub fn set_quantity(&self, item_id: &str, quantity: u32) -> PendingMutation {
        let mut state = self.state();
        if quantity == 0 {
            return self.begin_remove(&mut state, item_id);
        }

        let owner_id = match state.ready_owner() {
            Ok(owner_id) => owner_id,
            Err(err) => return Self::settled(Err(err)),
        };
        let Some(prior) = state.mirror.get(item_id).cloned() else {
            return Self::settled(Err(SyncError::Rejected(format!(
                "item '{}' is not in {}",
                item_id, self.inner.name
            ))));
        };
        if prior.item.quantity == quantity {
            return Self::settled(Ok(MutationOutcome::Unchanged));
        }

        let token = state.issue_token();
        state.mirror.update(item_id, |item| item.quantity = quantity);
        let updated = MirrorEntry {
            seq: prior.seq,
            item: TrackedItem {
                quantity,
                ..prior.item.clone()
            },
        };
        let ticket = state.lanes.enqueue(item_id, token, Some(prior));
        let issued = Issued {
            owner_id,
            epoch: state.epoch,
            token,
        };
        drop(state);
        self.bump();

        let span = info_span!(
            "collection.set_quantity",
            collection = %self.inner.name,
            item_id = %item_id,
            quantity
        );
        let this = self.clone();
        let item_id = item_id.to_string();
        let remote = async move {
            let draft = updated.item.draft();
            let call = this.inner.store.upsert(&issued.owner_id, &draft);
            this.run_ordered(ticket, &issued, &item_id, call, |row_id| {
                Confirmation::Present(updated.confirmed(row_id))
            })
            .await?;
            this.notify(&issued, CollectionChange::QuantityChanged { item_id, quantity });
            Ok(MutationOutcome::QuantityChanged)
        }
        .instrument(span)
        .boxed();
        launch(remote, lost_mutation)
    }

    /// Empties the mirror, then deletes every row of the owner remotely.
    ///
    /// On failure every item not touched since is restored.
    pub fn clear(&self) -> PendingMutation {
        let mut state = self.state();
        let owner_id = match state.ready_owner() {
            Ok(owner_id) => owner_id,
            Err(err) => return Self::settled(Err(err)),
        };

        let token = state.issue_token();
        let snapshot = state.mirror.take();
        let mut ticket = state.lanes.enqueue_all(token, &snapshot);
        let issued = Issued {
            owner_id,
            epoch: state.epoch,
            token,
        };
        drop(state);
        self.bump();

        let span = info_span!("collection.clear", collection = %self.inner.name, items = snapshot.len());
        let this = self.clone();
        let remote = async move {
            ticket.wait_turn().await;
            let result = this.inner.store.remove_all(&issued.owner_id).await;
            this.settle_all(&issued, &result);
            ticket.release();

            result?;
            this.notify(&issued, CollectionChange::Cleared);
            Ok(MutationOutcome::Cleared)
        }
        .instrument(span)
        .boxed();
        launch(remote, lost_mutation)
    }

    fn begin_add(&self, state: &mut CollectionState, draft: ItemDraft) -> PendingMutation {
        if let Err(err) = draft.validate() {
            return Self::settled(Err(err));
        }
        let owner_id = match state.ready_owner() {
            Ok(owner_id) => owner_id,
            Err(err) => return Self::settled(Err(err)),
        };
        if state.mirror.contains(&draft.item_id) {
            return Self::settled(Ok(MutationOutcome::AlreadyPresent));
        }

        let token = state.issue_token();
        let entry = state
            .mirror
            .insert(TrackedItem::pending(owner_id.clone(), draft.clone()));
        let ticket = state.lanes.enqueue(&draft.item_id, token, None);
        let issued = Issued {
            owner_id,
            epoch: state.epoch,
            token,
        };
        self.bump();

        let span = info_span!("collection.add", collection = %self.inner.name, item_id = %draft.item_id);
        let this = self.clone();
        let remote = async move {
            let call = this.inner.store.upsert(&issued.owner_id, &draft);
            this.run_ordered(ticket, &issued, &draft.item_id, call, |row_id| {
                Confirmation::Present(entry.confirmed(row_id))
            })
            .await?;
            this.notify(
                &issued,
                CollectionChange::Added {
                    item_id: draft.item_id.clone(),
                    name: draft.fields.name.clone(),
                },
            );
            Ok(MutationOutcome::Added)
        }
        .instrument(span)
        .boxed();
        launch(remote, lost_mutation)
    }

    fn begin_remove(&self, state: &mut CollectionState, item_id: &str) -> PendingMutation {
        let owner_id = match state.ready_owner() {
            Ok(owner_id) => owner_id,
            Err(err) => return Self::settled(Err(err)),
        };
        let Some(prior) = state.mirror.remove(item_id) else {
            return Self::settled(Ok(MutationOutcome::NotPresent));
        };

        let token = state.issue_token();
        let ticket = state.lanes.enqueue(item_id, token, Some(prior));
        let issued = Issued {
            owner_id,
            epoch: state.epoch,
            token,
        };
        self.bump();

        let span = info_span!("collection.remove", collection = %self.inner.name, item_id = %item_id);
        let this = self.clone();
        let item_id = item_id.to_string();
        let remote = async move {
            let call = this.inner.store.remove(&issued.owner_id, &item_id);
            this.run_ordered(ticket, &issued, &item_id, call, |_| Confirmation::Absent)
                .await?;
            this.notify(&issued, CollectionChange::Removed { item_id });
            Ok(MutationOutcome::Removed)
        }
        .instrument(span)
        .boxed();
        launch(remote, lost_mutation)
    }

    /// Waits for the item's turn, drives `call`, settles the mirror and releases the lane.
    ///
    /// `call` must not have been polled yet.
    async fn run_ordered<T>(
        &self,
        mut ticket: Ticket,
        issued: &Issued,
        item_id: &str,
        call: impl Future<Output = Result<T>>,
        confirm: impl FnOnce(&T) -> Confirmation,
    ) -> Result<T> {
        ticket.wait_turn().await;
        let result = call.await;
        let confirmation = match &result {
            Ok(value) => confirm(value),
            Err(_) => Confirmation::Unchanged,
        };
        self.settle(issued, item_id, confirmation, result.as_ref().err());
        ticket.release();
        result
    }

    fn settle(
        &self,
        issued: &Issued,
        item_id: &str,
        confirmation: Confirmation,
        failure: Option<&SyncError>,
    ) {
        let mut state = self.state();
        if state.epoch != issued.epoch {
            event!(Level::DEBUG, "completion from a previous session ignored");
            return;
        }

        let Some(settled) = state.lanes.finish(item_id, issued.token, confirmation) else {
            event!(Level::DEBUG, "stale completion; a newer call owns the item");
            return;
        };
        let changed = state.mirror.set(item_id, settled);
        drop(state);

        if let Some(err) = failure {
            event!(Level::WARN, error = %err, "remote call failed; item rolled back");
        }
        if changed {
            self.bump();
        }
    }

    fn settle_all(&self, issued: &Issued, result: &Result<bool>) {
        let mut state = self.state();
        if state.epoch != issued.epoch {
            event!(Level::DEBUG, "completion from a previous session ignored");
            return;
        }

        let mut changed = false;
        for (item_id, settled) in state.lanes.finish_all(issued.token, result.is_ok()) {
            changed |= state.mirror.set(&item_id, settled);
        }
        drop(state);

        if let Err(err) = result {
            event!(Level::WARN, error = %err, "remote clear failed; items restored");
        }
        if changed {
            self.bump();
        }
    }

    fn notify(&self, issued: &Issued, change: CollectionChange) {
        if let Some(notifier) = &self.inner.notifier {
            let event = CollectionEvent::new(&self.inner.name, &issued.owner_id, change);
            dispatch(Arc::clone(notifier), event);
        }
    }

    fn settled(result: Result<MutationOutcome>) -> PendingMutation {
        future::ready(result).boxed()
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|revision| *revision += 1);
    }

    fn state(&self) -> MutexGuard<'_, CollectionState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs `work` as its own task, so it settles the mirror even if the returned
/// handle is dropped. Outside a runtime the work runs when the handle is awaited.
fn launch<T: Send + 'static>(
    work: BoxFuture<'static, T>,
    lost: impl FnOnce(JoinError) -> T + Send + 'static,
) -> BoxFuture<'static, T> {
    let Ok(runtime) = Handle::try_current() else {
        event!(Level::DEBUG, "no async runtime; remote call deferred until awaited");
        return work;
    };
    let task = runtime.spawn(work);
    async move { task.await.unwrap_or_else(lost) }.boxed()
}

fn lost_mutation(err: JoinError) -> Result<MutationOutcome> {
    Err(SyncError::RemoteUnavailable(format!(
        "mutation task failed: {}",
        err
    )))
}
