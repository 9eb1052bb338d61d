//! Session Binding: turns identity changes into collection lifecycle calls.

use crate::sync::{LoadOutcome, OptimisticCollection};
use futures::future::{self, BoxFuture, FutureExt, join_all};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{Level, event};

/// Notification from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityEvent {
    SignedIn { owner_id: String },
    SignedOut,
}

impl IdentityEvent {
    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self::SignedIn {
            owner_id: owner_id.into(),
        }
    }
}

/// What the binding did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingAction {
    /// A new owner was bound; one load outcome per collection, in binding order.
    Reloaded {
        owner_id: String,
        outcomes: Vec<LoadOutcome>,
    },
    /// The owner was unbound and every mirror emptied.
    Cleared,
    /// Repeated or meaningless event; nothing happened.
    Ignored,
}

/// Keeps a set of collections bound to the signed-in owner.
#[derive(Default)]
pub struct SessionBinding {
    collections: Vec<OptimisticCollection>,
    owner_id: Option<String>,
}

impl SessionBinding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection to follow identity changes.
    pub fn bind(mut self, collection: OptimisticCollection) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn collections(&self) -> &[OptimisticCollection] {
        &self.collections
    }

    pub fn current_owner(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Applies `event` and waits for any reload it started.
    pub async fn handle(&mut self, event: IdentityEvent) -> BindingAction {
        self.apply(event).await
    }

    /// Processes `events` until the stream ends.
    ///
    /// Lifecycle changes happen as soon as an event arrives; reloads run
    /// concurrently with the next events, and a reload overtaken by a later
    /// event is discarded by the collection.
    pub async fn run<S>(&mut self, mut events: S)
    where
        S: Stream<Item = IdentityEvent> + Unpin,
    {
        let mut reloads = FuturesUnordered::new();
        loop {
            tokio::select! {
                next = events.next() => match next {
                    Some(event) => reloads.push(self.apply(event)),
                    None => break,
                },
                Some(_) = reloads.next(), if !reloads.is_empty() => {}
            }
        }
        while reloads.next().await.is_some() {}
    }

    /// Performs the synchronous part of `event`. The returned future finishes the reload, if any.
    fn apply(&mut self, identity: IdentityEvent) -> BoxFuture<'static, BindingAction> {
        match identity {
            IdentityEvent::SignedIn { owner_id } => {
                if owner_id.trim().is_empty() {
                    event!(Level::WARN, "ignoring sign-in without an owner id");
                    return future::ready(BindingAction::Ignored).boxed();
                }
                if self.owner_id.as_deref() == Some(owner_id.as_str()) {
                    event!(Level::DEBUG, owner_id = %owner_id, "repeated sign-in ignored");
                    return future::ready(BindingAction::Ignored).boxed();
                }

                event!(Level::INFO, owner_id = %owner_id, collections = self.collections.len(), "binding session");
                self.owner_id = Some(owner_id.clone());
                let loads: Vec<_> = self
                    .collections
                    .iter()
                    .map(|collection| collection.attach(&owner_id))
                    .collect();

                async move {
                    BindingAction::Reloaded {
                        owner_id,
                        outcomes: join_all(loads).await,
                    }
                }
                .boxed()
            }
            IdentityEvent::SignedOut => {
                let was_bound = self.owner_id.take().is_some();
                for collection in &self.collections {
                    collection.detach();
                }
                if !was_bound {
                    return future::ready(BindingAction::Ignored).boxed();
                }
                event!(Level::INFO, "session unbound; collections cleared");
                future::ready(BindingAction::Cleared).boxed()
            }
        }
    }
}
