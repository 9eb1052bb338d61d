// ============================================================================
// storefront_sync
// ============================================================================
//
// Optimistic favorites/cart state for a storefront client. A collection keeps
// an in-process mirror of the signed-in owner's rows, applies mutations to it
// immediately, and confirms or rolls them back against a hosted row store.

pub mod core;
pub mod remote;
pub mod session;
pub mod sync;

pub use crate::core::{
    CollectionPhase, DisplayFields, ItemDraft, RemoteRowId, Result, SyncError, TrackedItem,
};
pub use crate::remote::{InMemoryRemoteStore, RemoteStore, RestRemoteStore, RestStoreConfig, StoreOp};
pub use crate::session::{BindingAction, IdentityEvent, SessionBinding};
pub use crate::sync::{
    CollectionBuilder, CollectionChange, CollectionEvent, LoadOutcome, MutationOutcome, Notifier,
    OptimisticCollection, PendingLoad, PendingMutation,
};

/// Collection name used for favorites.
pub const FAVORITES: &str = "favorites";

/// Collection name used for the cart before checkout.
pub const CART: &str = "cart";
