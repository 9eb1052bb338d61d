//! Optimistic State Controller and its building blocks.

pub mod controller;
pub mod lanes;
pub mod mirror;
pub mod notify;

pub use controller::{
    CollectionBuilder, LoadOutcome, MutationOutcome, OptimisticCollection, PendingLoad,
    PendingMutation,
};
pub use mirror::{Mirror, MirrorEntry};
pub use notify::{CollectionChange, CollectionEvent, Notifier};
