/// Session binding tests
///
/// Identity events driving collection attach/detach.
/// Run with: cargo test --test session_binding_tests

use std::sync::Arc;
use storefront_sync::{
    BindingAction, CART, CollectionPhase, DisplayFields, FAVORITES, IdentityEvent,
    InMemoryRemoteStore, ItemDraft, LoadOutcome, OptimisticCollection, SessionBinding, StoreOp,
};

fn ring() -> ItemDraft {
    ItemDraft::new("p1", DisplayFields::new("Pearl Ring", 120.0))
}

fn bound(store: &InMemoryRemoteStore) -> (SessionBinding, OptimisticCollection) {
    let favorites = OptimisticCollection::new(FAVORITES, Arc::new(store.clone()));
    let binding = SessionBinding::new().bind(favorites.clone());
    (binding, favorites)
}

#[tokio::test]
async fn test_sign_in_loads_remote_rows() {
    let store = InMemoryRemoteStore::new();
    store.seed("u1", vec![ring()]).await;
    let (mut binding, favorites) = bound(&store);

    let action = binding.handle(IdentityEvent::signed_in("u1")).await;
    assert_eq!(
        action,
        BindingAction::Reloaded {
            owner_id: "u1".to_string(),
            outcomes: vec![LoadOutcome::Loaded { count: 1 }],
        }
    );

    let items = favorites.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].owner_id, "u1");
    assert_eq!(items[0].item_id, "p1");
    assert_eq!(items[0].fields.name, "Pearl Ring");
    assert_eq!(items[0].fields.price, 120.0);
    assert!(items[0].is_confirmed());
    assert_eq!(binding.current_owner(), Some("u1"));
}

#[tokio::test]
async fn test_repeated_sign_in_is_ignored() {
    let store = InMemoryRemoteStore::new();
    let (mut binding, favorites) = bound(&store);

    binding.handle(IdentityEvent::signed_in("u1")).await;
    favorites.add(ring()).await.unwrap();

    let action = binding.handle(IdentityEvent::signed_in("u1")).await;
    assert_eq!(action, BindingAction::Ignored);
    assert_eq!(store.calls(StoreOp::List), 1);
    assert!(favorites.contains("p1"));
}

#[tokio::test]
async fn test_sign_out_clears_mirror_only() {
    let store = InMemoryRemoteStore::new();
    store.seed("u1", vec![ring()]).await;
    let (mut binding, favorites) = bound(&store);
    binding.handle(IdentityEvent::signed_in("u1")).await;

    assert_eq!(
        binding.handle(IdentityEvent::SignedOut).await,
        BindingAction::Cleared
    );
    assert!(favorites.is_empty());
    assert_eq!(favorites.phase(), CollectionPhase::Uninitialized);
    assert_eq!(binding.current_owner(), None);

    assert_eq!(store.calls(StoreOp::Remove), 0);
    assert_eq!(store.calls(StoreOp::RemoveAll), 0);
    assert_eq!(store.item_ids("u1").await, vec!["p1".to_string()]);

    assert_eq!(
        binding.handle(IdentityEvent::SignedOut).await,
        BindingAction::Ignored
    );
}

#[tokio::test]
async fn test_switching_owner_replaces_mirror() {
    let store = InMemoryRemoteStore::new();
    store.seed("u1", vec![ring()]).await;
    store
        .seed("u2", vec![ItemDraft::new("p9", DisplayFields::new("Silver Chain", 45.0))])
        .await;
    let (mut binding, favorites) = bound(&store);

    binding.handle(IdentityEvent::signed_in("u1")).await;
    binding.handle(IdentityEvent::signed_in("u2")).await;

    let items = favorites.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_id, "p9");
    assert_eq!(items[0].owner_id, "u2");
    assert_eq!(favorites.owner_id().as_deref(), Some("u2"));
}

#[tokio::test]
async fn test_blank_owner_is_ignored() {
    let store = InMemoryRemoteStore::new();
    let (mut binding, favorites) = bound(&store);

    let action = binding.handle(IdentityEvent::signed_in("  ")).await;
    assert_eq!(action, BindingAction::Ignored);
    assert_eq!(favorites.phase(), CollectionPhase::Uninitialized);
    assert_eq!(store.calls(StoreOp::List), 0);
}

#[tokio::test]
async fn test_every_bound_collection_follows_identity() {
    let favorites_store = InMemoryRemoteStore::new();
    let cart_store = InMemoryRemoteStore::new();
    favorites_store.seed("u1", vec![ring()]).await;
    cart_store.seed("u1", vec![ring().with_quantity(2)]).await;
    cart_store.fail(StoreOp::List);

    let favorites = OptimisticCollection::new(FAVORITES, Arc::new(favorites_store.clone()));
    let cart = OptimisticCollection::new(CART, Arc::new(cart_store.clone()));
    let mut binding = SessionBinding::new()
        .bind(favorites.clone())
        .bind(cart.clone());
    assert_eq!(binding.collections().len(), 2);

    let BindingAction::Reloaded { outcomes, .. } =
        binding.handle(IdentityEvent::signed_in("u1")).await
    else {
        panic!("sign-in should reload");
    };
    assert_eq!(outcomes[0], LoadOutcome::Loaded { count: 1 });
    assert!(matches!(outcomes[1], LoadOutcome::FailedOpen { .. }));
    assert_eq!(cart.phase(), CollectionPhase::Ready);
    assert!(cart.is_empty());

    binding.handle(IdentityEvent::SignedOut).await;
    assert!(favorites.is_empty());
    assert!(cart.is_empty());
}

#[tokio::test]
async fn test_run_processes_event_stream() {
    let store = InMemoryRemoteStore::new();
    store.seed("u1", vec![ring()]).await;
    store
        .seed("u2", vec![ItemDraft::new("p9", DisplayFields::new("Silver Chain", 45.0))])
        .await;
    let (mut binding, favorites) = bound(&store);

    let events = futures::stream::iter(vec![
        IdentityEvent::signed_in("u1"),
        IdentityEvent::signed_in("u1"),
        IdentityEvent::SignedOut,
        IdentityEvent::signed_in("u2"),
    ]);
    binding.run(events).await;

    assert_eq!(binding.current_owner(), Some("u2"));
    assert_eq!(favorites.phase(), CollectionPhase::Ready);
    let ids: Vec<String> = favorites.items().into_iter().map(|item| item.item_id).collect();
    assert_eq!(ids, vec!["p9"]);
    // The repeated sign-in did not trigger a second load for u1.
    assert_eq!(store.calls(StoreOp::List), 2);
}
