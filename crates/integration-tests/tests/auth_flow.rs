//! Sign-in and sign-out flows across both stores.
//!
//! These tests drive the session store and observe the cart store
//! reacting over the backend's auth-event channel, the same path a
//! hosted backend's notifications would take.

use std::time::Duration;

use bramble_core::NewCartItem;
use bramble_integration_tests::TestShop;
use bramble_storefront::backend::Backend;
use bramble_storefront::{AuthEvent, AuthEventKind, CartSnapshot};

const EVENT_WAIT: Duration = Duration::from_secs(2);

async fn wait_for_cart(
    rx: &mut tokio::sync::watch::Receiver<CartSnapshot>,
    mut pred: impl FnMut(&CartSnapshot) -> bool,
) {
    tokio::time::timeout(EVENT_WAIT, rx.wait_for(|snapshot| pred(snapshot)))
        .await
        .expect("cart did not reach expected state in time")
        .expect("cart watch channel closed");
}

#[tokio::test]
async fn test_sign_in_refetches_cart_wholesale() {
    let shop = TestShop::new().await;
    let product = shop.seed_product("p1", 1999);

    // Rows left over from a previous login on another device
    let email = bramble_core::Email::parse("shopper@example.com").expect("valid email");
    let user = shop.backend.register_account(&email, "pw123456");
    shop.backend
        .insert_cart_item(NewCartItem {
            user_id: user.id,
            product_id: product.id,
            quantity: 3,
        })
        .await
        .expect("seed row");

    assert_eq!(shop.app.cart().item_count(), 0);

    let mut cart_rx = shop.app.cart().subscribe();
    shop.app
        .session()
        .sign_in("shopper@example.com", "pw123456")
        .await
        .expect("sign in");

    wait_for_cart(&mut cart_rx, |s| s.item_count() == 3).await;
    assert!(shop.app.session().identity().is_some());
    assert!(shop.app.cart().cached_product(product.id).is_some());
}

#[tokio::test]
async fn test_sign_out_wipes_cart_locally_without_remote_delete() {
    let shop = TestShop::new().await;
    let p1 = shop.seed_product("p1", 500);
    let p2 = shop.seed_product("p2", 700);
    let user = shop
        .register_and_sign_in("shopper@example.com")
        .await
        .expect("sign in");

    shop.app.cart().add_to_cart(p1.id, 2).await.expect("add p1");
    shop.app.cart().add_to_cart(p2.id, 1).await.expect("add p2");
    assert_eq!(shop.app.cart().item_count(), 3);
    let deletes_before = shop.backend.delete_calls();

    let mut cart_rx = shop.app.cart().subscribe();
    shop.app.session().sign_out().await.expect("sign out");

    wait_for_cart(&mut cart_rx, |s| s.items.is_empty() && s.products.is_empty()).await;
    assert!(shop.app.session().identity().is_none());
    // The rows survive server-side for the next login
    assert_eq!(shop.backend.delete_calls(), deletes_before);
    assert_eq!(shop.backend.stored_cart_items(user.id).len(), 2);
}

#[tokio::test]
async fn test_cart_returns_on_next_sign_in() {
    let shop = TestShop::new().await;
    let p1 = shop.seed_product("p1", 1200);
    shop.register_and_sign_in("shopper@example.com")
        .await
        .expect("sign in");

    shop.app.cart().add_to_cart(p1.id, 2).await.expect("add");

    let mut cart_rx = shop.app.cart().subscribe();
    shop.app.session().sign_out().await.expect("sign out");
    wait_for_cart(&mut cart_rx, |s| s.items.is_empty()).await;

    shop.app
        .session()
        .sign_in("shopper@example.com", "pw123456")
        .await
        .expect("sign in again");

    wait_for_cart(&mut cart_rx, |s| s.item_count() == 2).await;
    assert!(shop.app.cart().cached_product(p1.id).is_some());
}

#[tokio::test]
async fn test_token_refresh_leaves_both_stores_alone() {
    let shop = TestShop::new().await;
    let p1 = shop.seed_product("p1", 900);
    let user = shop
        .register_and_sign_in("shopper@example.com")
        .await
        .expect("sign in");

    shop.app.cart().add_to_cart(p1.id, 2).await.expect("add");

    let mut session_rx = shop.app.session().subscribe();
    shop.backend.push_event(AuthEvent {
        kind: AuthEventKind::TokenRefreshed,
        session: None,
    });
    // Follow with a real event so there is something to wait on
    shop.backend.push_event(AuthEvent::signed_out());

    tokio::time::timeout(EVENT_WAIT, session_rx.wait_for(|s| s.identity.is_none()))
        .await
        .expect("session did not observe sign-out")
        .expect("session watch channel closed");

    // The refresh itself changed nothing; only the sign-out did
    assert_eq!(shop.backend.stored_cart_items(user.id).len(), 1);
}
