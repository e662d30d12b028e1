use super::*;
use crate::error::ErrorCode;
use crate::hub::Subscription;
use crate::state::test_helpers::{Fixture, fixture};
use crate::store::ChatStore;

fn purchase(fx: &Fixture, intent: &str) -> PlaceOrder {
    PlaceOrder {
        farmer_id: fx.farmer.id,
        product_id: fx.product.id,
        quantity: 3,
        amount_cents: 1_500,
        payment_intent_id: intent.into(),
    }
}

fn drain(sub: &mut Subscription) -> Vec<Outbound> {
    let mut events = Vec::new();
    while let Ok(event) = sub.rx.try_recv() {
        events.push(event);
    }
    events
}

async fn pending_order(fx: &Fixture) -> Order {
    place_order(&fx.state, &fx.customer, purchase(fx, "pi_test_1")).await.unwrap().0
}

// =============================================================================
// place_order
// =============================================================================

#[tokio::test]
async fn placing_an_order_links_existing_room_and_moves_to_pending() {
    let fx = fixture().await;
    let (order, room) = place_order(&fx.state, &fx.customer, purchase(&fx, "pi_abc")).await.unwrap();

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(room.id, fx.room.id, "exact-product room is reused");
    assert_eq!(room.order_id, Some(order.id));
    assert_eq!(room.order_status, OrderStatus::Pending);
    assert_eq!(room.quantity, 3);

    let history = fx.store.messages(room.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].body.contains(&format!("Order #{}", order.id)));
}

#[tokio::test]
async fn placing_an_order_for_a_new_product_opens_room_with_intro() {
    let fx = fixture().await;
    let eggs = fx.store.seed_product("Duck Eggs", fx.farmer.id);
    let mut req = purchase(&fx, "pi_eggs");
    req.product_id = eggs.id;
    req.quantity = 1;

    let (_, room) = place_order(&fx.state, &fx.customer, req).await.unwrap();
    assert_ne!(room.id, fx.room.id);

    let history = fx.store.messages(room.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[0].body.contains("I've just purchased 1 unit of Duck Eggs"));
    assert_eq!(room.order_status, OrderStatus::Pending, "intro does not reset a linked room");
}

#[tokio::test]
async fn duplicate_intent_and_bad_requests_are_rejected() {
    let fx = fixture().await;
    pending_order(&fx).await;

    let eggs = fx.store.seed_product("Duck Eggs", fx.farmer.id);
    let mut reused = purchase(&fx, "pi_test_1");
    reused.product_id = eggs.id;
    let dup = place_order(&fx.state, &fx.customer, reused).await.unwrap_err();
    assert!(matches!(dup, OrderError::Store(StoreError::Conflict(_))));

    let blank = place_order(&fx.state, &fx.customer, purchase(&fx, "  ")).await.unwrap_err();
    assert!(matches!(blank, OrderError::InvalidRequest(_)));

    let other_farmer = fx.store.seed_user("Flo");
    let mut req = purchase(&fx, "pi_wrong_farmer");
    req.farmer_id = other_farmer.id;
    assert!(matches!(
        place_order(&fx.state, &fx.customer, req).await,
        Err(OrderError::InvalidRequest(_))
    ));
}

#[tokio::test]
async fn second_order_waits_for_the_first_to_complete() {
    let fx = fixture().await;
    let first = pending_order(&fx).await;
    ship(&fx.state, first.id, &fx.farmer).await.unwrap();

    let refused = place_order(&fx.state, &fx.customer, purchase(&fx, "pi_second")).await.unwrap_err();
    assert!(matches!(refused, OrderError::OrderInProgress { order_id, .. } if order_id == first.id));
    assert_eq!(refused.status(), axum::http::StatusCode::CONFLICT);

    let room = fx.store.room_by_id(fx.room.id).await.unwrap().unwrap();
    assert_eq!(room.order_id, Some(first.id));
    assert_eq!(room.order_status, OrderStatus::Shipped);

    // The first order still narrates into its room.
    let mut sub = fx.state.hub.subscribe(&fx.room.room_key, fx.farmer.id);
    let before = fx.store.messages(fx.room.id).await.unwrap().len();
    confirm_receipt(&fx.state, first.id, &fx.customer).await.unwrap();
    assert_eq!(fx.store.messages(fx.room.id).await.unwrap().len(), before + 1);
    assert!(drain(&mut sub).iter().any(|e| matches!(
        e,
        Outbound::OrderStatusUpdate { status: OrderStatus::Delivered, .. }
    )));

    confirm_payment(&fx.state, first.id, &fx.customer).await.unwrap();
    let (second, room) = place_order(&fx.state, &fx.customer, purchase(&fx, "pi_second")).await.unwrap();
    assert_eq!(room.id, fx.room.id, "a finished room is reused");
    assert_eq!(room.order_id, Some(second.id));
    assert_eq!(second.status, OrderStatus::Pending);
}

// =============================================================================
// strict transitions
// =============================================================================

#[tokio::test]
async fn farmer_ships_pending_order() {
    let fx = fixture().await;
    let order = pending_order(&fx).await;
    let before = fx.store.message_count(fx.room.id);
    let mut sub = fx.state.hub.subscribe(&fx.room.room_key, fx.customer.id);

    let shipped = ship(&fx.state, order.id, &fx.farmer).await.unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);

    let room = fx.store.room_by_id(fx.room.id).await.unwrap().unwrap();
    assert_eq!(room.order_status, OrderStatus::Shipped);
    assert_eq!(fx.store.message_count(fx.room.id), before + 1);

    let events = drain(&mut sub);
    assert!(events.iter().any(|e| matches!(
        e,
        Outbound::Message { message, sender_id, .. } if message.contains("shipped") && *sender_id == fx.farmer.id
    )));
    assert!(events.contains(&Outbound::OrderStatusUpdate {
        room_id: fx.room.room_key.clone(),
        status: OrderStatus::Shipped,
        updated_by: fx.farmer.id,
        updated_by_name: "Fern Farmer".into(),
    }));
}

#[tokio::test]
async fn out_of_order_actions_fail_without_state_change() {
    let fx = fixture().await;
    let order = pending_order(&fx).await;
    let messages = fx.store.message_count(fx.room.id);

    let err = confirm_receipt(&fx.state, order.id, &fx.customer).await.unwrap_err();
    assert!(matches!(
        err,
        OrderError::InvalidTransition { from: OrderStatus::Pending, to: OrderStatus::Delivered }
    ));

    ship(&fx.state, order.id, &fx.farmer).await.unwrap();
    let err = ship(&fx.state, order.id, &fx.farmer).await.unwrap_err();
    assert!(matches!(err, OrderError::InvalidTransition { from: OrderStatus::Shipped, .. }));

    let stored = fx.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Shipped);
    assert_eq!(fx.store.message_count(fx.room.id), messages + 1);
}

#[tokio::test]
async fn only_the_permitted_party_may_act() {
    let fx = fixture().await;
    let order = pending_order(&fx).await;

    assert!(matches!(ship(&fx.state, order.id, &fx.customer).await, Err(OrderError::Forbidden { .. })));
    assert!(matches!(ship(&fx.state, order.id, &fx.outsider).await, Err(OrderError::NotFound(_))));

    ship(&fx.state, order.id, &fx.farmer).await.unwrap();
    assert!(matches!(
        confirm_receipt(&fx.state, order.id, &fx.farmer).await,
        Err(OrderError::Forbidden { .. })
    ));
}

#[tokio::test]
async fn full_lifecycle_captures_payment_on_completion() {
    let fx = fixture().await;
    let order = pending_order(&fx).await;
    ship(&fx.state, order.id, &fx.farmer).await.unwrap();
    confirm_receipt(&fx.state, order.id, &fx.customer).await.unwrap();

    let done = confirm_payment(&fx.state, order.id, &fx.customer).await.unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    assert_eq!(fx.payments.captured(), vec!["pi_test_1".to_owned()]);

    let room = fx.store.room_by_id(fx.room.id).await.unwrap().unwrap();
    assert_eq!(room.order_status, OrderStatus::Completed);
}

#[tokio::test]
async fn failed_capture_leaves_order_delivered() {
    let fx = fixture().await;
    let order = pending_order(&fx).await;
    ship(&fx.state, order.id, &fx.farmer).await.unwrap();
    confirm_receipt(&fx.state, order.id, &fx.customer).await.unwrap();
    let messages = fx.store.message_count(fx.room.id);

    fx.payments.set_failing(true);
    let err = confirm_payment(&fx.state, order.id, &fx.customer).await.unwrap_err();
    assert!(matches!(err, OrderError::Payment(PaymentError::Rejected { .. })));

    assert_eq!(fx.store.order(order.id).await.unwrap().unwrap().status, OrderStatus::Delivered);
    assert_eq!(fx.store.message_count(fx.room.id), messages);

    fx.payments.set_failing(false);
    confirm_payment(&fx.state, order.id, &fx.customer).await.unwrap();
}

#[tokio::test]
async fn completion_without_provider_is_refused() {
    let (state, store) = crate::state::test_helpers::test_app_state();
    let customer = store.seed_user("Cam");
    let farmer = store.seed_user("Fern");
    let product = store.seed_product("Honey", farmer.id);
    let req = PlaceOrder {
        farmer_id: farmer.id,
        product_id: product.id,
        quantity: 1,
        amount_cents: 900,
        payment_intent_id: "pi_honey".into(),
    };
    let (order, _) = place_order(&state, &customer, req).await.unwrap();
    ship(&state, order.id, &farmer).await.unwrap();
    confirm_receipt(&state, order.id, &customer).await.unwrap();

    let err = confirm_payment(&state, order.id, &customer).await.unwrap_err();
    assert!(matches!(err, OrderError::Payment(PaymentError::NotConfigured)));
}

// =============================================================================
// loose path
// =============================================================================

#[tokio::test]
async fn farmer_updates_unlinked_room_status() {
    let fx = fixture().await;
    let mut sub = fx.state.hub.subscribe(&fx.room.room_key, fx.customer.id);

    let room = update_status(&fx.state, &fx.room, &fx.farmer, OrderStatus::Active).await.unwrap();
    assert_eq!(room.order_status, OrderStatus::Active);
    assert!(!room.is_new_order);

    assert_eq!(drain(&mut sub), vec![Outbound::OrderStatusUpdate {
        room_id: fx.room.room_key.clone(),
        status: OrderStatus::Active,
        updated_by: fx.farmer.id,
        updated_by_name: "Fern Farmer".into(),
    }]);
}

#[tokio::test]
async fn loose_path_rejects_customers_and_linked_rooms() {
    let fx = fixture().await;
    assert!(matches!(
        update_status(&fx.state, &fx.room, &fx.customer, OrderStatus::Completed).await,
        Err(OrderError::Forbidden { .. })
    ));

    let (_, linked) = place_order(&fx.state, &fx.customer, purchase(&fx, "pi_linked")).await.unwrap();
    assert!(matches!(
        update_status(&fx.state, &linked, &fx.farmer, OrderStatus::Completed).await,
        Err(OrderError::PaymentBacked(_))
    ));
}

#[test]
fn status_parsing() {
    assert_eq!(parse_status("SHIPPED").unwrap(), OrderStatus::Shipped);
    assert!(matches!(parse_status("lost"), Err(OrderError::InvalidStatus(s)) if s == "lost"));
}
