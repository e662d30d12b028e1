use super::*;
use crate::store::{ChatStore, NewMessage, Side};
use crate::state::test_helpers::{Fixture, fixture};

async fn say(fx: &Fixture, side: Side, body: &str) {
    let sender_id = fx.room.participant(side);
    fx.store
        .append_message(NewMessage {
            room_id: fx.room.id,
            sender_id,
            sender_side: side,
            body: body.into(),
            image: None,
            images: Vec::new(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn farmer_marks_three_customer_messages_read() {
    let fx = fixture().await;
    for body in ["a", "b", "c"] {
        say(&fx, Side::Customer, body).await;
    }
    assert_eq!(unread_count_for(&fx.state, &fx.room, fx.farmer.id).await.unwrap(), 3);

    assert_eq!(mark_read(&fx.state, &fx.room, fx.farmer.id).await.unwrap(), 3);

    let messages = fx.store.messages(fx.room.id).await.unwrap();
    assert!(messages.iter().all(|m| m.is_read));
    let room = fx.store.room_by_id(fx.room.id).await.unwrap().unwrap();
    assert!(!room.has_unread_farmer);
    assert_eq!(unread_count_for(&fx.state, &fx.room, fx.farmer.id).await.unwrap(), 0);
}

#[tokio::test]
async fn mark_read_is_idempotent() {
    let fx = fixture().await;
    say(&fx, Side::Customer, "hello").await;

    assert_eq!(mark_read(&fx.state, &fx.room, fx.farmer.id).await.unwrap(), 1);
    assert_eq!(mark_read(&fx.state, &fx.room, fx.farmer.id).await.unwrap(), 0);
    assert!(fx.store.messages(fx.room.id).await.unwrap().iter().all(|m| m.is_read));
}

#[tokio::test]
async fn reader_own_messages_are_untouched() {
    let fx = fixture().await;
    say(&fx, Side::Customer, "mine").await;
    say(&fx, Side::Farmer, "theirs").await;

    assert_eq!(mark_read(&fx.state, &fx.room, fx.customer.id).await.unwrap(), 1);
    let messages = fx.store.messages(fx.room.id).await.unwrap();
    assert!(!messages[0].is_read, "customer's own message stays unread for the farmer");
    assert!(messages[1].is_read);
    assert_eq!(unread_count_for(&fx.state, &fx.room, fx.farmer.id).await.unwrap(), 1);
}

#[tokio::test]
async fn outsiders_cannot_mark_and_see_zero() {
    let fx = fixture().await;
    say(&fx, Side::Customer, "hi").await;

    assert!(matches!(
        mark_read(&fx.state, &fx.room, fx.outsider.id).await,
        Err(RoomError::Forbidden { .. })
    ));
    assert_eq!(unread_count_for(&fx.state, &fx.room, fx.outsider.id).await.unwrap(), 0);
}
