//! The webhook endpoint and the per-user dispatcher.

mod common;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::Json;
use common::Harness;
use prezentor_bot::bot::protocol::{EventKind, InboundEvent, Intent, Update};
use prezentor_bot::bot::texts::{self, labels};
use prezentor_bot::bot::webhook::{receive_update, WebhookState};
use prezentor_bot::bot::Dispatcher;
use prezentor_core::domain::UserId;
use std::sync::Arc;
use std::time::Duration;

fn update(user: i64, text: &str) -> Update {
    serde_json::from_value(serde_json::json!({
        "update_id": 42,
        "message": {
            "message_id": 7,
            "from": { "id": user, "is_bot": false, "first_name": "Ali" },
            "chat": { "id": user, "type": "private" },
            "text": text
        }
    }))
    .unwrap()
}

fn webhook(h: &Harness) -> (WebhookState, Dispatcher) {
    let dispatcher = Dispatcher::new(h.state.clone());
    let state = WebhookState {
        dispatcher: dispatcher.clone(),
        secret: Arc::from("s3cret"),
    };
    (state, dispatcher)
}

async fn drain(h: &Harness, dispatcher: &Dispatcher) {
    dispatcher.close();
    h.settle().await;
}

#[tokio::test]
async fn webhook_rejects_a_wrong_secret() {
    let h = Harness::new();
    h.seed_user(100, 10_000).await;
    let (state, dispatcher) = webhook(&h);

    let status = receive_update(State(state.clone()), HeaderMap::new(), Json(update(100, labels::BALANCE))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut headers = HeaderMap::new();
    headers.insert("x-telegram-bot-api-secret-token", HeaderValue::from_static("guess"));
    let status = receive_update(State(state), headers, Json(update(100, labels::BALANCE))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    drain(&h, &dispatcher).await;
    assert!(h.messaging.outbound().is_empty());
}

#[tokio::test]
async fn webhook_dispatches_an_authenticated_update() {
    let h = Harness::new();
    h.seed_user(100, 10_000).await;
    let (state, dispatcher) = webhook(&h);

    let mut headers = HeaderMap::new();
    headers.insert("x-telegram-bot-api-secret-token", HeaderValue::from_static("s3cret"));
    let status = receive_update(State(state), headers, Json(update(100, labels::BALANCE))).await;
    assert_eq!(status, StatusCode::OK);

    drain(&h, &dispatcher).await;
    assert_eq!(h.messaging.last_text_to(100), texts::balance(10_000));
}

#[tokio::test]
async fn events_of_one_user_are_handled_in_arrival_order() {
    let h = Harness::new();
    h.seed_user(100, 10_000).await;
    h.seed_user(200, 10_000).await;
    let dispatcher = Dispatcher::with_idle_timeout(h.state.clone(), Duration::from_secs(5));

    let typed = |user: i64, text: &str| {
        InboundEvent::new(UserId::from(user), EventKind::Text(Intent::resolve(text)))
    };
    for (user, text) in [
        (100, labels::PRESENTATION),
        (200, labels::BALANCE),
        (100, "Ali Valiyev"),
        (100, "TATU"),
        (200, labels::REFERRAL),
        (100, "Sun'iy intellekt"),
    ] {
        dispatcher.dispatch(typed(user, text));
    }
    drain(&h, &dispatcher).await;

    assert_eq!(
        h.messaging.texts_to(100),
        vec![
            texts::ASK_AUTHOR.to_string(),
            texts::ASK_INSTITUTION.to_string(),
            texts::ASK_TOPIC.to_string(),
            texts::CHOOSE_TEMPLATE.to_string(),
        ]
    );
    assert_eq!(h.messaging.texts_to(200).len(), 2);
}

#[tokio::test]
async fn a_retired_worker_is_replaced_on_the_next_event() {
    let h = Harness::new();
    h.seed_user(100, 10_000).await;
    let dispatcher = Dispatcher::with_idle_timeout(h.state.clone(), Duration::from_millis(20));

    dispatcher.dispatch(InboundEvent::new(UserId::from(100), EventKind::Text(Intent::Balance)));
    tokio::time::sleep(Duration::from_millis(200)).await;
    dispatcher.dispatch(InboundEvent::new(UserId::from(100), EventKind::Text(Intent::Back)));
    drain(&h, &dispatcher).await;

    assert_eq!(
        h.messaging.texts_to(100),
        vec![texts::balance(10_000), texts::MAIN_MENU.to_string()]
    );
}

#[test]
fn updates_from_groups_and_bots_are_dropped() {
    let group: Update = serde_json::from_value(serde_json::json!({
        "update_id": 1,
        "message": {
            "message_id": 1,
            "from": { "id": 5, "is_bot": false, "first_name": "A" },
            "chat": { "id": -100, "type": "supergroup" },
            "text": "hi"
        }
    }))
    .unwrap();
    assert!(prezentor_bot::bot::protocol::inbound_event(group).is_none());

    let bot: Update = serde_json::from_value(serde_json::json!({
        "update_id": 2,
        "message": {
            "message_id": 1,
            "from": { "id": 6, "is_bot": true, "first_name": "B" },
            "chat": { "id": 6, "type": "private" },
            "text": "hi"
        }
    }))
    .unwrap();
    assert!(prezentor_bot::bot::protocol::inbound_event(bot).is_none());
}
