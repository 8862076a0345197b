//! Fan-out behavior of the emitter.

mod common;

use common::*;
use hookpost_core::entities::DeliveryStatus;
use hookpost_core::processors::{DomainEvent, EmitError};
use hookpost_sdk::signature::payload_digest;
use std::collections::HashSet;

#[tokio::test]
async fn test_two_matching_subscriptions_create_two_pending_rows() {
    let h = Harness::new();
    h.repository
        .add_subscription(subscription("http://a.test/hook", SECRET_1, &[EVENT_TYPE]))
        .await;
    h.repository
        .add_subscription(subscription(
            "http://b.test/hook",
            SECRET_2,
            &["user.deleted", EVENT_TYPE],
        ))
        .await;

    let report = h.emitter.emit(user_created()).await.unwrap();
    assert_eq!(report.matched, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.failed, 0);

    let events = h.repository.events().await;
    assert_eq!(events.len(), 2);

    let urls: HashSet<_> = events.iter().map(|e| e.webhook_url.as_str()).collect();
    assert_eq!(urls, HashSet::from(["http://a.test/hook", "http://b.test/hook"]));

    let ids: HashSet<_> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 2, "every fanned-out row has its own id");

    for event in &events {
        assert_eq!(event.status, DeliveryStatus::Pending);
        assert_eq!(event.delivery_attempts, 0);
        assert_eq!(event.max_attempts, 3);
        assert_eq!(event.scheduled_at, start_time());
        assert_eq!(event.next_retry_at, None);
        assert_eq!(event.payload_hash, payload_digest(&event.payload));
        assert_eq!(event.user_id, USER_1);
    }

    let secret_for_b = events
        .iter()
        .find(|e| e.webhook_url == "http://b.test/hook")
        .map(|e| e.webhook_secret.expose().to_string());
    assert_eq!(secret_for_b.as_deref(), Some(SECRET_2));
}

#[tokio::test]
async fn test_inactive_and_non_matching_subscriptions_are_ignored() {
    let h = Harness::new();
    let mut inactive = subscription("http://inactive.test/hook", SECRET_1, &[EVENT_TYPE]);
    inactive.is_active = false;
    h.repository.add_subscription(inactive).await;
    h.repository
        .add_subscription(subscription(
            "http://other.test/hook",
            SECRET_1,
            &["request.approved"],
        ))
        .await;

    let report = h.emitter.emit(user_created()).await.unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(report.created, 0);
    assert!(h.repository.events().await.is_empty());
}

#[tokio::test]
async fn test_failed_insert_does_not_stop_fan_out() {
    let h = Harness::new();
    h.repository
        .add_subscription(subscription("http://down.test/hook", SECRET_1, &[EVENT_TYPE]))
        .await;
    h.repository
        .add_subscription(subscription("http://up.test/hook", SECRET_2, &[EVENT_TYPE]))
        .await;
    h.repository.reject_inserts_for("http://down.test/hook").await;

    let report = h.emitter.emit(user_created()).await.unwrap();
    assert_eq!(report.matched, 2);
    assert_eq!(report.created, 1);
    assert_eq!(report.failed, 1);

    let event = h.only_event().await;
    assert_eq!(event.webhook_url, "http://up.test/hook");
}

#[tokio::test]
async fn test_payload_hash_is_deterministic() {
    let h = Harness::new();
    h.repository
        .add_subscription(subscription("http://a.test/hook", SECRET_1, &[EVENT_TYPE]))
        .await;

    h.emitter.emit(user_created()).await.unwrap();
    h.emitter.emit(user_created()).await.unwrap();
    let mut changed = user_created();
    changed.payload.name = "Adb".to_string();
    h.emitter.emit(changed).await.unwrap();

    let events = h.repository.events().await;
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].payload_hash, events[1].payload_hash);
    assert_ne!(events[0].id, events[1].id);
    assert_ne!(events[0].payload_hash, events[2].payload_hash);
}

#[tokio::test]
async fn test_policy_and_metadata_are_copied_onto_rows() {
    let h = Harness::new();
    let mut custom = subscription("http://a.test/hook", SECRET_1, &[EVENT_TYPE]);
    custom.max_retries = 5;
    custom.retry_backoff_multiplier = 3.0;
    h.repository.add_subscription(custom).await;
    let mut unset = subscription("http://b.test/hook", SECRET_2, &[EVENT_TYPE]);
    unset.max_retries = 0;
    unset.retry_backoff_multiplier = 0.0;
    h.repository.add_subscription(unset).await;

    let mut metadata = serde_json::Map::new();
    metadata.insert("request_id".to_string(), serde_json::json!("req-42"));
    h.emitter
        .emit(user_created().with_metadata(metadata))
        .await
        .unwrap();

    let events = h.repository.events().await;
    let a = events
        .iter()
        .find(|e| e.webhook_url == "http://a.test/hook")
        .unwrap();
    assert_eq!(a.max_attempts, 5);
    assert_eq!(a.retry_backoff_multiplier, 3.0);
    assert_eq!(
        a.metadata,
        Some(serde_json::json!({ "request_id": "req-42" }))
    );

    let b = events
        .iter()
        .find(|e| e.webhook_url == "http://b.test/hook")
        .unwrap();
    assert_eq!(b.max_attempts, 3);
    assert_eq!(b.retry_backoff_multiplier, 2.0);
}

#[tokio::test]
async fn test_unserializable_payload_creates_no_rows() {
    let h = Harness::new();
    h.repository
        .add_subscription(subscription("http://a.test/hook", SECRET_1, &[EVENT_TYPE]))
        .await;

    // JSON object keys must be strings.
    let payload = std::collections::HashMap::from([((1, 2), "x")]);
    let result = h
        .emitter
        .emit(DomainEvent::new(EVENT_TYPE, "1.0", "accounts", USER_1, payload))
        .await;

    assert!(matches!(result, Err(EmitError::Marshal(_))));
    assert!(h.repository.events().await.is_empty());
}
