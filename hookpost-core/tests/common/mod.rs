//! Shared fixtures for the delivery scenario tests.
//!
//! Everything runs against `MemoryWebhookRepository` and a `ManualClock`;
//! receivers are wiremock servers.

#![allow(dead_code)]

use hookpost_core::config::{DispatchPolicy, FanoutDefaults};
use hookpost_core::entities::WebhookSecret;
use hookpost_core::entities::webhook_event::WebhookEvent;
use hookpost_core::entities::webhook_subscription::WebhookSubscription;
use hookpost_core::processors::{DomainEvent, Dispatcher, Emitter};
use hookpost_core::repository::{MemoryWebhookRepository, WebhookRepository};
use hookpost_core::utils::clock::ManualClock;
use hookpost_sdk::signature::Signer;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test fixtures
// ---------------------------------------------------------------------------

pub const USER_1: Uuid = Uuid::from_bytes([
    0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0xaa, 0xaa, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
]);

pub const SECRET_1: &str = "whsec_test_secret_key_12345";
pub const SECRET_2: &str = "whsec_another_secret_67890";
pub const DEFAULT_SECRET: &str = "whsec_system_default";

/// Nothing listens on port 1; connections are refused immediately.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:1/hook";

pub const EVENT_TYPE: &str = "user.created";

pub fn start_time() -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_706_400_000).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCreated {
    pub name: String,
    pub email: String,
}

pub fn user_created() -> DomainEvent<UserCreated> {
    DomainEvent::new(
        EVENT_TYPE,
        "1.0",
        "accounts",
        USER_1,
        UserCreated {
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        },
    )
}

pub fn subscription(url: &str, secret: &str, event_types: &[&str]) -> WebhookSubscription {
    WebhookSubscription {
        id: Uuid::new_v4(),
        user_id: None,
        subscription_name: format!("sub for {url}"),
        webhook_url: url.to_string(),
        webhook_secret: WebhookSecret::new(secret),
        event_types: event_types.iter().map(|t| t.to_string()).collect(),
        is_active: true,
        is_verified: true,
        rate_limit_per_minute: 60,
        max_retries: 3,
        retry_backoff_multiplier: 2.0,
        description: None,
        metadata: None,
        created_at: start_time(),
        updated_at: start_time(),
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub repository: Arc<MemoryWebhookRepository>,
    pub clock: Arc<ManualClock>,
    pub emitter: Emitter,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(DispatchPolicy::default())
    }

    pub fn with_policy(policy: DispatchPolicy) -> Self {
        let repository = Arc::new(MemoryWebhookRepository::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let emitter = Emitter::new(repository.clone(), FanoutDefaults::default())
            .with_clock(clock.clone());
        let dispatcher = new_dispatcher(repository.clone(), clock.clone(), policy);
        Self {
            repository,
            clock,
            emitter,
            dispatcher,
        }
    }

    /// Another dispatcher over the same repository and clock.
    pub fn second_dispatcher(&self) -> Dispatcher {
        new_dispatcher(
            self.repository.clone(),
            self.clock.clone(),
            self.dispatcher.policy().clone(),
        )
    }

    pub async fn only_event(&self) -> WebhookEvent {
        let events = self.repository.events().await;
        assert_eq!(events.len(), 1, "expected exactly one delivery row");
        events[0].clone()
    }

    pub async fn event(&self, id: Uuid) -> WebhookEvent {
        self.repository
            .event_by_id(id)
            .await
            .unwrap()
            .expect("event exists")
    }
}

fn new_dispatcher(
    repository: Arc<MemoryWebhookRepository>,
    clock: Arc<ManualClock>,
    policy: DispatchPolicy,
) -> Dispatcher {
    Dispatcher::new(
        repository,
        Signer::new(DEFAULT_SECRET.as_bytes()),
        policy,
    )
    .expect("http client builds")
    .with_clock(clock)
}

// ---------------------------------------------------------------------------
// CaptureResponder - captures requests and returns a fixed response
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub body: Vec<u8>,
    pub headers: HashMap<String, String>,
}

impl CapturedRequest {
    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Clone)]
pub struct CaptureResponder {
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
    template: ResponseTemplate,
}

impl CaptureResponder {
    pub fn new() -> Self {
        Self::with_template(ResponseTemplate::new(200).set_body_string("ok"))
    }

    pub fn with_status(status: u16) -> Self {
        Self::with_template(ResponseTemplate::new(status))
    }

    pub fn with_template(template: ResponseTemplate) -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            template,
        }
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl Respond for CaptureResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let captured = CapturedRequest {
            body: request.body.clone(),
            headers: request
                .headers
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
                .collect(),
        };
        self.requests.lock().unwrap().push(captured);
        self.template.clone()
    }
}

/// Start a receiver answering `POST /hook` with `responder`.
pub async fn receiver(responder: CaptureResponder) -> (MockServer, String) {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(responder)
        .mount(&server)
        .await;
    let url = format!("{}/hook", server.uri());
    (server, url)
}
