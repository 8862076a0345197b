//! Emitter: fans one domain event out into delivery rows.
//!
//! For every active subscription listing the event type, one `pending`
//! [`WebhookEvent`](crate::entities::webhook_event::WebhookEvent) row is
//! persisted. Rows are independent: each has its own id, retry counter and
//! copy of the subscription's url, secret and backoff policy.
//!
//! The emitter never talks to the network. Delivery is left to the
//! [`Dispatcher`](super::Dispatcher).

use crate::config::FanoutDefaults;
use crate::entities::WebhookSecret;
use crate::entities::webhook_event::NewWebhookEvent;
use crate::entities::webhook_subscription::WebhookSubscription;
use crate::repository::{PersistenceError, WebhookRepository};
use crate::utils::clock::{Clock, SystemClock};
use compact_str::CompactString;
use hookpost_sdk::signature::payload_digest;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that abort an `emit` call. No rows exist when one is returned.
#[derive(Debug, Error)]
pub enum EmitError {
    /// The payload could not be serialized
    #[error("failed to serialize event payload: {0}")]
    Marshal(#[from] serde_json::Error),

    /// Matching subscriptions could not be resolved
    #[error("failed to look up subscriptions: {0}")]
    SubscriptionLookup(#[source] PersistenceError),
}

/// An internal event as handed over by a domain service.
#[derive(Debug, Clone)]
pub struct DomainEvent<P> {
    pub event_type: CompactString,
    pub event_version: CompactString,
    pub event_source: CompactString,
    pub user_id: Uuid,
    pub payload: P,
    /// Stored on each delivery row, never sent to receivers.
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl<P> DomainEvent<P> {
    pub fn new(
        event_type: impl Into<CompactString>,
        event_version: impl Into<CompactString>,
        event_source: impl Into<CompactString>,
        user_id: Uuid,
        payload: P,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            event_version: event_version.into(),
            event_source: event_source.into(),
            user_id,
            payload,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What one `emit` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitReport {
    /// Active subscriptions listing the event type.
    pub matched: usize,
    /// Rows persisted.
    pub created: usize,
    /// Rows that failed to persist and were skipped.
    pub failed: usize,
}

pub struct Emitter {
    repository: Arc<dyn WebhookRepository>,
    clock: Arc<dyn Clock>,
    defaults: FanoutDefaults,
}

impl Emitter {
    pub fn new(repository: Arc<dyn WebhookRepository>, defaults: FanoutDefaults) -> Self {
        Self {
            repository,
            clock: Arc::new(SystemClock),
            defaults,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Persist one `pending` delivery row per matching active subscription.
    ///
    /// A failed insert for one subscription is logged and skipped; the
    /// remaining subscriptions are still fanned out to. Zero matches is not
    /// an error.
    pub async fn emit<P: Serialize>(&self, event: DomainEvent<P>) -> Result<EmitReport, EmitError> {
        let payload = serde_json::to_vec(&event.payload)?;
        let payload_hash = payload_digest(&payload);
        let metadata = event.metadata.map(serde_json::Value::Object);

        let subscriptions = self
            .repository
            .active_subscriptions(&event.event_type)
            .await
            .map_err(EmitError::SubscriptionLookup)?;

        let mut report = EmitReport {
            matched: subscriptions.len(),
            ..EmitReport::default()
        };
        if subscriptions.is_empty() {
            debug!(event_type = %event.event_type, "No active subscriptions for event");
            return Ok(report);
        }

        let template = NewWebhookEvent {
            id: Uuid::nil(),
            event_type: event.event_type.clone(),
            event_version: event.event_version,
            event_source: event.event_source,
            user_id: event.user_id,
            payload,
            payload_hash,
            metadata,
            webhook_url: String::new(),
            webhook_secret: WebhookSecret::default(),
            retry_backoff_multiplier: self.defaults.backoff_multiplier,
            max_attempts: self.defaults.max_attempts,
            scheduled_at: self.clock.now(),
        };
        for subscription in &subscriptions {
            let row = NewWebhookEvent {
                id: Uuid::new_v4(),
                webhook_url: subscription.webhook_url.clone(),
                webhook_secret: subscription.webhook_secret.clone(),
                retry_backoff_multiplier: self.backoff_multiplier_for(subscription),
                max_attempts: self.max_attempts_for(subscription),
                ..template.clone()
            };
            let event_id = row.id;
            match self.repository.insert_event(row).await {
                Ok(()) => {
                    report.created += 1;
                    debug!(
                        event_id = %event_id,
                        subscription_id = %subscription.id,
                        webhook_url = %subscription.webhook_url,
                        "Queued webhook delivery"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        subscription_id = %subscription.id,
                        webhook_url = %subscription.webhook_url,
                        error = %e,
                        "Failed to persist webhook delivery, skipping subscription"
                    );
                }
            }
        }

        info!(
            event_type = %event.event_type,
            matched = report.matched,
            created = report.created,
            failed = report.failed,
            "Emitted event"
        );
        Ok(report)
    }

    fn max_attempts_for(&self, subscription: &WebhookSubscription) -> i32 {
        if subscription.max_retries > 0 {
            subscription.max_retries
        } else {
            self.defaults.max_attempts.max(1)
        }
    }

    fn backoff_multiplier_for(&self, subscription: &WebhookSubscription) -> f64 {
        let multiplier = subscription.retry_backoff_multiplier;
        if multiplier.is_finite() && multiplier > 0.0 {
            multiplier
        } else {
            self.defaults.backoff_multiplier
        }
    }
}
