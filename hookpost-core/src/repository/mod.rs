//! Storage contract consumed by the emitter and the dispatcher.
//!
//! The core never touches a connection directly; it goes through
//! [`WebhookRepository`]. [`PgWebhookRepository`] is the production
//! implementation, [`MemoryWebhookRepository`] backs tests.
//!
//! Implementations must make `claim_event` and `finish_delivery` atomic
//! conditional updates: they succeed only while the row still holds the
//! state the caller observed. That is what makes concurrent dispatchers safe.

mod memory;
mod postgres;

pub use memory::MemoryWebhookRepository;
pub use postgres::PgWebhookRepository;

use crate::entities::webhook_event::{
    ClaimWebhookEvent, FinishWebhookDelivery, GetDueWebhookEvents, NewWebhookEvent, WebhookEvent,
};
use crate::entities::webhook_subscription::WebhookSubscription;
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// A storage operation failed.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The store refused the write
    #[error("write rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// Active subscriptions whose `event_types` contain `event_type`.
    async fn active_subscriptions(
        &self,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, PersistenceError>;

    /// The active subscription registered for `url`, if any.
    async fn subscription_by_url(
        &self,
        url: &str,
    ) -> Result<Option<WebhookSubscription>, PersistenceError>;

    /// Persist one new `pending` delivery row.
    async fn insert_event(&self, event: NewWebhookEvent) -> Result<(), PersistenceError>;

    /// Rows due for delivery, ordered by `scheduled_at` ascending.
    async fn due_events(
        &self,
        query: GetDueWebhookEvents,
    ) -> Result<Vec<WebhookEvent>, PersistenceError>;

    /// Compare-and-set a row into `processing`. `Ok(false)` means another
    /// dispatcher got there first.
    async fn claim_event(&self, claim: ClaimWebhookEvent) -> Result<bool, PersistenceError>;

    /// Write back a delivery outcome. `Ok(false)` means the claim was lost.
    async fn finish_delivery(
        &self,
        finish: FinishWebhookDelivery,
    ) -> Result<bool, PersistenceError>;

    async fn event_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>, PersistenceError>;
}
