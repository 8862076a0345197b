use super::{PersistenceError, WebhookRepository};
use crate::entities::webhook_event::{
    ClaimWebhookEvent, FinishWebhookDelivery, GetDueWebhookEvents, GetWebhookEventById,
    InsertWebhookEvent, NewWebhookEvent, WebhookEvent,
};
use crate::entities::webhook_subscription::{
    GetActiveWebhookSubscriptions, GetWebhookSubscriptionByUrl, WebhookSubscription,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use uuid::Uuid;

/// [`WebhookRepository`] over the `webhook_events` and
/// `webhook_subscriptions` tables.
#[derive(Debug, Clone)]
pub struct PgWebhookRepository {
    db: DatabaseProcessor,
}

impl PgWebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self {
            db: DatabaseProcessor { pool },
        }
    }
}

#[async_trait]
impl WebhookRepository for PgWebhookRepository {
    async fn active_subscriptions(
        &self,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, PersistenceError> {
        Ok(self
            .db
            .process(GetActiveWebhookSubscriptions {
                event_type: event_type.into(),
            })
            .await?)
    }

    async fn subscription_by_url(
        &self,
        url: &str,
    ) -> Result<Option<WebhookSubscription>, PersistenceError> {
        Ok(self
            .db
            .process(GetWebhookSubscriptionByUrl {
                url: url.to_owned(),
            })
            .await?)
    }

    async fn insert_event(&self, event: NewWebhookEvent) -> Result<(), PersistenceError> {
        Ok(self.db.process(InsertWebhookEvent { event }).await?)
    }

    async fn due_events(
        &self,
        query: GetDueWebhookEvents,
    ) -> Result<Vec<WebhookEvent>, PersistenceError> {
        Ok(self.db.process(query).await?)
    }

    async fn claim_event(&self, claim: ClaimWebhookEvent) -> Result<bool, PersistenceError> {
        Ok(self.db.process(claim).await?)
    }

    async fn finish_delivery(
        &self,
        finish: FinishWebhookDelivery,
    ) -> Result<bool, PersistenceError> {
        Ok(self.db.process(finish).await?)
    }

    async fn event_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>, PersistenceError> {
        Ok(self.db.process(GetWebhookEventById { id }).await?)
    }
}
