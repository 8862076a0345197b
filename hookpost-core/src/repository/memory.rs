use super::{PersistenceError, WebhookRepository};
use crate::entities::DeliveryStatus;
use crate::entities::webhook_event::{
    ClaimWebhookEvent, FinishWebhookDelivery, GetDueWebhookEvents, NewWebhookEvent, WebhookEvent,
};
use crate::entities::webhook_subscription::WebhookSubscription;
use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process [`WebhookRepository`].
///
/// Every operation runs under one lock, so conditional updates are atomic
/// exactly as the contract requires. Inserts can be made to fail per URL to
/// exercise partial fan-out.
#[derive(Debug, Default)]
pub struct MemoryWebhookRepository {
    state: RwLock<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    events: Vec<WebhookEvent>,
    subscriptions: Vec<WebhookSubscription>,
    rejected_urls: HashSet<String>,
}

impl MemoryWebhookRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_subscription(&self, subscription: WebhookSubscription) {
        self.state.write().await.subscriptions.push(subscription);
    }

    /// Store a row as-is, bypassing the `pending` defaults of `insert_event`.
    pub async fn put_event(&self, event: WebhookEvent) {
        let mut state = self.state.write().await;
        state.events.retain(|e| e.id != event.id);
        state.events.push(event);
    }

    /// Make every later `insert_event` targeting `url` fail.
    pub async fn reject_inserts_for(&self, url: impl Into<String>) {
        self.state.write().await.rejected_urls.insert(url.into());
    }

    /// Snapshot of all rows in insertion order.
    pub async fn events(&self) -> Vec<WebhookEvent> {
        self.state.read().await.events.clone()
    }
}

#[async_trait]
impl WebhookRepository for MemoryWebhookRepository {
    async fn active_subscriptions(
        &self,
        event_type: &str,
    ) -> Result<Vec<WebhookSubscription>, PersistenceError> {
        let state = self.state.read().await;
        let mut matching: Vec<_> = state
            .subscriptions
            .iter()
            .filter(|s| s.accepts(event_type))
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.created_at);
        Ok(matching)
    }

    async fn subscription_by_url(
        &self,
        url: &str,
    ) -> Result<Option<WebhookSubscription>, PersistenceError> {
        let state = self.state.read().await;
        Ok(state
            .subscriptions
            .iter()
            .filter(|s| s.is_active && s.webhook_url == url)
            .min_by_key(|s| s.created_at)
            .cloned())
    }

    async fn insert_event(&self, event: NewWebhookEvent) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;
        if state.rejected_urls.contains(&event.webhook_url) {
            return Err(PersistenceError::Rejected(format!(
                "inserts for {} are disabled",
                event.webhook_url
            )));
        }
        if state.events.iter().any(|e| e.id == event.id) {
            return Err(PersistenceError::Rejected(format!(
                "duplicate event id {}",
                event.id
            )));
        }
        state.events.push(event.into_event());
        Ok(())
    }

    async fn due_events(
        &self,
        query: GetDueWebhookEvents,
    ) -> Result<Vec<WebhookEvent>, PersistenceError> {
        let state = self.state.read().await;
        let mut due: Vec<_> = state
            .events
            .iter()
            .filter(|e| match e.status {
                DeliveryStatus::Pending | DeliveryStatus::Retrying => {
                    e.next_retry_at.is_none_or(|at| at <= query.now)
                }
                DeliveryStatus::Processing => {
                    e.processed_at.is_some_and(|at| at <= query.stale_before)
                }
                DeliveryStatus::Delivered | DeliveryStatus::Failed => false,
            })
            .cloned()
            .collect();
        due.sort_by_key(|e| e.scheduled_at);
        due.truncate(usize::try_from(query.limit).unwrap_or(0));
        Ok(due)
    }

    async fn claim_event(&self, claim: ClaimWebhookEvent) -> Result<bool, PersistenceError> {
        let mut state = self.state.write().await;
        let Some(event) = state.events.iter_mut().find(|e| e.id == claim.id) else {
            return Ok(false);
        };
        if event.status != claim.observed_status
            || event.processed_at != claim.observed_processed_at
        {
            return Ok(false);
        }
        event.status = DeliveryStatus::Processing;
        event.processed_at = Some(claim.now);
        event.next_retry_at = None;
        event.updated_at = claim.now;
        Ok(true)
    }

    async fn finish_delivery(
        &self,
        finish: FinishWebhookDelivery,
    ) -> Result<bool, PersistenceError> {
        let mut state = self.state.write().await;
        let Some(event) = state.events.iter_mut().find(|e| e.id == finish.id) else {
            return Ok(false);
        };
        if event.status != DeliveryStatus::Processing
            || event.processed_at != Some(finish.claimed_at)
        {
            return Ok(false);
        }
        finish.update.apply_to(event);
        event.updated_at = finish.now;
        Ok(true)
    }

    async fn event_by_id(&self, id: Uuid) -> Result<Option<WebhookEvent>, PersistenceError> {
        let state = self.state.read().await;
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }
}
