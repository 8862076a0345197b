use crate::entities::{DeliveryStatus, WebhookSecret};
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// One delivery of one emitted domain event to one subscription.
///
/// The target URL, secret and backoff multiplier are copies taken from the
/// subscription at fan-out time, so later changes to the subscription do
/// not affect rows that are already queued.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: CompactString,
    pub event_version: CompactString,
    pub event_source: CompactString,
    pub user_id: Uuid,
    pub payload: Vec<u8>,
    pub payload_hash: String,
    pub metadata: Option<serde_json::Value>,
    pub webhook_url: String,
    pub webhook_secret: WebhookSecret,
    pub retry_backoff_multiplier: f64,
    pub status: DeliveryStatus,
    pub delivery_attempts: i32,
    pub max_attempts: i32,
    pub scheduled_at: OffsetDateTime,
    /// Set when the row is claimed; doubles as the claim token.
    pub processed_at: Option<OffsetDateTime>,
    pub delivered_at: Option<OffsetDateTime>,
    /// Set if and only if `status` is `Retrying`.
    pub next_retry_at: Option<OffsetDateTime>,
    pub last_response_status: Option<i32>,
    pub last_response_body: Option<String>,
    pub last_error_message: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Data for inserting a new delivery row. Rows always start `pending`
/// with zero attempts.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub id: Uuid,
    pub event_type: CompactString,
    pub event_version: CompactString,
    pub event_source: CompactString,
    pub user_id: Uuid,
    pub payload: Vec<u8>,
    pub payload_hash: String,
    pub metadata: Option<serde_json::Value>,
    pub webhook_url: String,
    pub webhook_secret: WebhookSecret,
    pub retry_backoff_multiplier: f64,
    pub max_attempts: i32,
    pub scheduled_at: OffsetDateTime,
}

impl NewWebhookEvent {
    /// The row as it reads back right after insertion.
    pub fn into_event(self) -> WebhookEvent {
        WebhookEvent {
            id: self.id,
            event_type: self.event_type,
            event_version: self.event_version,
            event_source: self.event_source,
            user_id: self.user_id,
            payload: self.payload,
            payload_hash: self.payload_hash,
            metadata: self.metadata,
            webhook_url: self.webhook_url,
            webhook_secret: self.webhook_secret,
            retry_backoff_multiplier: self.retry_backoff_multiplier,
            status: DeliveryStatus::Pending,
            delivery_attempts: 0,
            max_attempts: self.max_attempts,
            scheduled_at: self.scheduled_at,
            processed_at: None,
            delivered_at: None,
            next_retry_at: None,
            last_response_status: None,
            last_response_body: None,
            last_error_message: None,
            created_at: self.scheduled_at,
            updated_at: self.scheduled_at,
        }
    }
}

/// Fields written back when a claimed delivery finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryUpdate {
    pub status: DeliveryStatus,
    pub delivery_attempts: i32,
    pub delivered_at: Option<OffsetDateTime>,
    pub next_retry_at: Option<OffsetDateTime>,
    pub last_response_status: Option<i32>,
    pub last_response_body: Option<String>,
    pub last_error_message: Option<String>,
}

impl DeliveryUpdate {
    /// Start from the row's current outcome fields.
    pub fn from_event(event: &WebhookEvent) -> Self {
        Self {
            status: event.status,
            delivery_attempts: event.delivery_attempts,
            delivered_at: event.delivered_at,
            next_retry_at: event.next_retry_at,
            last_response_status: event.last_response_status,
            last_response_body: event.last_response_body.clone(),
            last_error_message: event.last_error_message.clone(),
        }
    }

    pub fn apply_to(self, event: &mut WebhookEvent) {
        event.status = self.status;
        event.delivery_attempts = self.delivery_attempts;
        event.delivered_at = self.delivered_at;
        event.next_retry_at = self.next_retry_at;
        event.last_response_status = self.last_response_status;
        event.last_response_body = self.last_response_body;
        event.last_error_message = self.last_error_message;
    }
}

#[derive(Debug, Clone)]
/// Insert one pending delivery row.
pub struct InsertWebhookEvent {
    pub event: NewWebhookEvent,
}

impl Processor<InsertWebhookEvent> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertWebhookEvent")]
    async fn process(&self, insert: InsertWebhookEvent) -> Result<(), sqlx::Error> {
        let event = insert.event;
        sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, event_type, event_version, event_source, user_id, payload,
                payload_hash, metadata, webhook_url, webhook_secret,
                retry_backoff_multiplier, status, delivery_attempts, max_attempts,
                scheduled_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'pending', 0, $12, $13, $13, $13)
            "#,
        )
        .bind(event.id)
        .bind(event.event_type)
        .bind(event.event_version)
        .bind(event.event_source)
        .bind(event.user_id)
        .bind(event.payload)
        .bind(event.payload_hash)
        .bind(event.metadata)
        .bind(event.webhook_url)
        .bind(event.webhook_secret)
        .bind(event.retry_backoff_multiplier)
        .bind(event.max_attempts)
        .bind(event.scheduled_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Get rows that are due for a delivery attempt, oldest schedule first.
///
/// A row is due when it is `pending`/`retrying` with no `next_retry_at` in
/// the future, or when it has been `processing` since before `stale_before`
/// (its dispatcher died mid-delivery).
pub struct GetDueWebhookEvents {
    pub now: OffsetDateTime,
    pub stale_before: OffsetDateTime,
    pub limit: i64,
}

impl Processor<GetDueWebhookEvents> for DatabaseProcessor {
    type Output = Vec<WebhookEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDueWebhookEvents")]
    async fn process(&self, query: GetDueWebhookEvents) -> Result<Vec<WebhookEvent>, sqlx::Error> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT
                id, event_type, event_version, event_source, user_id, payload,
                payload_hash, metadata, webhook_url, webhook_secret,
                retry_backoff_multiplier, status, delivery_attempts, max_attempts,
                scheduled_at, processed_at, delivered_at, next_retry_at,
                last_response_status, last_response_body, last_error_message,
                created_at, updated_at
            FROM webhook_events
            WHERE (status IN ('pending', 'retrying')
                   AND (next_retry_at IS NULL OR next_retry_at <= $1))
               OR (status = 'processing' AND processed_at <= $2)
            ORDER BY scheduled_at ASC
            LIMIT $3
            "#,
        )
        .bind(query.now)
        .bind(query.stale_before)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }
}

#[derive(Debug, Clone)]
/// Move a row to `processing` if it still holds the observed status and
/// claim token. Returns whether this caller won the claim.
pub struct ClaimWebhookEvent {
    pub id: Uuid,
    pub observed_status: DeliveryStatus,
    pub observed_processed_at: Option<OffsetDateTime>,
    pub now: OffsetDateTime,
}

impl Processor<ClaimWebhookEvent> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimWebhookEvent")]
    async fn process(&self, claim: ClaimWebhookEvent) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'processing',
                processed_at = $4,
                next_retry_at = NULL,
                updated_at = $4
            WHERE id = $1
              AND status = $2
              AND processed_at IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(claim.id)
        .bind(claim.observed_status)
        .bind(claim.observed_processed_at)
        .bind(claim.now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
/// Write the outcome of a claimed delivery. Only applies while the row is
/// still `processing` under the claim taken at `claimed_at`.
pub struct FinishWebhookDelivery {
    pub id: Uuid,
    pub claimed_at: OffsetDateTime,
    pub now: OffsetDateTime,
    pub update: DeliveryUpdate,
}

impl Processor<FinishWebhookDelivery> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FinishWebhookDelivery")]
    async fn process(&self, finish: FinishWebhookDelivery) -> Result<bool, sqlx::Error> {
        let FinishWebhookDelivery {
            id,
            claimed_at,
            now,
            update,
        } = finish;
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $3,
                delivery_attempts = $4,
                delivered_at = $5,
                next_retry_at = $6,
                last_response_status = $7,
                last_response_body = $8,
                last_error_message = $9,
                updated_at = $10
            WHERE id = $1
              AND status = 'processing'
              AND processed_at = $2
            "#,
        )
        .bind(id)
        .bind(claimed_at)
        .bind(update.status)
        .bind(update.delivery_attempts)
        .bind(update.delivered_at)
        .bind(update.next_retry_at)
        .bind(update.last_response_status)
        .bind(update.last_response_body)
        .bind(update.last_error_message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
/// Get a delivery row by id.
pub struct GetWebhookEventById {
    pub id: Uuid,
}

impl Processor<GetWebhookEventById> for DatabaseProcessor {
    type Output = Option<WebhookEvent>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWebhookEventById")]
    async fn process(&self, query: GetWebhookEventById) -> Result<Option<WebhookEvent>, sqlx::Error> {
        let event = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT
                id, event_type, event_version, event_source, user_id, payload,
                payload_hash, metadata, webhook_url, webhook_secret,
                retry_backoff_multiplier, status, delivery_attempts, max_attempts,
                scheduled_at, processed_at, delivered_at, next_retry_at,
                last_response_status, last_response_body, last_error_message,
                created_at, updated_at
            FROM webhook_events
            WHERE id = $1
            "#,
        )
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(event)
    }
}
