use crate::entities::WebhookSecret;
use crate::framework::DatabaseProcessor;
use compact_str::CompactString;
use kanau::processor::Processor;
use uuid::Uuid;

/// An endpoint registered to receive some event types.
///
/// Subscriptions are managed outside of this crate; the delivery core only
/// reads them.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct WebhookSubscription {
    pub id: Uuid,
    /// `None` for system-wide subscriptions.
    pub user_id: Option<Uuid>,
    pub subscription_name: String,
    pub webhook_url: String,
    pub webhook_secret: WebhookSecret,
    pub event_types: Vec<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub rate_limit_per_minute: i32,
    pub max_retries: i32,
    pub retry_backoff_multiplier: f64,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: time::OffsetDateTime,
    pub updated_at: time::OffsetDateTime,
}

impl WebhookSubscription {
    /// Whether an event of `event_type` fans out to this subscription.
    pub fn accepts(&self, event_type: &str) -> bool {
        self.is_active && self.event_types.iter().any(|t| t == event_type)
    }
}

#[derive(Debug, Clone)]
/// Get every active subscription listing the event type.
pub struct GetActiveWebhookSubscriptions {
    pub event_type: CompactString,
}

impl Processor<GetActiveWebhookSubscriptions> for DatabaseProcessor {
    type Output = Vec<WebhookSubscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActiveWebhookSubscriptions")]
    async fn process(
        &self,
        query: GetActiveWebhookSubscriptions,
    ) -> Result<Vec<WebhookSubscription>, sqlx::Error> {
        let subscriptions = sqlx::query_as::<_, WebhookSubscription>(
            r#"
            SELECT
                id, user_id, subscription_name, webhook_url, webhook_secret,
                event_types, is_active, is_verified, rate_limit_per_minute,
                max_retries, retry_backoff_multiplier, description, metadata,
                created_at, updated_at
            FROM webhook_subscriptions
            WHERE is_active = true
              AND $1 = ANY(event_types)
            ORDER BY created_at ASC
            "#,
        )
        .bind(query.event_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(subscriptions)
    }
}

#[derive(Debug, Clone)]
/// Get the oldest active subscription registered for a URL.
pub struct GetWebhookSubscriptionByUrl {
    pub url: String,
}

impl Processor<GetWebhookSubscriptionByUrl> for DatabaseProcessor {
    type Output = Option<WebhookSubscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetWebhookSubscriptionByUrl")]
    async fn process(
        &self,
        query: GetWebhookSubscriptionByUrl,
    ) -> Result<Option<WebhookSubscription>, sqlx::Error> {
        let subscription = sqlx::query_as::<_, WebhookSubscription>(
            r#"
            SELECT
                id, user_id, subscription_name, webhook_url, webhook_secret,
                event_types, is_active, is_verified, rate_limit_per_minute,
                max_retries, retry_backoff_multiplier, description, metadata,
                created_at, updated_at
            FROM webhook_subscriptions
            WHERE webhook_url = $1 AND is_active = true
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(&query.url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(subscription)
    }
}
