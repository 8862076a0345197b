pub mod webhook_event;
pub mod webhook_subscription;

/// Delivery status of a webhook event row.
///
/// `Delivered` and `Failed` are terminal: once a row reaches either it is
/// never written again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "webhook_delivery_status")]
pub enum DeliveryStatus {
    Pending,
    Processing,
    Delivered,
    Retrying,
    Failed,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Processing => write!(f, "processing"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Retrying => write!(f, "retrying"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A webhook signing secret. `Debug` never prints the value.
#[derive(Clone, PartialEq, Eq, Default, sqlx::Type)]
#[sqlx(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("WebhookSecret(<empty>)")
        } else {
            f.write_str("WebhookSecret(<redacted>)")
        }
    }
}
