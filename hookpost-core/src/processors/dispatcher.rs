//! Dispatcher: claims due delivery rows and POSTs them.
//!
//! Each call to [`Dispatcher::process_pending_events`] is one batch:
//! - load up to `limit` due rows (`pending`/`retrying` whose retry time has
//!   come, plus `processing` rows abandoned for longer than the claim timeout)
//! - claim each row with a compare-and-set, skipping rows another dispatcher won
//! - sign the envelope and POST it
//! - write the outcome back, guarded on the claim token
//!
//! Delivery is at-least-once. A receiver that answers 2xx after the write-back
//! was lost will see the event again.

use crate::config::DispatchPolicy;
use crate::entities::DeliveryStatus;
use crate::entities::webhook_event::{
    ClaimWebhookEvent, DeliveryUpdate, FinishWebhookDelivery, GetDueWebhookEvents, WebhookEvent,
};
use crate::repository::{PersistenceError, WebhookRepository};
use crate::utils::backoff::retry_delay;
use crate::utils::clock::{Clock, SystemClock, truncate_to_micros};
use bytes::BytesMut;
use futures_util::stream::{self, StreamExt};
use hookpost_sdk::objects::DeliveryEnvelope;
use hookpost_sdk::signature::{
    EVENT_ID_HEADER, EVENT_TYPE_HEADER, SIGNATURE_HEADER, Signer, TIMESTAMP_HEADER,
    format_signature_header,
};
use serde_json::value::RawValue;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Due rows could not be loaded
    #[error("failed to load due webhook events: {0}")]
    Query(#[source] PersistenceError),

    /// The HTTP client could not be built
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The policy would let healthy deliveries be claimed twice
    #[error("invalid dispatch policy: {0}")]
    InvalidPolicy(&'static str),
}

/// Why a single delivery attempt did not succeed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Receiver answered with a non-2xx status
    #[error("webhook delivery failed with status {status}")]
    Status { status: u16, body: String },

    /// No response within the request timeout
    #[error("webhook request timed out")]
    Timeout,

    /// Connection or protocol error
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The stored url is not a valid http(s) url
    #[error("invalid webhook url: {0}")]
    InvalidUrl(String),

    /// The stored payload cannot be embedded in an envelope
    #[error("cannot build delivery envelope: {0}")]
    Envelope(String),
}

impl DeliveryError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Envelope(_))
    }
}

/// Counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Due rows loaded.
    pub due: usize,
    /// Rows this call claimed.
    pub claimed: usize,
    pub delivered: usize,
    pub retrying: usize,
    pub failed: usize,
    /// Rows lost to another dispatcher, either at claim or at write-back.
    pub skipped: usize,
    /// Claims handed back because of shutdown.
    pub released: usize,
    /// Rows whose claim or write-back hit a storage error.
    pub errors: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: RowOutcome) {
        if outcome.claimed() {
            self.claimed += 1;
        }
        match outcome {
            RowOutcome::Delivered => self.delivered += 1,
            RowOutcome::Retrying => self.retrying += 1,
            RowOutcome::Failed => self.failed += 1,
            RowOutcome::NotClaimed | RowOutcome::Superseded => self.skipped += 1,
            RowOutcome::Released => self.released += 1,
            RowOutcome::ClaimError | RowOutcome::WriteError => self.errors += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Delivered,
    Retrying,
    Failed,
    NotClaimed,
    Superseded,
    Released,
    ClaimError,
    WriteError,
}

impl RowOutcome {
    fn claimed(self) -> bool {
        !matches!(self, RowOutcome::NotClaimed | RowOutcome::ClaimError)
    }
}

/// A 2xx answer from a receiver.
#[derive(Debug)]
struct DeliveryResponse {
    status: u16,
    body: String,
}

pub struct Dispatcher {
    repository: Arc<dyn WebhookRepository>,
    signer: Signer,
    policy: DispatchPolicy,
    http_client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    /// Create a dispatcher.
    ///
    /// The HTTP client applies `policy.request_timeout` to every attempt and
    /// does not follow redirects; a 3xx answer counts as a failed attempt.
    ///
    /// Fails with [`DispatchError::InvalidPolicy`] unless
    /// `policy.claim_timeout` exceeds `policy.request_timeout`: a shorter
    /// claim lets another dispatcher recover a slow but live delivery and
    /// send it again.
    pub fn new(
        repository: Arc<dyn WebhookRepository>,
        signer: Signer,
        policy: DispatchPolicy,
    ) -> Result<Self, DispatchError> {
        if policy.claim_timeout <= policy.request_timeout {
            return Err(DispatchError::InvalidPolicy(
                "claim_timeout must exceed request_timeout",
            ));
        }
        let http_client = reqwest::Client::builder()
            .timeout(policy.request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("hookpost/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            repository,
            signer,
            policy,
            http_client,
            clock: Arc::new(SystemClock),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Run one batch of at most `limit` deliveries.
    ///
    /// Safe to call concurrently, from this or other processes: every row is
    /// claimed with a compare-and-set, so each due row is attempted by exactly
    /// one caller. Per-row failures are logged and counted; only a failure to
    /// load the due rows fails the call.
    pub async fn process_pending_events(&self, limit: usize) -> Result<BatchReport, DispatchError> {
        let (_never_shutdown, shutdown) = watch::channel(false);
        self.process_pending_events_until(limit, shutdown).await
    }

    /// Like [`process_pending_events`](Self::process_pending_events), but
    /// stops early once `shutdown` turns `true`.
    ///
    /// Rows not yet claimed are left alone. In-flight requests are dropped
    /// and their claims released: the row goes back to `pending` (or to
    /// `retrying`, due immediately, if it was attempted before) without
    /// counting an attempt.
    pub async fn process_pending_events_until(
        &self,
        limit: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Result<BatchReport, DispatchError> {
        let mut report = BatchReport::default();
        if limit == 0 {
            return Ok(report);
        }

        let now = self.clock.now();
        let due = self
            .repository
            .due_events(GetDueWebhookEvents {
                now,
                stale_before: now.saturating_sub(to_time_duration(self.policy.claim_timeout)),
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await
            .map_err(DispatchError::Query)?;
        report.due = due.len();
        if due.is_empty() {
            return Ok(report);
        }
        debug!(count = due.len(), "Processing due webhook events");

        let outcomes: Vec<RowOutcome> = stream::iter(due)
            .map(|event| {
                let span = info_span!(
                    "webhook_delivery",
                    event_id = %event.id,
                    event_type = %event.event_type,
                    webhook_url = %event.webhook_url,
                );
                self.dispatch_one(event, shutdown.clone()).instrument(span)
            })
            .buffer_unordered(self.policy.concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }

        info!(
            due = report.due,
            claimed = report.claimed,
            delivered = report.delivered,
            retrying = report.retrying,
            failed = report.failed,
            skipped = report.skipped,
            released = report.released,
            errors = report.errors,
            "Webhook batch finished"
        );
        Ok(report)
    }

    async fn dispatch_one(
        &self,
        event: WebhookEvent,
        mut shutdown: watch::Receiver<bool>,
    ) -> RowOutcome {
        if *shutdown.borrow() {
            return RowOutcome::NotClaimed;
        }

        let claimed_at = self.clock.now();
        let claim = ClaimWebhookEvent {
            id: event.id,
            observed_status: event.status,
            observed_processed_at: event.processed_at,
            now: claimed_at,
        };
        match self.repository.claim_event(claim).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Webhook event claimed elsewhere, skipping");
                return RowOutcome::NotClaimed;
            }
            Err(e) => {
                error!(error = %e, "Failed to claim webhook event");
                return RowOutcome::ClaimError;
            }
        }
        if event.status == DeliveryStatus::Processing {
            warn!(
                previous_claim = ?event.processed_at,
                "Recovered stale webhook claim"
            );
        }

        let attempt = tokio::select! {
            biased;

            _ = wait_for_shutdown(&mut shutdown) => None,

            result = self.deliver(&event) => Some(result),
        };

        let Some(result) = attempt else {
            return self.release(&event, claimed_at).await;
        };

        let finished_at = self.clock.now();
        let (update, outcome) = self.outcome_update(&event, result, finished_at);
        let finish = FinishWebhookDelivery {
            id: event.id,
            claimed_at,
            now: finished_at,
            update,
        };
        match self.repository.finish_delivery(finish).await {
            Ok(true) => outcome,
            Ok(false) => {
                warn!("Webhook claim was superseded, outcome discarded");
                RowOutcome::Superseded
            }
            Err(e) => {
                error!(error = %e, "Failed to record webhook delivery outcome");
                RowOutcome::WriteError
            }
        }
    }

    /// Turn an attempt's result into the row update.
    fn outcome_update(
        &self,
        event: &WebhookEvent,
        result: Result<DeliveryResponse, DeliveryError>,
        now: OffsetDateTime,
    ) -> (DeliveryUpdate, RowOutcome) {
        let mut update = DeliveryUpdate::from_event(event);
        update.next_retry_at = None;

        let error = match result {
            Ok(response) => {
                info!(status = response.status, "Webhook delivered successfully");
                update.status = DeliveryStatus::Delivered;
                update.delivered_at = Some(now);
                update.last_response_status = Some(i32::from(response.status));
                update.last_response_body = Some(response.body);
                return (update, RowOutcome::Delivered);
            }
            Err(error) => error,
        };

        if !error.is_retryable() {
            error!(error = %error, "Webhook event cannot be delivered, marking as failed");
            update.status = DeliveryStatus::Failed;
            update.last_error_message = Some(error.to_string());
            return (update, RowOutcome::Failed);
        }

        let max_attempts = event.max_attempts.max(1);
        let attempts = event.delivery_attempts.saturating_add(1).min(max_attempts);
        update.delivery_attempts = attempts;
        update.last_error_message = Some(error.to_string());
        match error {
            DeliveryError::Status { status, body } => {
                update.last_response_status = Some(i32::from(status));
                update.last_response_body = Some(body);
            }
            _ => {
                update.last_response_status = None;
                update.last_response_body = None;
            }
        }

        if attempts >= max_attempts {
            warn!(
                attempt = attempts,
                max_attempts,
                error = update.last_error_message.as_deref().unwrap_or_default(),
                "Webhook delivery failed, max retries exceeded"
            );
            update.status = DeliveryStatus::Failed;
            return (update, RowOutcome::Failed);
        }

        let delay = retry_delay(
            self.policy.base_backoff,
            event.retry_backoff_multiplier,
            u32::try_from(attempts).unwrap_or(0),
            self.policy.max_backoff,
        );
        let next_retry_at = truncate_to_micros(now.saturating_add(to_time_duration(delay)));
        warn!(
            attempt = attempts,
            max_attempts,
            next_retry_at = %next_retry_at,
            error = update.last_error_message.as_deref().unwrap_or_default(),
            "Webhook delivery failed, scheduling retry"
        );
        update.status = DeliveryStatus::Retrying;
        update.next_retry_at = Some(next_retry_at);
        (update, RowOutcome::Retrying)
    }

    /// Hand a claimed row back without counting an attempt.
    async fn release(&self, event: &WebhookEvent, claimed_at: OffsetDateTime) -> RowOutcome {
        let now = self.clock.now();
        let mut update = DeliveryUpdate::from_event(event);
        if event.delivery_attempts == 0 {
            update.status = DeliveryStatus::Pending;
            update.next_retry_at = None;
        } else {
            update.status = DeliveryStatus::Retrying;
            update.next_retry_at = Some(now);
        }
        let finish = FinishWebhookDelivery {
            id: event.id,
            claimed_at,
            now,
            update,
        };
        match self.repository.finish_delivery(finish).await {
            Ok(true) => {
                info!("Shutdown requested, released webhook claim");
                RowOutcome::Released
            }
            Ok(false) => RowOutcome::Superseded,
            Err(e) => {
                error!(error = %e, "Failed to release webhook claim");
                RowOutcome::WriteError
            }
        }
    }

    /// Sign and POST one row. `Ok` only for a 2xx answer.
    async fn deliver(&self, event: &WebhookEvent) -> Result<DeliveryResponse, DeliveryError> {
        let body = build_envelope_body(event)?;
        let url = url::Url::parse(&event.webhook_url)
            .map_err(|e| DeliveryError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::InvalidUrl(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let secret = self.secret_for(event).await;
        let timestamp = self.clock.now().unix_timestamp();
        let signature = self.signer.sign(timestamp, &body, secret.as_deref());

        debug!(attempt = event.delivery_attempts + 1, "Sending webhook");
        let response = self
            .http_client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, format_signature_header(&signature))
            .header(TIMESTAMP_HEADER, timestamp.to_string())
            .header(EVENT_ID_HEADER, event.id.to_string())
            .header(EVENT_TYPE_HEADER, event.event_type.as_str())
            .body(body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        let body = read_truncated_body(response, self.policy.response_body_limit).await;
        if status.is_success() {
            Ok(DeliveryResponse {
                status: status.as_u16(),
                body,
            })
        } else {
            Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// The secret copied onto the row, else the live subscription's, else
    /// `None` so the signer uses its default.
    async fn secret_for(&self, event: &WebhookEvent) -> Option<String> {
        if !event.webhook_secret.is_empty() {
            return Some(event.webhook_secret.expose().to_owned());
        }
        match self.repository.subscription_by_url(&event.webhook_url).await {
            Ok(Some(subscription)) if !subscription.webhook_secret.is_empty() => {
                Some(subscription.webhook_secret.expose().to_owned())
            }
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "Subscription lookup failed, signing with default secret");
                None
            }
        }
    }
}

/// Serialize the envelope. The stored payload is embedded verbatim.
fn build_envelope_body(event: &WebhookEvent) -> Result<Vec<u8>, DeliveryError> {
    let payload = String::from_utf8(event.payload.clone())
        .map_err(|e| DeliveryError::Envelope(e.to_string()))?;
    let payload =
        RawValue::from_string(payload).map_err(|e| DeliveryError::Envelope(e.to_string()))?;
    let envelope = DeliveryEnvelope {
        event_id: event.id,
        event_type: event.event_type.clone(),
        event_version: event.event_version.clone(),
        event_source: event.event_source.clone(),
        timestamp: event.created_at,
        user_id: event.user_id,
        payload,
    };
    serde_json::to_vec(&envelope).map_err(|e| DeliveryError::Envelope(e.to_string()))
}

fn classify_request_error(error: reqwest::Error) -> DeliveryError {
    if error.is_timeout() {
        DeliveryError::Timeout
    } else if error.is_builder() {
        DeliveryError::InvalidUrl(error.to_string())
    } else {
        DeliveryError::Request(error)
    }
}

/// Read at most `limit` bytes of the body; the rest is never downloaded.
async fn read_truncated_body(mut response: reqwest::Response, limit: usize) -> String {
    let mut buffer = BytesMut::with_capacity(limit.min(8 * 1024));
    while buffer.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - buffer.len());
                buffer.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "Failed to read webhook response body");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Resolves once `shutdown` is `true`. Never resolves if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn to_time_duration(duration: std::time::Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}
