//! Best-effort buyer notifications.
//!
//! [`NotificationDispatcher::dispatch`] is deliberately not `async`: delivery runs on a
//! spawned task and its outcome is only logged, so a committed payment transition can
//! never be failed or delayed by a notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::gateway::signature::hmac_sha256_hex;

pub const SIGNATURE_HEADER: &str = "X-Notification-Signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NotificationTemplate {
    PaymentConfirmed,
    PaymentFailed,
    ConsultationRequested,
    ConsultationPriced,
}

/// A single message for a buyer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub template: NotificationTemplate,
    pub recipient: Uuid,
    pub order_id: Uuid,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        template: NotificationTemplate,
        recipient: Uuid,
        order_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template,
            recipient,
            order_id,
            data,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Writes notifications to the structured log
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            template = %notification.template,
            recipient = %notification.recipient,
            order_id = %notification.order_id,
            data = %notification.data,
            "notification"
        );
        Ok(())
    }
}

/// POSTs notifications as signed JSON to an external delivery service
#[derive(Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    secret: String,
    max_retries: u32,
}

impl WebhookNotifier {
    pub fn new(url: String, secret: String) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        Ok(Self {
            client,
            url,
            secret,
            max_retries: 3,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, notification), fields(template = %notification.template))]
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        let body = serde_json::to_vec(notification)?;
        let signature = hmac_sha256_hex(self.secret.as_bytes(), &body)
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        for attempt in 1..=self.max_retries {
            let request = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .header(SIGNATURE_HEADER, &signature)
                .body(body.clone());

            match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => warn!(
                    "Notification delivery failed with status: {} (attempt {}/{})",
                    response.status(),
                    attempt,
                    self.max_retries
                ),
                Err(e) => warn!(
                    "Notification delivery error: {} (attempt {}/{})",
                    e, attempt, self.max_retries
                ),
            }

            // Exponential backoff: 1s, 2s, 4s
            if attempt < self.max_retries {
                tokio::time::sleep(Duration::from_secs(2_u64.pow(attempt - 1))).await;
            }
        }

        Err(NotificationError::Delivery(format!(
            "gave up after {} attempts",
            self.max_retries
        )))
    }
}

/// Fire-and-forget front for a [`Notifier`]
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Picks the webhook notifier when a URL is configured, the log notifier otherwise.
    pub fn from_config(config: &AppConfig) -> Result<Self, NotificationError> {
        match (
            config.notification_webhook_url.clone(),
            config.notification_webhook_secret.clone(),
        ) {
            (Some(url), Some(secret)) => Ok(Self::new(Arc::new(WebhookNotifier::new(
                url, secret,
            )?))),
            _ => Ok(Self::new(Arc::new(LogNotifier))),
        }
    }

    /// Queues delivery and returns immediately. Failures are logged, never returned.
    pub fn dispatch(&self, notification: Notification) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                template = %notification.template,
                "No async runtime available; notification dropped"
            );
            return;
        };

        let notifier = Arc::clone(&self.notifier);
        runtime.spawn(async move {
            if let Err(e) = notifier.deliver(&notification).await {
                counter!("payments.notifications.failed", 1);
                error!(
                    template = %notification.template,
                    order_id = %notification.order_id,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        });
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LogNotifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    struct ChannelNotifier(mpsc::UnboundedSender<Notification>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
            let _ = self.0.send(notification.clone());
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn deliver(&self, _: &Notification) -> Result<(), NotificationError> {
            Err(NotificationError::Delivery("smtp down".into()))
        }
    }

    fn sample() -> Notification {
        Notification::new(
            NotificationTemplate::PaymentConfirmed,
            Uuid::new_v4(),
            Uuid::new_v4(),
            json!({"amount": "500"}),
        )
    }

    #[tokio::test]
    async fn dispatch_delivers_in_background() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = NotificationDispatcher::new(Arc::new(ChannelNotifier(tx)));

        let notification = sample();
        dispatcher.dispatch(notification.clone());

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.id, notification.id);
        assert_eq!(delivered.template, NotificationTemplate::PaymentConfirmed);
    }

    #[tokio::test]
    async fn failing_notifier_does_not_surface_to_caller() {
        let dispatcher = NotificationDispatcher::new(Arc::new(FailingNotifier));
        dispatcher.dispatch(sample());
        tokio::task::yield_now().await;
    }

    #[test]
    fn dispatch_without_runtime_is_dropped() {
        NotificationDispatcher::default().dispatch(sample());
    }

    #[test]
    fn template_names_are_snake_case() {
        assert_eq!(
            NotificationTemplate::ConsultationPriced.to_string(),
            "consultation_priced"
        );
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["template"], "payment_confirmed");
    }
}
