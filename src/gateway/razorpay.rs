use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};

use super::signature::{client_signature_payload, verify_hmac_sha256_hex};
use super::{GatewayEvent, PaymentGateway, PaymentNotice, RemoteOrder, RemoteOrderRequest};
use crate::config::AppConfig;
use crate::errors::ServiceError;

const ORDERS_PATH: &str = "/v1/orders";
const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";
const EVENT_PAYMENT_FAILED: &str = "payment.failed";

/// Connection settings for the Razorpay REST API
#[derive(Debug, Clone)]
pub struct RazorpayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub timeout: Duration,
}

impl From<&AppConfig> for RazorpayConfig {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            base_url: cfg.gateway_base_url.clone(),
            key_id: cfg.gateway_key_id.clone(),
            key_secret: cfg.gateway_key_secret.clone(),
            webhook_secret: cfg.gateway_webhook_secret.clone(),
            timeout: cfg.gateway_timeout(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    amount: i64,
    currency: &'a str,
    receipt: &'a str,
    notes: OrderNotes<'a>,
}

#[derive(Debug, Serialize)]
struct OrderNotes<'a> {
    buyer_id: String,
    local_order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    id: String,
    amount: i64,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    #[serde(default)]
    payload: Option<WebhookPayload>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    payment: Option<EntityWrapper>,
}

#[derive(Debug, Deserialize)]
struct EntityWrapper {
    entity: PaymentEntity,
}

#[derive(Debug, Deserialize)]
struct PaymentEntity {
    id: String,
    order_id: Option<String>,
    amount: Option<i64>,
    currency: Option<String>,
    method: Option<String>,
    error_description: Option<String>,
}

/// Razorpay-backed [`PaymentGateway`].
#[derive(Clone)]
pub struct RazorpayGateway {
    client: reqwest::Client,
    config: RazorpayConfig,
}

impl RazorpayGateway {
    pub fn new(config: RazorpayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("gateway client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn orders_url(&self) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), ORDERS_PATH)
    }
}

fn unavailable(reason: impl Into<String>) -> ServiceError {
    counter!("payments.gateway.failures", 1);
    ServiceError::GatewayUnavailable(reason.into())
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount_minor = request.amount_minor))]
    async fn create_remote_order(
        &self,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrder, ServiceError> {
        let body = CreateOrderBody {
            amount: request.amount_minor,
            currency: &request.currency,
            receipt: &request.receipt,
            notes: OrderNotes {
                buyer_id: request.buyer_id.to_string(),
                local_order_id: &request.receipt,
            },
        };

        let response = self
            .client
            .post(self.orders_url())
            .basic_auth(&self.config.key_id, Some(&self.config.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    warn!("Gateway order creation timed out");
                    unavailable("gateway request timed out")
                } else {
                    warn!(error = %e, "Gateway order creation failed");
                    unavailable(format!("gateway request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(%status, "Gateway rejected order creation");
            return Err(unavailable(format!(
                "gateway responded with {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let created: CreateOrderResponse = response
            .json()
            .await
            .map_err(|e| unavailable(format!("unreadable gateway response: {}", e)))?;

        info!(gateway_order_id = %created.id, "Gateway order created");

        Ok(RemoteOrder {
            id: created.id,
            amount_minor: created.amount,
            currency: created.currency,
        })
    }

    fn verify_client_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        let payload = client_signature_payload(order_id, payment_id);
        verify_hmac_sha256_hex(
            self.config.key_secret.as_bytes(),
            payload.as_bytes(),
            signature,
        )
    }

    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool {
        verify_hmac_sha256_hex(self.config.webhook_secret.as_bytes(), raw_body, signature)
    }

    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<GatewayEvent, ServiceError> {
        parse_webhook_event(raw_body)
    }
}

/// Decodes a Razorpay webhook body.
pub fn parse_webhook_event(raw_body: &[u8]) -> Result<GatewayEvent, ServiceError> {
    let envelope: WebhookEnvelope = serde_json::from_slice(raw_body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid webhook body: {}", e)))?;

    if envelope.event != EVENT_PAYMENT_CAPTURED && envelope.event != EVENT_PAYMENT_FAILED {
        return Ok(GatewayEvent::Ignored(envelope.event));
    }

    let entity = envelope
        .payload
        .and_then(|payload| payload.payment)
        .map(|wrapper| wrapper.entity)
        .ok_or_else(|| {
            ServiceError::BadRequest(format!("{} event without payment entity", envelope.event))
        })?;

    let external_reference = entity.order_id.ok_or_else(|| {
        ServiceError::BadRequest(format!("payment {} carries no order_id", entity.id))
    })?;

    let notice = PaymentNotice {
        external_reference,
        payment_id: entity.id,
        amount_minor: entity.amount,
        currency: entity.currency,
        method: entity.method,
        error_description: entity.error_description,
    };

    Ok(if envelope.event == EVENT_PAYMENT_CAPTURED {
        GatewayEvent::PaymentCaptured(notice)
    } else {
        GatewayEvent::PaymentFailed(notice)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::signature::hmac_sha256_hex;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn gateway() -> RazorpayGateway {
        RazorpayGateway::new(RazorpayConfig {
            base_url: "http://127.0.0.1:9".into(),
            key_id: "rzp_test_key".into(),
            key_secret: "key_secret".into(),
            webhook_secret: "webhook_secret".into(),
            timeout: Duration::from_secs(1),
        })
        .unwrap()
    }

    #[test]
    fn client_signature_uses_key_secret() {
        let gw = gateway();
        let sig = hmac_sha256_hex(b"key_secret", b"order_A|pay_B").unwrap();
        assert!(gw.verify_client_signature("order_A", "pay_B", &sig));
        assert!(!gw.verify_client_signature("order_A", "pay_C", &sig));

        let webhook_keyed = hmac_sha256_hex(b"webhook_secret", b"order_A|pay_B").unwrap();
        assert!(!gw.verify_client_signature("order_A", "pay_B", &webhook_keyed));
    }

    #[test]
    fn webhook_signature_uses_webhook_secret() {
        let gw = gateway();
        let body = br#"{"event":"payment.captured"}"#;
        let sig = hmac_sha256_hex(b"webhook_secret", body).unwrap();
        assert!(gw.verify_webhook_signature(body, &sig));
        assert!(!gw.verify_webhook_signature(br#"{"event":"payment.failed"}"#, &sig));
        assert!(!gw.verify_webhook_signature(body, "not-a-signature"));
    }

    #[test]
    fn parses_captured_event() {
        let body = json!({
            "entity": "event",
            "event": "payment.captured",
            "payload": {"payment": {"entity": {
                "id": "pay_1",
                "order_id": "order_1",
                "amount": 50000,
                "currency": "INR",
                "status": "captured",
                "method": "upi"
            }}}
        })
        .to_string();

        let event = parse_webhook_event(body.as_bytes()).unwrap();
        assert_matches!(event, GatewayEvent::PaymentCaptured(notice) => {
            assert_eq!(notice.external_reference, "order_1");
            assert_eq!(notice.payment_id, "pay_1");
            assert_eq!(notice.amount_minor, Some(50_000));
            assert_eq!(notice.method.as_deref(), Some("upi"));
        });
    }

    #[test]
    fn parses_failed_event_with_reason() {
        let body = json!({
            "event": "payment.failed",
            "payload": {"payment": {"entity": {
                "id": "pay_2",
                "order_id": "order_2",
                "status": "failed",
                "error_description": "Card declined"
            }}}
        })
        .to_string();

        let event = parse_webhook_event(body.as_bytes()).unwrap();
        assert_matches!(event, GatewayEvent::PaymentFailed(notice) => {
            assert_eq!(notice.error_description.as_deref(), Some("Card declined"));
        });
    }

    #[test]
    fn unknown_events_are_ignored_and_garbage_is_rejected() {
        let body = json!({"event": "refund.processed", "payload": {}}).to_string();
        assert_eq!(
            parse_webhook_event(body.as_bytes()).unwrap(),
            GatewayEvent::Ignored("refund.processed".into())
        );

        assert_matches!(
            parse_webhook_event(b"not json"),
            Err(ServiceError::BadRequest(_))
        );

        let missing_order = json!({
            "event": "payment.captured",
            "payload": {"payment": {"entity": {"id": "pay_3"}}}
        })
        .to_string();
        assert_matches!(
            parse_webhook_event(missing_order.as_bytes()),
            Err(ServiceError::BadRequest(_))
        );
    }
}
