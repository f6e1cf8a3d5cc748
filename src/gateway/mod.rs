//! Payment gateway boundary.
//!
//! The ledger keeps money in major units (rupees); the gateway speaks minor units
//! (paise). [`to_minor_units`] and [`from_minor_units`] are the only conversions.

pub mod razorpay;
pub mod signature;

use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ServiceError;

pub use razorpay::{RazorpayConfig, RazorpayGateway};

const MINOR_UNIT_SCALE: u32 = 2;

/// Request to open a remote order that later confirmations correlate against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteOrderRequest {
    pub amount_minor: i64,
    pub currency: String,
    /// Local order id, echoed back by the gateway as the receipt
    pub receipt: String,
    pub buyer_id: Uuid,
}

/// Order as created on the gateway side.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RemoteOrder {
    pub id: String,
    pub amount_minor: i64,
    pub currency: String,
}

/// Payment details carried by a webhook event.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentNotice {
    /// Gateway order id, i.e. the local `external_reference`
    pub external_reference: String,
    pub payment_id: String,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub method: Option<String>,
    pub error_description: Option<String>,
}

/// Webhook events the reconciler acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    PaymentCaptured(PaymentNotice),
    PaymentFailed(PaymentNotice),
    /// Any event type this service does not consume
    Ignored(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a remote order. Fails with `GatewayUnavailable` on provider error or timeout.
    async fn create_remote_order(
        &self,
        request: RemoteOrderRequest,
    ) -> Result<RemoteOrder, ServiceError>;

    /// Local check of the checkout callback signature. Never performs I/O.
    fn verify_client_signature(&self, order_id: &str, payment_id: &str, signature: &str) -> bool;

    /// Local check of a webhook signature over the raw request body.
    fn verify_webhook_signature(&self, raw_body: &[u8], signature: &str) -> bool;

    /// Decodes a webhook body whose signature already verified.
    fn parse_webhook_event(&self, raw_body: &[u8]) -> Result<GatewayEvent, ServiceError>;
}

/// Converts a major-unit amount to the gateway's minor unit.
///
/// Rejects negative amounts and amounts with sub-minor-unit precision.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount < Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "amount {} must not be negative",
            amount
        )));
    }

    let minor = amount
        .checked_mul(Decimal::new(10_i64.pow(MINOR_UNIT_SCALE), 0))
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))?;

    if !minor.fract().is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "amount {} has more than {} decimal places",
            amount, MINOR_UNIT_SCALE
        )));
    }

    minor
        .to_i64()
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} out of range", amount)))
}

/// Converts a gateway minor-unit amount back to major units.
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}
