//! Confirmation reconciler.
//!
//! The checkout callback and the gateway webhook both try to move an order out of
//! `pending`. They may arrive in any order, more than once, or not at all. Both paths
//! end in the same conditional status write followed by the same idempotent
//! fulfillment, so whichever arrives first does the work and the other is a no-op.

use metrics::counter;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::errors::ServiceError;
use crate::gateway::{from_minor_units, GatewayEvent, PaymentGateway, PaymentNotice};
use crate::models::entitlement::Model as EntitlementModel;
use crate::models::order::{Model as OrderModel, OrderStatus};
use crate::notifications::{Notification, NotificationDispatcher, NotificationTemplate};
use crate::services::entitlements::EntitlementWriter;
use crate::services::order_ledger::{OrderLedger, TransitionDetails};

/// Body of the checkout callback the paying client posts after the gateway UI closes.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientConfirmation {
    /// Gateway order id returned by checkout
    #[validate(length(min = 1, max = 128))]
    pub external_reference: String,
    #[validate(length(min = 1, max = 128))]
    pub payment_id: String,
    #[validate(length(min = 1, max = 256))]
    pub signature: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationPath {
    Client,
    Webhook,
}

/// What a confirmation did to the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConfirmationOutcome {
    /// This call performed the status transition
    Applied,
    /// Another confirmation got there first
    AlreadyHandled,
    /// Nothing to do: unknown event, unknown order or a status that cannot move
    Ignored,
}

/// Result of a client confirmation
#[derive(Debug, Clone)]
pub struct VerifiedPayment {
    pub order: OrderModel,
    pub entitlements: Vec<EntitlementModel>,
    pub outcome: ConfirmationOutcome,
}

#[derive(Clone)]
pub struct ConfirmationReconciler {
    ledger: OrderLedger,
    entitlements: EntitlementWriter,
    gateway: Arc<dyn PaymentGateway>,
    notifications: NotificationDispatcher,
}

impl ConfirmationReconciler {
    pub fn new(
        ledger: OrderLedger,
        entitlements: EntitlementWriter,
        gateway: Arc<dyn PaymentGateway>,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            ledger,
            entitlements,
            gateway,
            notifications,
        }
    }

    /// Handles the checkout callback.
    ///
    /// A bad signature is rejected before the ledger is read. An order that another
    /// confirmation already completed is reported with its existing entitlements.
    #[instrument(skip(self, confirmation), fields(external_reference = %confirmation.external_reference))]
    pub async fn verify_client_payment(
        &self,
        confirmation: ClientConfirmation,
    ) -> Result<VerifiedPayment, ServiceError> {
        if !self.gateway.verify_client_signature(
            &confirmation.external_reference,
            &confirmation.payment_id,
            &confirmation.signature,
        ) {
            record(ConfirmationPath::Client, "rejected");
            warn!("Client payment signature rejected");
            return Err(ServiceError::InvalidSignature);
        }

        let order = self
            .ledger
            .find_by_external_reference(&confirmation.external_reference)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No order for gateway reference {}",
                    confirmation.external_reference
                ))
            })?;

        let details = TransitionDetails {
            payment_id: Some(confirmation.payment_id),
            ..Default::default()
        };
        let (order, entitlements, outcome) = self
            .complete(order, details, ConfirmationPath::Client)
            .await?;

        Ok(VerifiedPayment {
            order,
            entitlements,
            outcome,
        })
    }

    /// Handles a gateway webhook delivery.
    ///
    /// Only a bad signature or a storage failure is an error; the caller acknowledges
    /// everything else so the gateway stops retrying.
    #[instrument(skip(self, raw_body, signature), fields(body_len = raw_body.len()))]
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: &str,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        if !self.gateway.verify_webhook_signature(raw_body, signature) {
            record(ConfirmationPath::Webhook, "rejected");
            warn!("Webhook signature rejected");
            return Err(ServiceError::InvalidSignature);
        }

        let event = match self.gateway.parse_webhook_event(raw_body) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Signed webhook body could not be decoded; acknowledging");
                record(ConfirmationPath::Webhook, "ignored");
                return Ok(ConfirmationOutcome::Ignored);
            }
        };

        let outcome = match event {
            GatewayEvent::PaymentCaptured(notice) => self.on_captured(notice).await?,
            GatewayEvent::PaymentFailed(notice) => self.on_failed(notice).await?,
            GatewayEvent::Ignored(event) => {
                info!(%event, "Webhook event not consumed");
                record(ConfirmationPath::Webhook, "ignored");
                ConfirmationOutcome::Ignored
            }
        };
        Ok(outcome)
    }

    async fn on_captured(&self, notice: PaymentNotice) -> Result<ConfirmationOutcome, ServiceError> {
        let Some(order) = self.locate(&notice).await? else {
            return Ok(ConfirmationOutcome::Ignored);
        };

        if let Some(amount_minor) = notice.amount_minor {
            let captured = from_minor_units(amount_minor);
            if captured != order.amount {
                warn!(
                    order_id = %order.id,
                    order_amount = %order.amount,
                    captured_amount = %captured,
                    "Captured amount differs from order amount"
                );
            }
        }

        let details = TransitionDetails {
            payment_id: Some(notice.payment_id),
            payment_method: notice.method,
            failure_reason: None,
        };
        let (_, _, outcome) = self
            .complete(order, details, ConfirmationPath::Webhook)
            .await?;
        Ok(outcome)
    }

    async fn on_failed(&self, notice: PaymentNotice) -> Result<ConfirmationOutcome, ServiceError> {
        let Some(order) = self.locate(&notice).await? else {
            return Ok(ConfirmationOutcome::Ignored);
        };

        let details = TransitionDetails {
            payment_id: Some(notice.payment_id),
            payment_method: notice.method,
            failure_reason: notice.error_description,
        };

        match self
            .ledger
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Failed, details)
            .await
        {
            Ok(failed) => {
                record(ConfirmationPath::Webhook, "applied");
                info!(order_id = %failed.id, "Payment failed; order marked failed");
                self.notifications.dispatch(Notification::new(
                    NotificationTemplate::PaymentFailed,
                    failed.buyer_id,
                    failed.id,
                    serde_json::json!({
                        "amount": failed.amount.to_string(),
                        "currency": failed.currency,
                        "reason": failed.failure_reason,
                    }),
                ));
                Ok(ConfirmationOutcome::Applied)
            }
            Err(ServiceError::InvalidTransition { actual, .. }) => {
                record(ConfirmationPath::Webhook, "already_handled");
                info!(order_id = %order.id, %actual, "payment.failed for an order that already left pending");
                Ok(ConfirmationOutcome::AlreadyHandled)
            }
            Err(e) => Err(e),
        }
    }

    async fn locate(&self, notice: &PaymentNotice) -> Result<Option<OrderModel>, ServiceError> {
        let order = self
            .ledger
            .find_by_external_reference(&notice.external_reference)
            .await?;
        if order.is_none() {
            warn!(
                external_reference = %notice.external_reference,
                "Webhook for unknown gateway order; acknowledging"
            );
            record(ConfirmationPath::Webhook, "ignored");
        }
        Ok(order)
    }

    /// Shared `pending -> completed` step: transition, absorb a lost race, fulfill.
    async fn complete(
        &self,
        order: OrderModel,
        details: TransitionDetails,
        path: ConfirmationPath,
    ) -> Result<(OrderModel, Vec<EntitlementModel>, ConfirmationOutcome), ServiceError> {
        let (order, outcome) = match self
            .ledger
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Completed, details)
            .await
        {
            Ok(completed) => (completed, ConfirmationOutcome::Applied),
            Err(ServiceError::InvalidTransition {
                actual: OrderStatus::Completed,
                ..
            }) => (
                self.ledger.get(order.id).await?,
                ConfirmationOutcome::AlreadyHandled,
            ),
            Err(ServiceError::InvalidTransition { actual, .. }) => {
                record(path, "ignored");
                warn!(
                    order_id = %order.id,
                    %actual,
                    %path,
                    "Payment confirmation for an order that cannot complete"
                );
                let current = self.ledger.get(order.id).await?;
                return Ok((current, Vec::new(), ConfirmationOutcome::Ignored));
            }
            Err(e) => return Err(e),
        };

        // Runs on every completed confirmation so a crash between the status write and
        // the grants is repaired by the next delivery.
        let entitlements = self.entitlements.fulfill(&order).await?;

        record(path, outcome.into());
        if outcome == ConfirmationOutcome::Applied {
            info!(order_id = %order.id, %path, "Payment confirmed");
            self.notifications.dispatch(Notification::new(
                NotificationTemplate::PaymentConfirmed,
                order.buyer_id,
                order.id,
                serde_json::json!({
                    "amount": order.amount.to_string(),
                    "currency": order.currency,
                    "entitlements": entitlements.iter().map(|e| e.item_id).collect::<Vec<_>>(),
                }),
            ));
        }

        Ok((order, entitlements, outcome))
    }
}

fn record(path: ConfirmationPath, outcome: &'static str) {
    let path: &'static str = path.into();
    counter!("payments.confirmations", 1, "path" => path, "outcome" => outcome);
}
