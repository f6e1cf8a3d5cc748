use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::gateway::{to_minor_units, PaymentGateway, RemoteOrderRequest};
use crate::models::line_item::LineItem;
use crate::models::order::{Model as OrderModel, OrderStatus};
use crate::services::order_ledger::OrderLedger;

/// Cart submitted for payment
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CheckoutRequest {
    pub buyer_id: Uuid,
    #[validate(length(min = 1, max = 50))]
    pub items: Vec<LineItem>,
    /// ISO 4217 code; defaults to the configured currency
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
}

/// What the client needs to open the gateway's payment UI
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    pub gateway_order_id: String,
    /// Major currency units
    #[schema(value_type = String, example = "500.00")]
    pub amount: rust_decimal::Decimal,
    pub currency: String,
    pub local_order_id: Uuid,
}

/// Opens gateway orders for local pending orders.
///
/// Never marks anything paid; the gateway order only gives later confirmations a
/// reference to correlate against.
#[derive(Clone)]
pub struct CheckoutService {
    ledger: OrderLedger,
    gateway: Arc<dyn PaymentGateway>,
    default_currency: String,
}

impl CheckoutService {
    pub fn new(
        ledger: OrderLedger,
        gateway: Arc<dyn PaymentGateway>,
        default_currency: String,
    ) -> Self {
        Self {
            ledger,
            gateway,
            default_currency,
        }
    }

    /// Records a pending order for the cart and opens its gateway order.
    ///
    /// On `GatewayUnavailable` the pending order stays behind without a reference; the
    /// client retries the whole checkout.
    #[instrument(skip(self, request), fields(buyer_id = %request.buyer_id))]
    pub async fn create_checkout(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutSession, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
        }

        let currency = request
            .currency
            .unwrap_or_else(|| self.default_currency.clone())
            .to_ascii_uppercase();

        let amount = crate::models::line_item::total_price(&request.items)?;
        if to_minor_units(amount)? == 0 {
            return Err(ServiceError::ValidationError(
                "order amount must be greater than zero".into(),
            ));
        }

        let order = self
            .ledger
            .create_pending_order(request.buyer_id, request.items, &currency)
            .await?;
        self.open_remote_order(order).await
    }

    /// Opens the gateway order for an existing pending order, e.g. an activated
    /// consultation. Returns the stored reference if one is already attached.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn checkout_existing(&self, order_id: Uuid) -> Result<CheckoutSession, ServiceError> {
        let order = self.ledger.get(order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(ServiceError::InvalidState(format!(
                "order {} is {}, only pending orders can be checked out",
                order.id, order.status
            )));
        }

        if let Some(reference) = order.external_reference.clone() {
            return Ok(session(&order, reference));
        }
        self.open_remote_order(order).await
    }

    async fn open_remote_order(&self, order: OrderModel) -> Result<CheckoutSession, ServiceError> {
        let amount_minor = to_minor_units(order.amount)?;
        if amount_minor == 0 {
            return Err(ServiceError::ValidationError(
                "order amount must be greater than zero".into(),
            ));
        }

        let remote = self
            .gateway
            .create_remote_order(RemoteOrderRequest {
                amount_minor,
                currency: order.currency.clone(),
                receipt: order.id.to_string(),
                buyer_id: order.buyer_id,
            })
            .await?;

        if remote.amount_minor != amount_minor {
            warn!(
                order_id = %order.id,
                requested = amount_minor,
                created = remote.amount_minor,
                "Gateway order amount differs from request"
            );
        }

        let order = self
            .ledger
            .attach_external_reference(order.id, &remote.id)
            .await?;
        let reference = order.external_reference.clone().unwrap_or(remote.id);
        info!(order_id = %order.id, gateway_order_id = %reference, "Checkout opened");
        Ok(session(&order, reference))
    }
}

fn session(order: &OrderModel, gateway_order_id: String) -> CheckoutSession {
    CheckoutSession {
        gateway_order_id,
        amount: order.amount,
        currency: order.currency.clone(),
        local_order_id: order.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::line_item::{BillingPeriod, ItemKind};
    use crate::test_support::{memory_db, StubGateway};
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn item(price: Decimal) -> LineItem {
        LineItem {
            item_kind: ItemKind::Service,
            item_id: Uuid::new_v4(),
            price,
            billing_period: BillingPeriod::OneTime,
            selected_features: vec![],
        }
    }

    fn request(items: Vec<LineItem>) -> CheckoutRequest {
        CheckoutRequest {
            buyer_id: Uuid::new_v4(),
            items,
            currency: None,
        }
    }

    #[tokio::test]
    async fn checkout_opens_gateway_order_for_cart_total() {
        let db = memory_db().await;
        let ledger = OrderLedger::new(db);
        let gateway = Arc::new(StubGateway::default());
        let service = CheckoutService::new(ledger.clone(), gateway.clone(), "INR".into());

        let session = service
            .create_checkout(request(vec![item(dec!(300)), item(dec!(200))]))
            .await
            .unwrap();

        assert_eq!(session.amount, dec!(500));
        assert_eq!(session.currency, "INR");
        assert_eq!(session.gateway_order_id, "order_stub_1");
        let stored = ledger.get(session.local_order_id).await.unwrap();
        assert_eq!(stored.external_reference.as_deref(), Some("order_stub_1"));
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(gateway.created_count(), 1);
    }

    #[tokio::test]
    async fn zero_total_cart_never_reaches_the_ledger() {
        let db = memory_db().await;
        let gateway = Arc::new(StubGateway::default());
        let service = CheckoutService::new(OrderLedger::new(db), gateway.clone(), "INR".into());

        assert_matches!(
            service.create_checkout(request(vec![item(dec!(0))])).await,
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn oversized_cart_is_rejected_without_side_effects() {
        let db = memory_db().await;
        let gateway = Arc::new(StubGateway::default());
        let service = CheckoutService::new(OrderLedger::new(db), gateway.clone(), "INR".into());

        let huge = "79228162514264337593543950335".parse::<Decimal>().unwrap();
        assert_matches!(
            service.create_checkout(request(vec![item(huge), item(dec!(1))])).await,
            Err(ServiceError::ValidationError(_))
        );

        // Each price fits the amount column but the total does not
        let near_limit = dec!(60000000000000);
        assert_matches!(
            service
                .create_checkout(request(vec![item(near_limit), item(near_limit)]))
                .await,
            Err(ServiceError::ValidationError(_))
        );
        assert_eq!(gateway.created_count(), 0);
    }

    #[tokio::test]
    async fn gateway_outage_leaves_unreferenced_pending_order() {
        let db = memory_db().await;
        let ledger = OrderLedger::new(db);
        let service = CheckoutService::new(
            ledger.clone(),
            Arc::new(StubGateway::unavailable()),
            "INR".into(),
        );

        assert_matches!(
            service.create_checkout(request(vec![item(dec!(500))])).await,
            Err(ServiceError::GatewayUnavailable(_))
        );
        assert!(ledger
            .find_by_external_reference("order_stub_1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn existing_order_checkout_reuses_reference() {
        let db = memory_db().await;
        let ledger = OrderLedger::new(db);
        let gateway = Arc::new(StubGateway::default());
        let service = CheckoutService::new(ledger.clone(), gateway.clone(), "INR".into());

        let order = ledger
            .create_pending_order(Uuid::new_v4(), vec![item(dec!(750))], "INR")
            .await
            .unwrap();

        let first = service.checkout_existing(order.id).await.unwrap();
        let second = service.checkout_existing(order.id).await.unwrap();
        assert_eq!(first.gateway_order_id, second.gateway_order_id);
        assert_eq!(first.amount, dec!(750));
        assert_eq!(gateway.created_count(), 1);
    }

    #[tokio::test]
    async fn existing_order_checkout_requires_pending() {
        let db = memory_db().await;
        let ledger = OrderLedger::new(db);
        let service =
            CheckoutService::new(ledger.clone(), Arc::new(StubGateway::default()), "INR".into());

        let consultation = ledger
            .create_consultation_order(Uuid::new_v4(), item(dec!(0)), "INR")
            .await
            .unwrap();
        assert_matches!(
            service.checkout_existing(consultation.id).await,
            Err(ServiceError::InvalidState(_))
        );
        assert_matches!(
            service.checkout_existing(Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        );
    }
}
