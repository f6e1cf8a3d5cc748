use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::models::line_item::{BillingPeriod, ItemKind, LineItem, MAX_AMOUNT};
use crate::models::order::{Model as OrderModel, OrderStatus};
use crate::notifications::{Notification, NotificationDispatcher, NotificationTemplate};
use crate::services::order_ledger::{ConsultationActivation, OrderLedger};

const MAX_PRICE_SCALE: u32 = 2;

/// A buyer asking for a free consultation on a catalog item
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConsultationRequest {
    pub buyer_id: Uuid,
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    #[serde(default)]
    pub billing_period: BillingPeriod,
    #[serde(default)]
    #[validate(length(max = 32))]
    pub selected_features: Vec<String>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
}

/// Staff-assigned price for a consultation
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ActivateConsultationRequest {
    #[schema(value_type = String, example = "750.00")]
    pub price: Decimal,
}

/// Free consultations and their retroactive pricing by staff.
#[derive(Clone)]
pub struct ConsultationService {
    ledger: OrderLedger,
    notifications: NotificationDispatcher,
    default_currency: String,
}

impl ConsultationService {
    pub fn new(
        ledger: OrderLedger,
        notifications: NotificationDispatcher,
        default_currency: String,
    ) -> Self {
        Self {
            ledger,
            notifications,
            default_currency,
        }
    }

    /// Records a `free_consultation` order with amount 0.
    #[instrument(skip(self, request), fields(buyer_id = %request.buyer_id, item_id = %request.item_id))]
    pub async fn request(&self, request: ConsultationRequest) -> Result<OrderModel, ServiceError> {
        request.validate()?;
        let currency = request
            .currency
            .unwrap_or_else(|| self.default_currency.clone())
            .to_ascii_uppercase();

        let line_item = LineItem {
            item_kind: request.item_kind,
            item_id: request.item_id,
            price: Decimal::ZERO,
            billing_period: request.billing_period,
            selected_features: request.selected_features,
        };
        let order = self
            .ledger
            .create_consultation_order(request.buyer_id, line_item, &currency)
            .await?;

        self.notifications.dispatch(Notification::new(
            NotificationTemplate::ConsultationRequested,
            order.buyer_id,
            order.id,
            serde_json::json!({ "itemId": request.item_id }),
        ));
        Ok(order)
    }

    /// Prices a consultation and re-enters it into the payable lifecycle as `pending`.
    ///
    /// `InvalidPrice` for a price that is not positive or has sub-paise precision;
    /// `InvalidState` when the order is no longer a free consultation.
    #[instrument(skip(self), fields(order_id = %order_id, staff_id = %staff_id))]
    pub async fn activate(
        &self,
        order_id: Uuid,
        price: Decimal,
        staff_id: Uuid,
    ) -> Result<OrderModel, ServiceError> {
        validate_price(price)?;

        let order = self
            .ledger
            .activate_consultation(
                order_id,
                ConsultationActivation {
                    price,
                    staff_id,
                    activated_at: Utc::now(),
                },
            )
            .await?;

        info!(amount = %order.amount, "Consultation activated");
        self.notifications.dispatch(Notification::new(
            NotificationTemplate::ConsultationPriced,
            order.buyer_id,
            order.id,
            serde_json::json!({
                "amount": order.amount.to_string(),
                "currency": order.currency,
            }),
        ));
        Ok(order)
    }

    pub async fn list(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        self.ledger.list_consultations(status, page, per_page).await
    }
}

fn validate_price(price: Decimal) -> Result<(), ServiceError> {
    if price <= Decimal::ZERO {
        return Err(ServiceError::InvalidPrice(format!(
            "price must be greater than zero, got {}",
            price
        )));
    }
    if price > MAX_AMOUNT {
        return Err(ServiceError::InvalidPrice(format!(
            "price {} exceeds the maximum order amount {}",
            price, MAX_AMOUNT
        )));
    }
    if price.normalize().scale() > MAX_PRICE_SCALE {
        return Err(ServiceError::InvalidPrice(format!(
            "price {} has more than {} decimal places",
            price, MAX_PRICE_SCALE
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    #[test]
    fn price_must_be_positive_with_at_most_two_decimals() {
        assert!(validate_price(dec!(750)).is_ok());
        assert!(validate_price(dec!(0.01)).is_ok());
        assert!(validate_price(dec!(99.500)).is_ok());
        assert_matches!(validate_price(dec!(0)), Err(ServiceError::InvalidPrice(_)));
        assert_matches!(validate_price(dec!(-10)), Err(ServiceError::InvalidPrice(_)));
        assert_matches!(validate_price(dec!(1.005)), Err(ServiceError::InvalidPrice(_)));
    }

    #[test]
    fn price_is_bounded_by_amount_column() {
        assert!(validate_price(MAX_AMOUNT).is_ok());
        assert_matches!(
            validate_price(dec!(100000000000000)),
            Err(ServiceError::InvalidPrice(_))
        );
        assert_matches!(validate_price(Decimal::MAX), Err(ServiceError::InvalidPrice(_)));
    }

    fn service(db: std::sync::Arc<crate::db::DbPool>) -> ConsultationService {
        ConsultationService::new(
            OrderLedger::new(db),
            NotificationDispatcher::default(),
            "INR".into(),
        )
    }

    fn consultation_request() -> ConsultationRequest {
        ConsultationRequest {
            buyer_id: Uuid::new_v4(),
            item_kind: ItemKind::Service,
            item_id: Uuid::new_v4(),
            billing_period: BillingPeriod::OneTime,
            selected_features: vec!["gst-filing".into()],
            currency: None,
        }
    }

    #[tokio::test]
    async fn activation_prices_and_reopens_consultation() {
        let service = service(crate::test_support::memory_db().await);
        let order = service.request(consultation_request()).await.unwrap();
        assert_eq!(order.status, OrderStatus::FreeConsultation);
        assert_eq!(order.amount, Decimal::ZERO);
        assert!(order.is_consultation);

        let staff = Uuid::new_v4();
        let priced = service.activate(order.id, dec!(750), staff).await.unwrap();
        assert_eq!(priced.status, OrderStatus::Pending);
        assert_eq!(priced.amount, dec!(750));
        assert_eq!(priced.consultation_price, Some(dec!(750)));
        assert!(priced.price_activated_by_staff);
        assert_eq!(priced.activated_by, Some(staff));
        assert!(priced.activated_at.is_some());
        assert_eq!(priced.line_items().unwrap()[0].price, dec!(750));

        assert_matches!(
            service.activate(order.id, dec!(800), staff).await,
            Err(ServiceError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn invalid_price_leaves_consultation_untouched() {
        let db = crate::test_support::memory_db().await;
        let service = service(db.clone());
        let order = service.request(consultation_request()).await.unwrap();

        assert_matches!(
            service.activate(order.id, dec!(0), Uuid::new_v4()).await,
            Err(ServiceError::InvalidPrice(_))
        );
        let stored = OrderLedger::new(db).get(order.id).await.unwrap();
        assert_eq!(stored.status, OrderStatus::FreeConsultation);
        assert_eq!(stored.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn queue_filters_by_status() {
        let service = service(crate::test_support::memory_db().await);
        let first = service.request(consultation_request()).await.unwrap();
        service.request(consultation_request()).await.unwrap();
        service
            .activate(first.id, dec!(100), Uuid::new_v4())
            .await
            .unwrap();

        let (waiting, total) = service
            .list(Some(OrderStatus::FreeConsultation), 1, 20)
            .await
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(waiting.len(), 1);

        let (all, total) = service.list(None, 1, 20).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn request_rejects_unknown_fields() {
        let raw = serde_json::json!({
            "buyerId": Uuid::new_v4(),
            "itemKind": "service",
            "itemId": Uuid::new_v4(),
            "price": 100
        });
        assert!(serde_json::from_value::<ConsultationRequest>(raw).is_err());
    }
}
