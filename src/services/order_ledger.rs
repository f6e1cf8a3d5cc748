use chrono::{DateTime, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::line_item::{total_price, LineItem};
use crate::models::order::{self, Entity as OrderEntity, Model as OrderModel, OrderStatus};

/// Payment details written together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionDetails {
    pub payment_id: Option<String>,
    pub payment_method: Option<String>,
    pub failure_reason: Option<String>,
}

/// Values the consultation activation writes in its single conditional update.
#[derive(Debug, Clone)]
pub struct ConsultationActivation {
    pub price: Decimal,
    pub staff_id: Uuid,
    pub activated_at: DateTime<Utc>,
}

/// Persistent record of purchase intents and their monetary status.
///
/// Every status change goes through a conditional `UPDATE ... WHERE status = <from>`,
/// so concurrent writers race on the database, not in memory.
#[derive(Clone)]
pub struct OrderLedger {
    db: Arc<DbPool>,
}

impl OrderLedger {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Records a `pending` order whose amount is the sum of its line item prices.
    #[instrument(skip(self, line_items), fields(buyer_id = %buyer_id, items = line_items.len()))]
    pub async fn create_pending_order(
        &self,
        buyer_id: Uuid,
        line_items: Vec<LineItem>,
        currency: &str,
    ) -> Result<OrderModel, ServiceError> {
        if line_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "an order needs at least one line item".into(),
            ));
        }
        let amount = total_price(&line_items)?;
        let order = self
            .insert_order(buyer_id, line_items, amount, currency, OrderStatus::Pending, false)
            .await?;
        info!(order_id = %order.id, %amount, "Pending order created");
        Ok(order)
    }

    /// Records a zero-amount `free_consultation` order with a single zero-priced item.
    #[instrument(skip(self, line_item), fields(buyer_id = %buyer_id, item_id = %line_item.item_id))]
    pub async fn create_consultation_order(
        &self,
        buyer_id: Uuid,
        mut line_item: LineItem,
        currency: &str,
    ) -> Result<OrderModel, ServiceError> {
        line_item.price = Decimal::ZERO;
        let order = self
            .insert_order(
                buyer_id,
                vec![line_item],
                Decimal::ZERO,
                currency,
                OrderStatus::FreeConsultation,
                true,
            )
            .await?;
        info!(order_id = %order.id, "Consultation order created");
        Ok(order)
    }

    async fn insert_order(
        &self,
        buyer_id: Uuid,
        line_items: Vec<LineItem>,
        amount: Decimal,
        currency: &str,
        status: OrderStatus,
        is_consultation: bool,
    ) -> Result<OrderModel, ServiceError> {
        let now = Utc::now();
        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            buyer_id: Set(buyer_id),
            external_reference: Set(None),
            amount: Set(amount),
            currency: Set(currency.to_string()),
            status: Set(status),
            payment_id: Set(None),
            payment_method: Set(None),
            failure_reason: Set(None),
            line_items: Set(serde_json::to_value(&line_items)?),
            is_consultation: Set(is_consultation),
            price_activated_by_staff: Set(false),
            consultation_price: Set(None),
            activated_at: Set(None),
            activated_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(order.insert(&*self.db).await?)
    }

    pub async fn find_by_id(&self, order_id: Uuid) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find_by_id(order_id).one(&*self.db).await?)
    }

    /// Like [`find_by_id`](Self::find_by_id) but absent orders are `NotFound`.
    pub async fn get(&self, order_id: Uuid) -> Result<OrderModel, ServiceError> {
        self.find_by_id(order_id)
            .await?
            .ok_or_else(|| ServiceError::not_found_order(order_id))
    }

    pub async fn find_by_external_reference(
        &self,
        reference: &str,
    ) -> Result<Option<OrderModel>, ServiceError> {
        Ok(OrderEntity::find()
            .filter(order::Column::ExternalReference.eq(reference))
            .one(&*self.db)
            .await?)
    }

    /// Compare-and-swap on the order status.
    ///
    /// Succeeds only if the row still holds `from`; `details` are written in the same
    /// statement. A losing writer gets `InvalidTransition` carrying the status it lost to.
    #[instrument(skip(self, details), fields(order_id = %order_id, from = %from, to = %to))]
    pub async fn transition_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        details: TransitionDetails,
    ) -> Result<OrderModel, ServiceError> {
        if !from.can_transition_to(to) {
            return Err(ServiceError::InvalidState(format!(
                "{} -> {} is not a valid order transition",
                from, to
            )));
        }

        let mut update = OrderEntity::update_many()
            .col_expr(order::Column::Status, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()));
        if let Some(payment_id) = details.payment_id {
            update = update.col_expr(order::Column::PaymentId, Expr::value(payment_id));
        }
        if let Some(method) = details.payment_method {
            update = update.col_expr(order::Column::PaymentMethod, Expr::value(method));
        }
        if let Some(reason) = details.failure_reason {
            update = update.col_expr(order::Column::FailureReason, Expr::value(reason));
        }

        let result = update
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from))
            .exec(&*self.db)
            .await?;

        let current = self.get(order_id).await?;
        if result.rows_affected == 0 {
            debug!(actual = %current.status, "Conditional status write matched no row");
            return Err(ServiceError::InvalidTransition {
                order_id,
                expected: from,
                actual: current.status,
            });
        }

        counter!("payments.orders.transitions", 1, "to" => to.to_string());
        info!("Order status transitioned");
        Ok(current)
    }

    /// Stores the gateway order id on a `pending` order that has none yet.
    ///
    /// If another request attached a reference first, the stored one wins and is returned.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn attach_external_reference(
        &self,
        order_id: Uuid,
        reference: &str,
    ) -> Result<OrderModel, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(order::Column::ExternalReference, Expr::value(reference))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::Pending))
            .filter(order::Column::ExternalReference.is_null())
            .exec(&*self.db)
            .await?;

        let current = self.get(order_id).await?;
        if result.rows_affected == 1 {
            return Ok(current);
        }

        match (&current.external_reference, current.status) {
            (Some(existing), _) => {
                warn!(
                    existing = %existing,
                    discarded = %reference,
                    "Order already carries a gateway reference"
                );
                Ok(current)
            }
            (None, status) => Err(ServiceError::InvalidState(format!(
                "order {} is {}, only pending orders can be checked out",
                order_id, status
            ))),
        }
    }

    /// Prices a `free_consultation` order and moves it to `pending`.
    ///
    /// This is the only write that changes `amount` after creation. The first line item
    /// takes the price so the amount still equals the sum of line item prices.
    #[instrument(skip(self, activation), fields(order_id = %order_id, price = %activation.price))]
    pub async fn activate_consultation(
        &self,
        order_id: Uuid,
        activation: ConsultationActivation,
    ) -> Result<OrderModel, ServiceError> {
        let order = self.get(order_id).await?;
        if order.status != OrderStatus::FreeConsultation {
            return Err(consultation_state_error(order_id, order.status));
        }

        let mut line_items = order.line_items()?;
        if let Some(first) = line_items.first_mut() {
            first.price = activation.price;
        }
        for item in line_items.iter_mut().skip(1) {
            item.price = Decimal::ZERO;
        }

        let result = OrderEntity::update_many()
            .col_expr(order::Column::Amount, Expr::value(activation.price))
            .col_expr(
                order::Column::ConsultationPrice,
                Expr::value(activation.price),
            )
            .col_expr(order::Column::PriceActivatedByStaff, Expr::value(true))
            .col_expr(
                order::Column::ActivatedAt,
                Expr::value(activation.activated_at),
            )
            .col_expr(order::Column::ActivatedBy, Expr::value(activation.staff_id))
            .col_expr(
                order::Column::LineItems,
                Expr::value(serde_json::to_value(&line_items)?),
            )
            .col_expr(order::Column::Status, Expr::value(OrderStatus::Pending))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::FreeConsultation))
            .exec(&*self.db)
            .await?;

        let current = self.get(order_id).await?;
        if result.rows_affected == 0 {
            return Err(consultation_state_error(order_id, current.status));
        }

        info!(staff_id = %activation.staff_id, "Consultation priced and moved to pending");
        Ok(current)
    }

    /// Consultation orders, newest first. `page` is 1-based.
    pub async fn list_consultations(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderModel>, u64), ServiceError> {
        let mut query = OrderEntity::find().filter(order::Column::IsConsultation.eq(true));
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }

        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page.max(1));
        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((orders, total))
    }
}

fn consultation_state_error(order_id: Uuid, status: OrderStatus) -> ServiceError {
    ServiceError::InvalidState(format!(
        "order {} is {}, expected {}",
        order_id,
        status,
        OrderStatus::FreeConsultation
    ))
}
