use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::line_item::LineItem;
use crate::errors::ServiceError;

/// Monetary status of an order.
///
/// `pending` may move to `completed` or `failed`; `free_consultation` may move to
/// `pending` once staff assign a price. Every other status is terminal for the
/// confirmation paths.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "free_consultation")]
    FreeConsultation,
    #[sea_orm(string_value = "free_service")]
    FreeService,
}

impl OrderStatus {
    /// Edges the ledger accepts through a conditional status write.
    pub fn can_transition_to(self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (OrderStatus::Pending, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Failed)
                | (OrderStatus::FreeConsultation, OrderStatus::Pending)
        )
    }
}

/// The `orders` table. Rows are never deleted.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Uuid")]
    pub id: Uuid,

    #[sea_orm(column_type = "Uuid")]
    pub buyer_id: Uuid,

    /// Gateway order id; set once, unique.
    #[sea_orm(unique)]
    pub external_reference: Option<String>,

    /// Major currency units; equals the sum of line item prices.
    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub amount: Decimal,

    pub currency: String,

    pub status: OrderStatus,

    /// Gateway payment id recorded with the confirming write.
    pub payment_id: Option<String>,

    pub payment_method: Option<String>,

    pub failure_reason: Option<String>,

    /// `Vec<LineItem>` as JSON; use [`Model::line_items`].
    #[sea_orm(column_type = "Json")]
    pub line_items: Json,

    pub is_consultation: bool,

    pub price_activated_by_staff: bool,

    #[sea_orm(column_type = "Decimal(Some((16, 2)))")]
    pub consultation_price: Option<Decimal>,

    pub activated_at: Option<DateTime<Utc>>,

    #[sea_orm(column_type = "Uuid")]
    pub activated_by: Option<Uuid>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

// Entitlements point back at their order; an order does not list them.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decodes the embedded line items.
    pub fn line_items(&self) -> Result<Vec<LineItem>, ServiceError> {
        serde_json::from_value(self.line_items.clone()).map_err(|e| {
            ServiceError::InternalError(format!(
                "order {} has malformed line items: {}",
                self.id, e
            ))
        })
    }
}

/// Order as returned to API and CLI callers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub external_reference: Option<String>,
    #[schema(value_type = String, example = "500.00")]
    pub amount: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: Option<String>,
    pub line_items: Vec<LineItem>,
    pub price_activated_by_staff: bool,
    #[schema(value_type = Option<String>)]
    pub consultation_price: Option<Decimal>,
    pub activated_at: Option<DateTime<Utc>>,
    pub activated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<Model> for OrderSummary {
    type Error = ServiceError;

    fn try_from(order: Model) -> Result<Self, Self::Error> {
        let line_items = order.line_items()?;
        Ok(Self {
            id: order.id,
            buyer_id: order.buyer_id,
            external_reference: order.external_reference,
            amount: order.amount,
            currency: order.currency,
            status: order.status,
            payment_method: order.payment_method,
            line_items,
            price_activated_by_staff: order.price_activated_by_staff,
            consultation_price: order.consultation_price,
            activated_at: order.activated_at,
            activated_by: order.activated_by,
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }
}
