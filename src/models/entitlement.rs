use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::line_item::{BillingPeriod, ItemKind};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntitlementStatus {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "expired")]
    Expired,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// The `entitlements` table: one access grant per purchased line item.
///
/// At most one `active` row exists per (`buyer_id`, `item_id`); the migration backs
/// this with a partial unique index.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "entitlements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Uuid")]
    pub id: Uuid,
    #[sea_orm(column_type = "Uuid")]
    pub buyer_id: Uuid,
    pub item_kind: ItemKind,
    #[sea_orm(column_type = "Uuid")]
    pub item_id: Uuid,
    #[sea_orm(column_type = "Json")]
    pub selected_features: Json,
    pub billing_period: BillingPeriod,
    #[sea_orm(column_type = "Uuid")]
    pub source_order_id: Uuid,
    pub status: EntitlementStatus,
    pub expiry_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::SourceOrderId",
        to = "super::order::Column::Id",
        on_delete = "Restrict"
    )]
    SourceOrder,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SourceOrder.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Entitlement as returned to API callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSummary {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    pub selected_features: Vec<String>,
    pub billing_period: BillingPeriod,
    pub source_order_id: Uuid,
    pub status: EntitlementStatus,
    pub expiry_date: Option<DateTime<Utc>>,
}

impl From<Model> for EntitlementSummary {
    fn from(entitlement: Model) -> Self {
        let selected_features =
            serde_json::from_value(entitlement.selected_features).unwrap_or_default();
        Self {
            id: entitlement.id,
            buyer_id: entitlement.buyer_id,
            item_kind: entitlement.item_kind,
            item_id: entitlement.item_id,
            selected_features,
            billing_period: entitlement.billing_period,
            source_order_id: entitlement.source_order_id,
            status: entitlement.status,
            expiry_date: entitlement.expiry_date,
        }
    }
}
