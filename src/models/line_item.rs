use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::errors::ServiceError;

/// Largest amount the `DECIMAL(16, 2)` money columns hold.
pub const MAX_AMOUNT: Decimal = dec!(99999999999999.99);

/// Kind of catalog item a line item (and the resulting entitlement) refers to.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ItemKind {
    #[sea_orm(string_value = "service")]
    Service,
    #[sea_orm(string_value = "course")]
    Course,
}

/// Billing cadence of a purchased item; drives entitlement expiry.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BillingPeriod {
    #[default]
    #[sea_orm(string_value = "one_time")]
    OneTime,
    #[sea_orm(string_value = "monthly")]
    Monthly,
    #[sea_orm(string_value = "quarterly")]
    Quarterly,
    #[sea_orm(string_value = "half_yearly")]
    HalfYearly,
    #[sea_orm(string_value = "yearly")]
    Yearly,
}

impl BillingPeriod {
    /// Number of months an entitlement bought with this period stays valid.
    pub fn months(self) -> Option<u32> {
        match self {
            BillingPeriod::OneTime => None,
            BillingPeriod::Monthly => Some(1),
            BillingPeriod::Quarterly => Some(3),
            BillingPeriod::HalfYearly => Some(6),
            BillingPeriod::Yearly => Some(12),
        }
    }

    pub fn expiry_from(self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.months()
            .and_then(|months| start.checked_add_months(Months::new(months)))
    }
}

/// One purchased catalog item, embedded in its order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LineItem {
    pub item_kind: ItemKind,
    pub item_id: Uuid,
    /// Price in major currency units
    #[validate(custom = "validate_line_price")]
    #[schema(value_type = String, example = "500.00")]
    pub price: Decimal,
    #[serde(default)]
    pub billing_period: BillingPeriod,
    #[serde(default)]
    pub selected_features: Vec<String>,
}

fn validate_line_price(price: &Decimal) -> Result<(), ValidationError> {
    if *price < Decimal::ZERO {
        let mut err = ValidationError::new("price");
        err.message = Some("Line item price must not be negative".into());
        return Err(err);
    }
    if *price > MAX_AMOUNT {
        let mut err = ValidationError::new("price");
        err.message = Some(format!("Line item price must not exceed {}", MAX_AMOUNT).into());
        return Err(err);
    }
    Ok(())
}

/// Sum of the line item prices; the only way an order amount is computed.
///
/// Fails when the sum does not fit the order's amount column.
pub fn total_price(items: &[LineItem]) -> Result<Decimal, ServiceError> {
    let total = items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.price))
        .filter(|total| *total <= MAX_AMOUNT);
    total.ok_or_else(|| {
        ServiceError::ValidationError(format!("order total must not exceed {}", MAX_AMOUNT))
    })
}
