use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DbErr, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::errors::ServiceError;
use crate::models::entitlement::{
    self, Entity as EntitlementEntity, EntitlementStatus, Model as EntitlementModel,
};
use crate::models::line_item::LineItem;
use crate::models::order::{Model as OrderModel, OrderStatus};

/// Turns completed orders into access grants.
///
/// Safe to call any number of times for the same order: an item the buyer already
/// holds an active grant for is skipped, and the partial unique index on
/// `(buyer_id, item_id) where status = 'active'` catches concurrent inserts.
#[derive(Clone)]
pub struct EntitlementWriter {
    db: Arc<DbPool>,
}

impl EntitlementWriter {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Grants every line item of a `completed` order.
    ///
    /// Returns the active entitlement for each distinct item of the order, whether it was
    /// created now or already existed. Does not change the order and sends nothing.
    #[instrument(skip(self, order), fields(order_id = %order.id, buyer_id = %order.buyer_id))]
    pub async fn fulfill(&self, order: &OrderModel) -> Result<Vec<EntitlementModel>, ServiceError> {
        if order.status != OrderStatus::Completed {
            return Err(ServiceError::InvalidState(format!(
                "order {} is {}, only completed orders are fulfilled",
                order.id, order.status
            )));
        }

        let mut seen = HashSet::new();
        let mut granted = Vec::new();
        let mut created = 0_u64;

        for item in order.line_items()? {
            if !seen.insert(item.item_id) {
                continue;
            }

            if let Some(existing) = self.find_active(order.buyer_id, item.item_id).await? {
                debug!(item_id = %item.item_id, entitlement_id = %existing.id, "Already entitled");
                granted.push(existing);
                continue;
            }

            match self.insert(order, &item).await {
                Ok(entitlement) => {
                    created += 1;
                    granted.push(entitlement);
                }
                Err(err) if is_unique_violation(&err) => {
                    debug!(item_id = %item.item_id, "Concurrent fulfillment won the insert");
                    let existing = self
                        .find_active(order.buyer_id, item.item_id)
                        .await?
                        .ok_or_else(|| {
                            ServiceError::InternalError(format!(
                                "active entitlement for item {} vanished after conflict",
                                item.item_id
                            ))
                        })?;
                    granted.push(existing);
                }
                Err(err) => return Err(err.into()),
            }
        }

        if created > 0 {
            counter!("payments.entitlements.created", created);
            info!(created, "Entitlements granted");
        }
        Ok(granted)
    }

    async fn find_active(
        &self,
        buyer_id: Uuid,
        item_id: Uuid,
    ) -> Result<Option<EntitlementModel>, ServiceError> {
        Ok(EntitlementEntity::find()
            .filter(entitlement::Column::BuyerId.eq(buyer_id))
            .filter(entitlement::Column::ItemId.eq(item_id))
            .filter(entitlement::Column::Status.eq(EntitlementStatus::Active))
            .one(&*self.db)
            .await?)
    }

    async fn insert(&self, order: &OrderModel, item: &LineItem) -> Result<EntitlementModel, DbErr> {
        let now = Utc::now();
        let selected_features = serde_json::to_value(&item.selected_features)
            .map_err(|e| DbErr::Custom(e.to_string()))?;
        entitlement::ActiveModel {
            id: Set(Uuid::new_v4()),
            buyer_id: Set(order.buyer_id),
            item_kind: Set(item.item_kind),
            item_id: Set(item.item_id),
            selected_features: Set(selected_features),
            billing_period: Set(item.billing_period),
            source_order_id: Set(order.id),
            status: Set(EntitlementStatus::Active),
            expiry_date: Set(item.billing_period.expiry_from(now)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
    }

    /// A buyer's entitlements, newest first.
    pub async fn list_for_buyer(
        &self,
        buyer_id: Uuid,
        status: Option<EntitlementStatus>,
    ) -> Result<Vec<EntitlementModel>, ServiceError> {
        let mut query =
            EntitlementEntity::find().filter(entitlement::Column::BuyerId.eq(buyer_id));
        if let Some(status) = status {
            query = query.filter(entitlement::Column::Status.eq(status));
        }
        Ok(query
            .order_by_desc(entitlement::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Entitlements whose grant came from `order_id`.
    pub async fn list_for_order(
        &self,
        order_id: Uuid,
    ) -> Result<Vec<EntitlementModel>, ServiceError> {
        Ok(EntitlementEntity::find()
            .filter(entitlement::Column::SourceOrderId.eq(order_id))
            .order_by_asc(entitlement::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}
