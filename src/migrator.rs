use anyhow::Result;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use std::time::Duration;
use tracing::{error, info};

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240601_000001_create_orders_table::Migration),
            Box::new(m20240601_000002_create_entitlements_table::Migration),
        ]
    }
}

mod m20240601_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches models/order.rs Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::BuyerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::ExternalReference).string().null())
                        .col(
                            ColumnDef::new(Orders::Amount)
                                .decimal_len(16, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(ColumnDef::new(Orders::PaymentId).string().null())
                        .col(ColumnDef::new(Orders::PaymentMethod).string().null())
                        .col(ColumnDef::new(Orders::FailureReason).text().null())
                        .col(ColumnDef::new(Orders::LineItems).json().not_null())
                        .col(
                            ColumnDef::new(Orders::IsConsultation)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::PriceActivatedByStaff)
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Orders::ConsultationPrice)
                                .decimal_len(16, 2)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ActivatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(Orders::ActivatedBy).uuid().null())
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            // Gateway callbacks look orders up by this; it doubles as their idempotency key.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("uq_orders_external_reference")
                        .table(Orders::Table)
                        .col(Orders::ExternalReference)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_buyer_id")
                        .table(Orders::Table)
                        .col(Orders::BuyerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status_created_at")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        BuyerId,
        ExternalReference,
        Amount,
        Currency,
        Status,
        PaymentId,
        PaymentMethod,
        FailureReason,
        LineItems,
        IsConsultation,
        PriceActivatedByStaff,
        ConsultationPrice,
        ActivatedAt,
        ActivatedBy,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240601_000002_create_entitlements_table {

    use super::m20240601_000001_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240601_000002_create_entitlements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Matches models/entitlement.rs Model
            manager
                .create_table(
                    Table::create()
                        .table(Entitlements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Entitlements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Entitlements::BuyerId).uuid().not_null())
                        .col(
                            ColumnDef::new(Entitlements::ItemKind)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Entitlements::ItemId).uuid().not_null())
                        .col(
                            ColumnDef::new(Entitlements::SelectedFeatures)
                                .json()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Entitlements::BillingPeriod)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Entitlements::SourceOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Entitlements::Status)
                                .string_len(20)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Entitlements::ExpiryDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Entitlements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Entitlements::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_entitlements_source_order")
                                .from(Entitlements::Table, Entitlements::SourceOrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_entitlements_buyer_item_status")
                        .table(Entitlements::Table)
                        .col(Entitlements::BuyerId)
                        .col(Entitlements::ItemId)
                        .col(Entitlements::Status)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_entitlements_source_order_id")
                        .table(Entitlements::Table)
                        .col(Entitlements::SourceOrderId)
                        .to_owned(),
                )
                .await?;

            // At most one active grant per buyer and item. Partial indexes are not
            // expressible through the index builder on every backend.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS uq_entitlements_active_buyer_item \
                     ON entitlements (buyer_id, item_id) WHERE status = 'active'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Entitlements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Entitlements {
        Table,
        Id,
        BuyerId,
        ItemKind,
        ItemId,
        SelectedFeatures,
        BillingPeriod,
        SourceOrderId,
        Status,
        ExpiryDate,
        CreatedAt,
        UpdatedAt,
    }
}

/// Connects to `db_url` and applies pending migrations.
pub async fn run_migration(db_url: &str) -> Result<()> {
    info!("Setting up database connection for migrations");

    let mut opt = ConnectOptions::new(db_url);
    opt.max_connections(2)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(30))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;

    info!("Running database migrations");

    match Migrator::up(&db, None).await {
        Ok(_) => {
            info!("Migrations completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Migration failed: {}", e);
            Err(e.into())
        }
    }
}
