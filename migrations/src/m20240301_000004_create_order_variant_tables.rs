use sea_orm_migration::prelude::*;

use super::m20240301_000002_create_coupons_table::Coupons;
use super::m20240301_000003_create_orders_table::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledOrders::OrderId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScheduledOrders::CouponId).integer().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scheduled_orders_order_id")
                            .from(ScheduledOrders::Table, ScheduledOrders::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scheduled_orders_coupon_id")
                            .from(ScheduledOrders::Table, ScheduledOrders::CouponId)
                            .to(Coupons::Table, Coupons::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ExpressOrders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExpressOrders::OrderId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ExpressOrders::Folio)
                            .string_len(32)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(ExpressOrders::Pin).string_len(16).not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_express_orders_order_id")
                            .from(ExpressOrders::Table, ExpressOrders::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ExpressOrders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ScheduledOrders::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum ScheduledOrders {
    Table,
    OrderId,
    CouponId,
}

#[derive(DeriveIden)]
enum ExpressOrders {
    Table,
    OrderId,
    Folio,
    Pin,
}
