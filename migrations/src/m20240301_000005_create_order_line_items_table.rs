use sea_orm_migration::prelude::*;

use super::m20240301_000001_create_products_table::Products;
use super::m20240301_000003_create_orders_table::Orders;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(OrderLineItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(OrderLineItems::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(OrderLineItems::OrderId).integer().not_null())
                    .col(
                        ColumnDef::new(OrderLineItems::ProductId)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderLineItems::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(OrderLineItems::UnitPrice)
                            .decimal()
                            .not_null(),
                    )
                    .col(ColumnDef::new(OrderLineItems::Subtotal).decimal().not_null())
                    .col(ColumnDef::new(OrderLineItems::Note).text().null())
                    .col(
                        ColumnDef::new(OrderLineItems::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_line_items_order_id")
                            .from(OrderLineItems::Table, OrderLineItems::OrderId)
                            .to(Orders::Table, Orders::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_order_line_items_product_id")
                            .from(OrderLineItems::Table, OrderLineItems::ProductId)
                            .to(Products::Table, Products::Id)
                            .on_delete(ForeignKeyAction::Restrict)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_order_line_items_order_id")
                    .table(OrderLineItems::Table)
                    .col(OrderLineItems::OrderId)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(OrderLineItems::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum OrderLineItems {
    Table,
    Id,
    OrderId,
    ProductId,
    Quantity,
    UnitPrice,
    Subtotal,
    Note,
    CreatedAt,
}
