pub use sea_orm_migration::prelude::*;

mod m20240301_000001_create_products_table;
mod m20240301_000002_create_coupons_table;
mod m20240301_000003_create_orders_table;
mod m20240301_000004_create_order_variant_tables;
mod m20240301_000005_create_order_line_items_table;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_coupons_table::Migration),
            Box::new(m20240301_000003_create_orders_table::Migration),
            Box::new(m20240301_000004_create_order_variant_tables::Migration),
            Box::new(m20240301_000005_create_order_line_items_table::Migration),
        ]
    }
}
