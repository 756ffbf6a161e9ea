use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveEnum, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::with_transaction;
use crate::entities::{coupon, express_order, order, order_line_item, scheduled_order};
use crate::errors::ServiceError;
use crate::models::order::{
    LineItem, Order, OrderDetails, OrderKind, OrderStatus, OrderType,
};
use crate::repositories::Repository;
use crate::services::identifiers::OrderNumberStore;

use super::BaseRepository;

/// Repository for order headers, their variant rows and line items
#[derive(Debug, Clone)]
pub struct OrderRepository {
    base: BaseRepository,
    enforce_coupon_usage_cap: bool,
}

impl OrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
            enforce_coupon_usage_cap: true,
        }
    }

    /// When enabled, redeeming a coupon that reached its usage limit fails
    /// the insert with [`ServiceError::CouponExhausted`].
    pub fn with_coupon_usage_cap(mut self, enforce: bool) -> Self {
        self.enforce_coupon_usage_cap = enforce;
        self
    }

    /// Persists a scheduled order with its line items.
    pub async fn insert_scheduled_order(
        &self,
        order: Order,
        line_items: Vec<LineItem>,
    ) -> Result<OrderDetails, ServiceError> {
        if order.kind.order_type() != OrderType::Scheduled {
            return Err(ServiceError::ValidationError(
                "Expected a scheduled order".to_string(),
            ));
        }
        self.insert_order(order, line_items).await
    }

    /// Persists an express order with its line items.
    pub async fn insert_express_order(
        &self,
        order: Order,
        line_items: Vec<LineItem>,
    ) -> Result<OrderDetails, ServiceError> {
        if order.kind.order_type() != OrderType::Express {
            return Err(ServiceError::ValidationError(
                "Expected an express order".to_string(),
            ));
        }
        self.insert_order(order, line_items).await
    }

    /// Writes header, variant row, coupon usage and line items in one
    /// transaction. On success the generated id is attached to the order and
    /// to every line item; on failure nothing is left behind.
    #[instrument(skip(self, order, line_items), fields(order_number = order.order_number))]
    pub async fn insert_order(
        &self,
        mut order: Order,
        mut line_items: Vec<LineItem>,
    ) -> Result<OrderDetails, ServiceError> {
        order.check_invariants()?;
        if line_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "An order needs at least one line item".to_string(),
            ));
        }
        for item in &line_items {
            item.check_invariants()?;
        }

        let header = order.clone();
        let items = line_items.clone();
        let enforce_cap = self.enforce_coupon_usage_cap;
        let order_id = with_transaction(self.base.get_db(), move |txn| {
            Box::pin(async move {
                let now = Utc::now();
                let inserted = order::ActiveModel {
                    order_number: Set(header.order_number),
                    order_type: Set(header.kind.order_type()),
                    customer_id: Set(header.customer_id),
                    status: Set(header.status),
                    payment_method: Set(header.payment_method),
                    total_amount: Set(header.total_amount),
                    pickup_at: Set(header.pickup_at),
                    delivered_at: Set(header.delivered_at),
                    created_at: Set(header.created_at),
                    updated_at: Set(now),
                    version: Set(1),
                    ..Default::default()
                }
                .insert(txn)
                .await
                .map_err(|e| ServiceError::from_write(e, "order_number"))?;
                let order_id = inserted.id;

                match &header.kind {
                    OrderKind::Scheduled { coupon_id } => {
                        scheduled_order::ActiveModel {
                            order_id: Set(order_id),
                            coupon_id: Set(*coupon_id),
                        }
                        .insert(txn)
                        .await?;

                        if let Some(coupon_id) = coupon_id {
                            increment_coupon_usage(txn, *coupon_id, enforce_cap).await?;
                        }
                    }
                    OrderKind::Express { folio, pin } => {
                        express_order::ActiveModel {
                            order_id: Set(order_id),
                            folio: Set(folio.clone()),
                            pin: Set(pin.clone()),
                        }
                        .insert(txn)
                        .await
                        .map_err(|e| ServiceError::from_write(e, "folio"))?;
                    }
                }

                let rows = items.iter().map(|item| order_line_item::ActiveModel {
                    order_id: Set(order_id),
                    product_id: Set(item.product_id),
                    quantity: Set(item.quantity),
                    unit_price: Set(item.unit_price),
                    subtotal: Set(item.subtotal),
                    note: Set(item.note.clone()),
                    created_at: Set(now),
                    ..Default::default()
                });
                order_line_item::Entity::insert_many(rows).exec(txn).await?;

                Ok(order_id)
            })
        })
        .await?;

        debug!(order_id, "Order persisted");
        order.id = Some(order_id);
        for item in &mut line_items {
            item.order_id = Some(order_id);
        }
        Ok(OrderDetails { order, line_items })
    }

    /// Loads an order with its variant data and line items.
    pub async fn find_by_id(&self, id: i32) -> Result<OrderDetails, ServiceError> {
        let db = self.base.get_db();
        let order = load_order(db, id).await?;
        let line_items = load_line_items(db, id).await?;
        Ok(OrderDetails { order, line_items })
    }

    pub async fn find_by_order_number(
        &self,
        order_number: i32,
    ) -> Result<Option<OrderDetails>, ServiceError> {
        let header = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(self.base.get_db())
            .await?;
        match header {
            Some(header) => self.find_by_id(header.id).await.map(Some),
            None => Ok(None),
        }
    }

    /// Express pickup lookup.
    pub async fn find_by_folio(&self, folio: &str) -> Result<Option<OrderDetails>, ServiceError> {
        let row = express_order::Entity::find()
            .filter(express_order::Column::Folio.eq(folio))
            .one(self.base.get_db())
            .await?;
        match row {
            Some(row) => self.find_by_id(row.order_id).await.map(Some),
            None => Ok(None),
        }
    }

    /// A customer's orders, newest first.
    pub async fn list_by_customer(&self, customer_id: Uuid) -> Result<Vec<Order>, ServiceError> {
        let headers = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .order_by_desc(order::Column::Id)
            .all(self.base.get_db())
            .await?;
        self.assemble_all(headers).await
    }

    /// Orders in one status, oldest first (the staff work queue).
    pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, ServiceError> {
        let headers = order::Entity::find()
            .filter(order::Column::Status.eq(status))
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .all(self.base.get_db())
            .await?;
        self.assemble_all(headers).await
    }

    pub async fn count(&self) -> Result<u64, ServiceError> {
        Ok(order::Entity::find().count(self.base.get_db()).await?)
    }

    async fn assemble_all(&self, headers: Vec<order::Model>) -> Result<Vec<Order>, ServiceError> {
        if headers.is_empty() {
            return Ok(Vec::new());
        }
        let db = self.base.get_db();
        let ids: Vec<i32> = headers.iter().map(|h| h.id).collect();

        let mut scheduled: HashMap<i32, scheduled_order::Model> = scheduled_order::Entity::find()
            .filter(scheduled_order::Column::OrderId.is_in(ids.clone()))
            .all(db)
            .await?
            .into_iter()
            .map(|row| (row.order_id, row))
            .collect();
        let mut express: HashMap<i32, express_order::Model> = express_order::Entity::find()
            .filter(express_order::Column::OrderId.is_in(ids))
            .all(db)
            .await?
            .into_iter()
            .map(|row| (row.order_id, row))
            .collect();

        headers
            .into_iter()
            .map(|header| {
                let id = header.id;
                assemble(header, scheduled.remove(&id), express.remove(&id))
            })
            .collect()
    }
}

#[async_trait]
impl OrderNumberStore for OrderRepository {
    async fn order_number_exists(&self, order_number: i32) -> Result<bool, ServiceError> {
        let count = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .count(self.base.get_db())
            .await?;
        Ok(count > 0)
    }
}

impl Repository for OrderRepository {
    fn get_db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }
}

/// Loads an order header with its variant row, on any connection or transaction.
pub async fn load_order<C: ConnectionTrait>(conn: &C, id: i32) -> Result<Order, ServiceError> {
    let header = order::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))?;

    let (scheduled, express) = match header.order_type {
        OrderType::Scheduled => (
            scheduled_order::Entity::find_by_id(id).one(conn).await?,
            None,
        ),
        OrderType::Express => (None, express_order::Entity::find_by_id(id).one(conn).await?),
    };
    assemble(header, scheduled, express)
}

pub async fn load_line_items<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<Vec<LineItem>, ServiceError> {
    let rows = order_line_item::Entity::find()
        .filter(order_line_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_line_item::Column::Id)
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| LineItem {
            order_id: Some(row.order_id),
            product_id: row.product_id,
            quantity: row.quantity,
            unit_price: row.unit_price,
            subtotal: row.subtotal,
            note: row.note,
        })
        .collect())
}

/// Moves an order from `from` to `to` only if it is still in `from`.
/// Zero matched rows means another caller changed it first.
pub async fn update_status<C: ConnectionTrait>(
    conn: &C,
    id: i32,
    from: OrderStatus,
    to: OrderStatus,
    delivered_at: Option<DateTime<Utc>>,
) -> Result<(), ServiceError> {
    let mut update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(to.to_value()))
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        );
    if let Some(at) = delivered_at {
        update = update.col_expr(order::Column::DeliveredAt, Expr::value(at));
    }

    let result = update
        .filter(order::Column::Id.eq(id))
        .filter(order::Column::Status.eq(from))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(id));
    }
    Ok(())
}

/// Bumps the usage counter. With `enforce_cap` the update only matches while
/// uses remain, so concurrent redemptions cannot overshoot the limit.
async fn increment_coupon_usage<C: ConnectionTrait>(
    conn: &C,
    coupon_id: i32,
    enforce_cap: bool,
) -> Result<(), ServiceError> {
    let mut update = coupon::Entity::update_many()
        .col_expr(
            coupon::Column::UsageCount,
            Expr::col(coupon::Column::UsageCount).add(1),
        )
        .filter(coupon::Column::Id.eq(coupon_id));
    if enforce_cap {
        update = update.filter(
            Condition::any()
                .add(coupon::Column::UsageLimit.is_null())
                .add(
                    Expr::col(coupon::Column::UsageCount)
                        .lt(Expr::col(coupon::Column::UsageLimit)),
                ),
        );
    }

    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return match coupon::Entity::find_by_id(coupon_id).one(conn).await? {
            Some(_) => Err(ServiceError::CouponExhausted(coupon_id)),
            None => Err(ServiceError::NotFound(format!(
                "Coupon {} not found",
                coupon_id
            ))),
        };
    }
    Ok(())
}

fn assemble(
    header: order::Model,
    scheduled: Option<scheduled_order::Model>,
    express: Option<express_order::Model>,
) -> Result<Order, ServiceError> {
    let kind = match header.order_type {
        OrderType::Scheduled => {
            let row = scheduled.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Scheduled order {} has no variant row",
                    header.id
                ))
            })?;
            OrderKind::Scheduled {
                coupon_id: row.coupon_id,
            }
        }
        OrderType::Express => {
            let row = express.ok_or_else(|| {
                ServiceError::InternalError(format!(
                    "Express order {} has no variant row",
                    header.id
                ))
            })?;
            OrderKind::Express {
                folio: row.folio,
                pin: row.pin,
            }
        }
    };

    Ok(Order {
        id: Some(header.id),
        order_number: header.order_number,
        customer_id: header.customer_id,
        status: header.status,
        payment_method: header.payment_method,
        total_amount: header.total_amount,
        pickup_at: header.pickup_at,
        delivered_at: header.delivered_at,
        created_at: header.created_at,
        kind,
    })
}
