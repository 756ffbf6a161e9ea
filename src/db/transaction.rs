/*!
 * Transaction helper
 *
 * Runs a unit of work inside one database transaction: commit on `Ok`,
 * rollback on `Err`, connection returned to the pool on every exit path.
 */

use crate::errors::ServiceError;
use metrics::{counter, histogram};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionError, TransactionTrait};
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// ```rust,ignore
/// let order = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         let header = header.insert(txn).await?;
///         order_line_item::Entity::insert_many(items).exec(txn).await?;
///         Ok(header)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, ServiceError>> + Send,
    T: Send,
{
    let transaction_id = Uuid::new_v4();
    let start = std::time::Instant::now();

    debug!(transaction_id = %transaction_id, "Starting database transaction");
    counter!("bakery_db.transaction.started", 1);

    let result = db.transaction::<_, T, ServiceError>(f).await;

    let elapsed = start.elapsed();
    histogram!("bakery_db.transaction.duration", elapsed);

    match &result {
        Ok(_) => {
            counter!("bakery_db.transaction.committed", 1);
            debug!(transaction_id = %transaction_id, "Transaction committed in {:?}", elapsed);
        }
        Err(e) => {
            counter!("bakery_db.transaction.rolled_back", 1);
            warn!(transaction_id = %transaction_id, error = %e, "Transaction rolled back after {:?}", elapsed);
        }
    }

    result.map_err(|e| match e {
        TransactionError::Connection(db_err) => ServiceError::DatabaseError(db_err),
        TransactionError::Transaction(service_err) => service_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{establish_connection_with_config, run_migrations, DbConfig};
    use crate::entities::product;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};

    async fn setup() -> DatabaseConnection {
        let db = establish_connection_with_config(&DbConfig {
            url: "sqlite::memory:".into(),
            max_connections: 1,
            ..Default::default()
        })
        .await
        .unwrap();
        run_migrations(&db).await.unwrap();
        db
    }

    fn bread() -> product::ActiveModel {
        product::ActiveModel {
            name: Set("Concha".to_string()),
            price: Set(dec!(12)),
            is_active: Set(true),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn commits_on_ok() {
        let db = setup().await;

        let id = with_transaction(&db, |txn| {
            Box::pin(async move { Ok(bread().insert(txn).await?.id) })
        })
        .await
        .unwrap();

        assert!(product::Entity::find_by_id(id).one(&db).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn rolls_back_on_err() {
        let db = setup().await;

        let result: Result<(), ServiceError> = with_transaction(&db, |txn| {
            Box::pin(async move {
                bread().insert(txn).await?;
                Err(ServiceError::ValidationError("abort".into()))
            })
        })
        .await;

        assert!(matches!(result, Err(ServiceError::ValidationError(_))));
        assert_eq!(product::Entity::find().count(&db).await.unwrap(), 0);
    }
}
