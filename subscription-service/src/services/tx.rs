//! Transaction provider backed by a PostgreSQL transaction.

use crate::errors::{RepoError, RepoKind};
use crate::models::{NewSubscription, PageLimits, Subscription, SubscriptionFilter};
use crate::ports::{cancellable, SubscriptionRepository, TxProvider, UnitOfWork};
use crate::services::repository::{self, all, fetch, insert, page, remove, replace};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use sqlx::{PgPool, Postgres, Transaction};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const OP_BEGIN: &str = "tx.begin";
const OP_COMMIT: &str = "tx.commit";
const OP_RUN: &str = "tx.run";

/// Upper bound on waiting for a rollback. A cancelled statement may still be
/// running on the connection; past this the transaction is dropped without
/// waiting and the pool deals with the connection.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens one PostgreSQL transaction per unit of work.
#[derive(Clone)]
pub struct PgTxProvider {
    pool: PgPool,
    limits: PageLimits,
    lock_timeout: Duration,
}

impl PgTxProvider {
    /// `lock_timeout` bounds how long any statement in the transaction waits
    /// for a row lock.
    pub fn new(pool: PgPool, limits: PageLimits, lock_timeout: Duration) -> Self {
        Self {
            pool,
            limits,
            lock_timeout,
        }
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, RepoError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| repository::classify(OP_BEGIN, e))?;

        // SET does not take bind parameters; the value is an integer.
        let lock_timeout_ms = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = {}", lock_timeout_ms))
            .execute(&mut *tx)
            .await
            .map_err(|e| repository::classify(OP_BEGIN, e))?;

        Ok(tx)
    }
}

/// Repository bound to an open transaction. Fetches lock the row. Only
/// `get_by_id` and `update` are reached by the update unit of work.
struct TxSubscriptionRepository {
    tx: Mutex<Transaction<'static, Postgres>>,
    limits: PageLimits,
}

#[async_trait]
impl SubscriptionRepository for TxSubscriptionRepository {
    async fn create(&self, new: &NewSubscription) -> Result<Subscription, RepoError> {
        let mut tx = self.tx.lock().await;
        insert(&mut tx, new).await
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Subscription, RepoError> {
        let mut tx = self.tx.lock().await;
        fetch(&mut tx, id, true).await
    }

    async fn update(&self, sub: &Subscription) -> Result<Subscription, RepoError> {
        let mut tx = self.tx.lock().await;
        replace(&mut tx, sub).await
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let mut tx = self.tx.lock().await;
        remove(&mut tx, id).await
    }

    async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError> {
        let mut tx = self.tx.lock().await;
        page(&mut tx, filter, self.limits).await
    }

    async fn list_all(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError> {
        let mut tx = self.tx.lock().await;
        all(&mut tx, filter).await
    }
}

struct PgUnitOfWork {
    subscriptions: TxSubscriptionRepository,
}

impl UnitOfWork for PgUnitOfWork {
    fn subscriptions(&self) -> &dyn SubscriptionRepository {
        &self.subscriptions
    }
}

async fn rollback(tx: Transaction<'static, Postgres>) {
    match tokio::time::timeout(ROLLBACK_TIMEOUT, tx.rollback()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Failed to roll back transaction"),
        Err(_) => warn!(
            timeout_ms = ROLLBACK_TIMEOUT.as_millis() as u64,
            "Rollback timed out, dropping transaction"
        ),
    }
}

#[async_trait]
impl TxProvider for PgTxProvider {
    #[instrument(skip_all)]
    async fn with_transaction<T, E, F>(&self, cancel: &CancellationToken, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<RepoError> + Send + 'static,
        F: for<'u> FnOnce(&'u dyn UnitOfWork) -> BoxFuture<'u, Result<T, E>> + Send + 'static,
    {
        let tx = cancellable(cancel, OP_BEGIN, self.begin()).await?;

        let uow = PgUnitOfWork {
            subscriptions: TxSubscriptionRepository {
                tx: Mutex::new(tx),
                limits: self.limits,
            },
        };

        let scoped: &dyn UnitOfWork = &uow;
        let pending = work(scoped);
        let outcome = AssertUnwindSafe(async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = pending => Some(result),
            }
        })
        .catch_unwind()
        .await;

        let tx = uow.subscriptions.tx.into_inner();
        match outcome {
            Ok(Some(Ok(value))) => {
                tx.commit()
                    .await
                    .map_err(|e| repository::classify(OP_COMMIT, e))?;
                debug!("Transaction committed");
                Ok(value)
            }
            Ok(Some(Err(err))) => {
                rollback(tx).await;
                debug!("Transaction rolled back");
                Err(err)
            }
            Ok(None) => {
                rollback(tx).await;
                debug!("Transaction cancelled and rolled back");
                Err(RepoError::new(OP_RUN, RepoKind::Cancelled).into())
            }
            Err(panic) => {
                rollback(tx).await;
                warn!("Transaction rolled back after panic");
                std::panic::resume_unwind(panic)
            }
        }
    }
}
