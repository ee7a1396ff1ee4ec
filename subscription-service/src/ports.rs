//! Seams between the subscription service and its collaborators.
//!
//! Storage and transactions are reached only through these traits, so the
//! service never sees a sqlx type. The transport reaches the service through
//! [`SubscriptionOperations`].

use crate::errors::{RepoError, RepoKind, ServiceError};
use crate::models::{NewSubscription, Subscription, SubscriptionFilter, SubscriptionUpdate};
use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::BoxFuture;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Persistence for subscriptions.
///
/// Implementations classify their failures: missing rows and zero rows
/// affected are `NotFound`, unique violations are `Duplicate`.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn create(&self, new: &NewSubscription) -> Result<Subscription, RepoError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Subscription, RepoError>;

    /// Replace every mutable column of the row with `sub.id`.
    async fn update(&self, sub: &Subscription) -> Result<Subscription, RepoError>;

    async fn delete(&self, id: Uuid) -> Result<(), RepoError>;

    /// One page of matching rows. Page size limits are enforced here.
    async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError>;

    /// Every matching row; paging fields of `filter` are ignored.
    async fn list_all(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError>;
}

/// Capabilities available inside one transaction.
pub trait UnitOfWork: Send + Sync {
    fn subscriptions(&self) -> &dyn SubscriptionRepository;
}

/// Runs work against a single storage transaction.
#[async_trait]
pub trait TxProvider: Send + Sync {
    /// Begin a transaction, run `work` with a handle scoped to it, then commit
    /// if `work` succeeded. The transaction is rolled back when `work` fails,
    /// when `cancel` fires first, or when `work` panics; a panic is resumed
    /// after the rollback.
    async fn with_transaction<T, E, F>(&self, cancel: &CancellationToken, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<RepoError> + Send + 'static,
        F: for<'u> FnOnce(&'u dyn UnitOfWork) -> BoxFuture<'u, Result<T, E>> + Send + 'static;
}

/// Await `fut` unless `cancel` fires first, in which case the future is
/// dropped and a `Cancelled` error tagged with `op` is returned.
pub async fn cancellable<T, F>(
    cancel: &CancellationToken,
    op: &'static str,
    fut: F,
) -> Result<T, RepoError>
where
    F: Future<Output = Result<T, RepoError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RepoError::new(op, RepoKind::Cancelled)),
        result = fut => result,
    }
}

/// Subscription operations exposed to the transport.
#[async_trait]
pub trait SubscriptionOperations: Send + Sync {
    async fn create(
        &self,
        cancel: &CancellationToken,
        new: NewSubscription,
    ) -> Result<Subscription, ServiceError>;

    async fn get_by_id(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<Subscription, ServiceError>;

    async fn update(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, ServiceError>;

    async fn delete(&self, cancel: &CancellationToken, id: Uuid) -> Result<(), ServiceError>;

    async fn list(
        &self,
        cancel: &CancellationToken,
        filter: SubscriptionFilter,
    ) -> Result<Vec<Subscription>, ServiceError>;

    /// Sum of the billing contributions of every subscription matching
    /// `filter` over `[period_start, period_end]`.
    async fn total_cost(
        &self,
        cancel: &CancellationToken,
        filter: SubscriptionFilter,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<i64, ServiceError>;
}
