//! PostgreSQL storage for subscriptions.
//!
//! The query functions take a bare connection so the same SQL runs against a
//! pooled connection or inside a transaction.

use crate::errors::{RepoError, RepoKind};
use crate::models::{NewSubscription, PageLimits, Subscription, SubscriptionFilter};
use crate::ports::SubscriptionRepository;
use crate::services::metrics::db_timer;
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

pub(crate) const OP_CREATE: &str = "subscription_repo.create";
pub(crate) const OP_GET: &str = "subscription_repo.get_by_id";
pub(crate) const OP_UPDATE: &str = "subscription_repo.update";
pub(crate) const OP_DELETE: &str = "subscription_repo.delete";
pub(crate) const OP_LIST: &str = "subscription_repo.list";
pub(crate) const OP_LIST_ALL: &str = "subscription_repo.list_all";

/// Classify a driver error for `op`.
pub(crate) fn classify(op: &'static str, err: sqlx::Error) -> RepoError {
    let kind = match &err {
        sqlx::Error::RowNotFound => RepoKind::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => RepoKind::Duplicate,
        sqlx::Error::Database(db) if db.is_check_violation() => RepoKind::InvalidArgument,
        _ => RepoKind::Unknown,
    };
    RepoError::wrap(op, kind, err)
}

pub(crate) async fn insert(
    conn: &mut PgConnection,
    new: &NewSubscription,
) -> Result<Subscription, RepoError> {
    let _timer = db_timer("create");

    sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO subscriptions (service_name, monthly_cost, user_id, start_date, end_date)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, service_name, monthly_cost, user_id, start_date, end_date, created_at, updated_at
        "#,
    )
    .bind(&new.service_name)
    .bind(new.monthly_cost)
    .bind(new.user_id)
    .bind(new.start_date)
    .bind(new.end_date)
    .fetch_one(conn)
    .await
    .map_err(|e| classify(OP_CREATE, e))
}

/// Fetch one row. With `lock` the row is held `FOR UPDATE` until the
/// surrounding transaction ends.
pub(crate) async fn fetch(
    conn: &mut PgConnection,
    id: Uuid,
    lock: bool,
) -> Result<Subscription, RepoError> {
    let _timer = db_timer("get_by_id");

    let sql = if lock {
        r#"
        SELECT id, service_name, monthly_cost, user_id, start_date, end_date, created_at, updated_at
        FROM subscriptions
        WHERE id = $1
        FOR UPDATE
        "#
    } else {
        r#"
        SELECT id, service_name, monthly_cost, user_id, start_date, end_date, created_at, updated_at
        FROM subscriptions
        WHERE id = $1
        "#
    };

    sqlx::query_as::<_, Subscription>(sql)
        .bind(id)
        .fetch_one(conn)
        .await
        .map_err(|e| classify(OP_GET, e))
}

pub(crate) async fn replace(
    conn: &mut PgConnection,
    sub: &Subscription,
) -> Result<Subscription, RepoError> {
    let _timer = db_timer("update");

    sqlx::query_as::<_, Subscription>(
        r#"
        UPDATE subscriptions
        SET service_name = $2, monthly_cost = $3, user_id = $4, start_date = $5, end_date = $6, updated_at = $7
        WHERE id = $1
        RETURNING id, service_name, monthly_cost, user_id, start_date, end_date, created_at, updated_at
        "#,
    )
    .bind(sub.id)
    .bind(&sub.service_name)
    .bind(sub.monthly_cost)
    .bind(sub.user_id)
    .bind(sub.start_date)
    .bind(sub.end_date)
    .bind(sub.updated_at)
    .fetch_optional(conn)
    .await
    .map_err(|e| classify(OP_UPDATE, e))?
    .ok_or_else(|| RepoError::new(OP_UPDATE, RepoKind::NotFound))
}

pub(crate) async fn remove(conn: &mut PgConnection, id: Uuid) -> Result<(), RepoError> {
    let _timer = db_timer("delete");

    let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await
        .map_err(|e| classify(OP_DELETE, e))?;

    if result.rows_affected() == 0 {
        return Err(RepoError::new(OP_DELETE, RepoKind::NotFound));
    }
    Ok(())
}

pub(crate) async fn page(
    conn: &mut PgConnection,
    filter: &SubscriptionFilter,
    limits: PageLimits,
) -> Result<Vec<Subscription>, RepoError> {
    let _timer = db_timer("list");
    let (limit, offset) = limits.resolve(filter);
    debug!(limit, offset, "Listing subscriptions");

    sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, service_name, monthly_cost, user_id, start_date, end_date, created_at, updated_at
        FROM subscriptions
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR service_name = $2)
        ORDER BY created_at, id
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(filter.user_id)
    .bind(&filter.service_name)
    .bind(limit)
    .bind(offset)
    .fetch_all(conn)
    .await
    .map_err(|e| classify(OP_LIST, e))
}

pub(crate) async fn all(
    conn: &mut PgConnection,
    filter: &SubscriptionFilter,
) -> Result<Vec<Subscription>, RepoError> {
    let _timer = db_timer("list_all");

    sqlx::query_as::<_, Subscription>(
        r#"
        SELECT id, service_name, monthly_cost, user_id, start_date, end_date, created_at, updated_at
        FROM subscriptions
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::text IS NULL OR service_name = $2)
        ORDER BY created_at, id
        "#,
    )
    .bind(filter.user_id)
    .bind(&filter.service_name)
    .fetch_all(conn)
    .await
    .map_err(|e| classify(OP_LIST_ALL, e))
}

/// Pool-backed repository. Each call runs on its own pooled connection.
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: PgPool,
    limits: PageLimits,
}

impl PgSubscriptionRepository {
    pub fn new(pool: PgPool, limits: PageLimits) -> Self {
        Self { pool, limits }
    }

    async fn acquire(
        &self,
        op: &'static str,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, RepoError> {
        self.pool.acquire().await.map_err(|e| classify(op, e))
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    #[instrument(skip(self, new), fields(user_id = %new.user_id))]
    async fn create(&self, new: &NewSubscription) -> Result<Subscription, RepoError> {
        let mut conn = self.acquire(OP_CREATE).await?;
        insert(&mut conn, new).await
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    async fn get_by_id(&self, id: Uuid) -> Result<Subscription, RepoError> {
        let mut conn = self.acquire(OP_GET).await?;
        fetch(&mut conn, id, false).await
    }

    #[instrument(skip(self, sub), fields(subscription_id = %sub.id))]
    async fn update(&self, sub: &Subscription) -> Result<Subscription, RepoError> {
        let mut conn = self.acquire(OP_UPDATE).await?;
        replace(&mut conn, sub).await
    }

    #[instrument(skip(self), fields(subscription_id = %id))]
    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        let mut conn = self.acquire(OP_DELETE).await?;
        remove(&mut conn, id).await
    }

    #[instrument(skip(self))]
    async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError> {
        let mut conn = self.acquire(OP_LIST).await?;
        page(&mut conn, filter, self.limits).await
    }

    #[instrument(skip(self))]
    async fn list_all(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError> {
        let mut conn = self.acquire(OP_LIST_ALL).await?;
        all(&mut conn, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_row_is_not_found() {
        let err = classify(OP_GET, sqlx::Error::RowNotFound);
        assert!(err.is(RepoKind::NotFound));
        assert_eq!(err.op(), OP_GET);
    }

    #[test]
    fn other_driver_errors_are_unknown() {
        let err = classify(OP_LIST, sqlx::Error::PoolTimedOut);
        assert!(err.is(RepoKind::Unknown));
        assert!(err.find_cause::<sqlx::Error>().is_some());
    }
}
