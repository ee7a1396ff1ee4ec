//! Subscription service: classification, billing and the transactional update.

use crate::billing;
use crate::errors::{RepoError, RepoKind, ServiceError, ServiceKind};
use crate::models::{NewSubscription, Subscription, SubscriptionFilter, SubscriptionUpdate};
use crate::ports::{cancellable, SubscriptionOperations, SubscriptionRepository, TxProvider};
use crate::services::metrics::record_operation;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const OP_CREATE: &str = "subscription_service.create";
const OP_GET: &str = "subscription_service.get_by_id";
const OP_UPDATE: &str = "subscription_service.update";
const OP_DELETE: &str = "subscription_service.delete";
const OP_LIST: &str = "subscription_service.list";
const OP_TOTAL_COST: &str = "subscription_service.total_cost";

/// Subscription business logic over a repository and a transaction provider.
pub struct SubscriptionService<R, P> {
    repo: R,
    tx: P,
}

impl<R, P> SubscriptionService<R, P>
where
    R: SubscriptionRepository,
    P: TxProvider,
{
    pub fn new(repo: R, tx: P) -> Self {
        Self { repo, tx }
    }
}

/// Translate a storage failure for `op`.
///
/// Only kinds listed in `handled` keep their meaning; everything else becomes
/// `Unknown`. Cancellation always stays cancellation.
fn classify(op: &'static str, err: RepoError, handled: &[RepoKind]) -> ServiceError {
    let kind = match err.kind() {
        RepoKind::Cancelled => ServiceKind::Cancelled,
        kind if !handled.contains(&kind) => ServiceKind::Unknown,
        RepoKind::NotFound => ServiceKind::NotFound,
        RepoKind::Duplicate => ServiceKind::BusinessLogic,
        RepoKind::InvalidArgument | RepoKind::Unknown => ServiceKind::Unknown,
    };
    ServiceError::wrap(op, kind, err)
}

fn observe<T>(operation: &str, result: &Result<T, ServiceError>) {
    match result {
        Ok(_) => record_operation(operation, "ok"),
        Err(err) => {
            if err.is(ServiceKind::Unknown) {
                warn!(error = %err, "Subscription operation failed");
            }
            record_operation(operation, &err.kind().to_string());
        }
    }
}

/// Failure inside the update transaction.
enum UpdateFailure {
    Storage(RepoError),
    Rejected(ServiceError),
}

impl From<RepoError> for UpdateFailure {
    fn from(err: RepoError) -> Self {
        UpdateFailure::Storage(err)
    }
}

#[async_trait]
impl<R, P> SubscriptionOperations for SubscriptionService<R, P>
where
    R: SubscriptionRepository,
    P: TxProvider,
{
    #[instrument(skip(self, cancel, new), fields(user_id = %new.user_id, service_name = %new.service_name))]
    async fn create(
        &self,
        cancel: &CancellationToken,
        new: NewSubscription,
    ) -> Result<Subscription, ServiceError> {
        let new = new.normalized();
        let result = cancellable(cancel, OP_CREATE, self.repo.create(&new))
            .await
            .map_err(|e| classify(OP_CREATE, e, &[RepoKind::Duplicate]));

        if let Ok(sub) = &result {
            info!(subscription_id = %sub.id, "Subscription created");
        }
        observe("create", &result);
        result
    }

    #[instrument(skip(self, cancel), fields(subscription_id = %id))]
    async fn get_by_id(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
    ) -> Result<Subscription, ServiceError> {
        let result = cancellable(cancel, OP_GET, self.repo.get_by_id(id))
            .await
            .map_err(|e| classify(OP_GET, e, &[RepoKind::NotFound]));

        observe("get_by_id", &result);
        result
    }

    #[instrument(skip(self, cancel, update), fields(subscription_id = %id))]
    async fn update(
        &self,
        cancel: &CancellationToken,
        id: Uuid,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, ServiceError> {
        let now = Utc::now();

        let outcome: Result<Subscription, UpdateFailure> = self
            .tx
            .with_transaction(cancel, move |uow| {
                Box::pin(async move {
                    let repo = uow.subscriptions();
                    let mut sub = repo.get_by_id(id).await?;

                    update.apply_to(&mut sub, now);
                    if !sub.has_valid_window() {
                        return Err(UpdateFailure::Rejected(ServiceError::wrap(
                            OP_UPDATE,
                            ServiceKind::BusinessLogic,
                            "end_date cannot be before start_date",
                        )));
                    }

                    Ok(repo.update(&sub).await?)
                })
            })
            .await;

        let result = match outcome {
            Ok(sub) => {
                info!("Subscription updated");
                Ok(sub)
            }
            Err(UpdateFailure::Rejected(err)) => Err(err),
            Err(UpdateFailure::Storage(err)) => Err(classify(
                OP_UPDATE,
                err,
                &[RepoKind::NotFound, RepoKind::Duplicate],
            )),
        };

        observe("update", &result);
        result
    }

    #[instrument(skip(self, cancel), fields(subscription_id = %id))]
    async fn delete(&self, cancel: &CancellationToken, id: Uuid) -> Result<(), ServiceError> {
        let result = cancellable(cancel, OP_DELETE, self.repo.delete(id))
            .await
            .map_err(|e| classify(OP_DELETE, e, &[RepoKind::NotFound]));

        if result.is_ok() {
            info!("Subscription deleted");
        }
        observe("delete", &result);
        result
    }

    #[instrument(skip(self, cancel))]
    async fn list(
        &self,
        cancel: &CancellationToken,
        filter: SubscriptionFilter,
    ) -> Result<Vec<Subscription>, ServiceError> {
        let result = cancellable(cancel, OP_LIST, self.repo.list(&filter))
            .await
            .map_err(|e| classify(OP_LIST, e, &[]));

        observe("list", &result);
        result
    }

    #[instrument(skip(self, cancel))]
    async fn total_cost(
        &self,
        cancel: &CancellationToken,
        filter: SubscriptionFilter,
        period_start: NaiveDate,
        period_end: NaiveDate,
    ) -> Result<i64, ServiceError> {
        let result = cancellable(cancel, OP_TOTAL_COST, self.repo.list_all(&filter))
            .await
            .map(|subs| billing::total_cost(&subs, period_start, period_end))
            .map_err(|e| classify(OP_TOTAL_COST, e, &[]));

        observe("total_cost", &result);
        result
    }
}
