//! Subscription REST handlers.
//!
//! Every handler runs its service call under a [`RequestDeadline`], so a slow
//! storage call is cancelled once the configured request timeout passes or
//! the client goes away.

use crate::dtos::{
    CreateSubscriptionRequest, ListSubscriptionsQuery, SubscriptionResponse, TotalCostQuery,
    TotalCostResponse, UpdateSubscriptionRequest,
};
use crate::ports::SubscriptionOperations;
use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    routing::get,
    Json, Router,
};
use service_core::error::AppError;
use service_core::extract::ValidatedJson;
use service_core::middleware::recovery::catch_panic_layer;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

/// State shared by the subscription routes.
#[derive(Clone)]
pub struct ApiState {
    pub service: Arc<dyn SubscriptionOperations>,
    pub request_timeout: Duration,
}

/// Routes under `/api/v1`. A panic in a handler is answered with a 500.
pub fn api_router(state: ApiState) -> Router {
    let routes = Router::new()
        .route(
            "/subscriptions",
            get(list_subscriptions).post(create_subscription),
        )
        .route("/subscriptions/total-cost", get(total_cost))
        .route(
            "/subscriptions/:id",
            get(get_subscription)
                .patch(update_subscription)
                .delete(delete_subscription),
        )
        .with_state(state)
        .layer(catch_panic_layer());

    Router::new().nest("/api/v1", routes)
}

/// Cancellation token that fires after a timeout or when dropped.
pub struct RequestDeadline {
    token: CancellationToken,
    _guard: DropGuard,
}

impl RequestDeadline {
    pub fn start(timeout: Duration) -> Self {
        let token = CancellationToken::new();
        let timer = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(timeout) => timer.cancel(),
            }
        });

        Self {
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

fn path_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    path.map(|Path(id)| id)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid subscription id: {}", e)))
}

fn query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    query
        .map(|Query(value)| value)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("Invalid query: {}", e)))
}

pub async fn list_subscriptions(
    State(state): State<ApiState>,
    params: Result<Query<ListSubscriptionsQuery>, QueryRejection>,
) -> Result<Json<Vec<SubscriptionResponse>>, AppError> {
    let filter = query(params)?.into();
    let deadline = RequestDeadline::start(state.request_timeout);

    let subs = state.service.list(deadline.token(), filter).await?;

    Ok(Json(subs.into_iter().map(SubscriptionResponse::from).collect()))
}

pub async fn create_subscription(
    State(state): State<ApiState>,
    ValidatedJson(payload): ValidatedJson<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionResponse>), AppError> {
    let new = payload.into_domain()?;
    let deadline = RequestDeadline::start(state.request_timeout);

    tracing::info!(
        user_id = %new.user_id,
        service_name = %new.service_name,
        "Creating subscription"
    );

    let sub = state.service.create(deadline.token(), new).await?;

    Ok((StatusCode::CREATED, Json(SubscriptionResponse::from(sub))))
}

pub async fn get_subscription(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let id = path_id(id)?;
    let deadline = RequestDeadline::start(state.request_timeout);

    let sub = state.service.get_by_id(deadline.token(), id).await?;

    Ok(Json(SubscriptionResponse::from(sub)))
}

pub async fn update_subscription(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
    ValidatedJson(payload): ValidatedJson<UpdateSubscriptionRequest>,
) -> Result<Json<SubscriptionResponse>, AppError> {
    let id = path_id(id)?;
    let update = payload.into_domain()?;
    let deadline = RequestDeadline::start(state.request_timeout);

    tracing::info!(subscription_id = %id, "Updating subscription");

    let sub = state.service.update(deadline.token(), id, update).await?;

    Ok(Json(SubscriptionResponse::from(sub)))
}

pub async fn delete_subscription(
    State(state): State<ApiState>,
    id: Result<Path<Uuid>, PathRejection>,
) -> Result<StatusCode, AppError> {
    let id = path_id(id)?;
    let deadline = RequestDeadline::start(state.request_timeout);

    tracing::info!(subscription_id = %id, "Deleting subscription");

    state.service.delete(deadline.token(), id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn total_cost(
    State(state): State<ApiState>,
    params: Result<Query<TotalCostQuery>, QueryRejection>,
) -> Result<Json<TotalCostResponse>, AppError> {
    let (filter, start, end) = query(params)?.into_domain()?;
    let deadline = RequestDeadline::start(state.request_timeout);

    let total_cost = state
        .service
        .total_cost(deadline.token(), filter, start, end)
        .await?;

    Ok(Json(TotalCostResponse { total_cost }))
}
