//! Application startup and lifecycle management.

use crate::config::SubscriptionConfig;
use crate::handlers::{self, api_router, ApiState};
use crate::ports::SubscriptionOperations;
use crate::services::{Database, PgSubscriptionRepository, PgTxProvider, SubscriptionService};
use axum::{middleware::from_fn, routing::get, Router};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Wrap the API routes with health, readiness and metrics endpoints plus the
/// shared middleware stack. The request id layer is outermost so the trace
/// span always carries an id.
pub fn build_router(api: ApiState, database: Database) -> Router {
    let health_routes = Router::new()
        .route("/ready", get(handlers::readiness_check))
        .with_state(database);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .merge(health_routes)
        .merge(api_router(api))
        .layer(from_fn(metrics_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        .layer(from_fn(request_id_middleware))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
    database: Database,
    shutdown_timeout: Duration,
}

impl Application {
    /// Connect to the database, run migrations and bind the listener.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        let database = Database::new(&config.database).await?;
        database.run_migrations().await?;

        let limits = config.repository.page_limits;
        let repository = PgSubscriptionRepository::new(database.pool().clone(), limits);
        let tx_provider = PgTxProvider::new(
            database.pool().clone(),
            limits,
            config.app.request_timeout,
        );
        let service: Arc<dyn SubscriptionOperations> =
            Arc::new(SubscriptionService::new(repository, tx_provider));

        let api = ApiState {
            service,
            request_timeout: config.app.request_timeout,
        };
        let router = build_router(api, database.clone());

        // Port 0 picks a random port
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            listener,
            router,
            database,
            shutdown_timeout: config.app.shutdown_timeout,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve until `shutdown` fires, then drain in-flight requests for at most
    /// the configured shutdown timeout and close the pool.
    pub async fn run_until_stopped(self, shutdown: CancellationToken) -> Result<(), AppError> {
        tracing::info!(port = self.port, "HTTP server listening");

        let signal = shutdown.clone();
        let server = axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .into_future();
        let shutdown_timeout = self.shutdown_timeout;
        let drain_deadline = async {
            shutdown.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        };

        tokio::select! {
            result = server => result?,
            _ = drain_deadline => {
                tracing::warn!(
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Graceful shutdown timed out, dropping open connections"
                );
            }
        }

        self.database.close().await;
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
