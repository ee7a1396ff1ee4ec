//! Common test utilities for subscription-service integration tests.
//!
//! Provides an in-memory store with a repository and a transaction provider
//! that stage writes until commit, plus fault injection per storage operation.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{NaiveDate, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use subscription_service::errors::{RepoError, RepoKind};
use subscription_service::handlers::{api_router, ApiState};
use subscription_service::models::{
    NewSubscription, PageLimits, Subscription, SubscriptionFilter,
};
use subscription_service::ports::{SubscriptionRepository, TxProvider, UnitOfWork};
use subscription_service::services::SubscriptionService;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use uuid::Uuid;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,subscription_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub fn ym(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap()
}

/// Shared state behind the in-memory repository.
#[derive(Default)]
pub struct Store {
    rows: Mutex<Vec<Subscription>>,
    faults: Mutex<HashMap<&'static str, RepoKind>>,
    hangs: Mutex<HashSet<&'static str>>,
    calls: Mutex<HashMap<&'static str, usize>>,
    sequence: AtomicI64,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call to `op` fail with `kind`.
    pub fn fail(&self, op: &'static str, kind: RepoKind) {
        self.faults.lock().unwrap().insert(op, kind);
    }

    /// Make every call to `op` wait forever.
    pub fn hang(&self, op: &'static str) {
        self.hangs.lock().unwrap().insert(op);
    }

    pub fn calls(&self, op: &str) -> usize {
        self.calls.lock().unwrap().get(op).copied().unwrap_or(0)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    /// Committed rows.
    pub fn rows(&self) -> Vec<Subscription> {
        self.rows.lock().unwrap().clone()
    }

    pub fn row(&self, id: Uuid) -> Option<Subscription> {
        self.rows.lock().unwrap().iter().find(|s| s.id == id).cloned()
    }

    /// Insert a committed row directly, bypassing the service.
    pub fn seed(&self, new: NewSubscription) -> Subscription {
        let sub = self.materialize(new);
        self.rows.lock().unwrap().push(sub.clone());
        sub
    }

    fn materialize(&self, new: NewSubscription) -> Subscription {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now() + chrono::Duration::microseconds(seq);
        Subscription {
            id: Uuid::new_v4(),
            service_name: new.service_name,
            monthly_cost: new.monthly_cost,
            user_id: new.user_id,
            start_date: new.start_date,
            end_date: new.end_date,
            created_at: now,
            updated_at: now,
        }
    }

    async fn enter(&self, op: &'static str) -> Result<(), RepoError> {
        *self.calls.lock().unwrap().entry(op).or_default() += 1;

        let hang = self.hangs.lock().unwrap().contains(op);
        if hang {
            std::future::pending::<()>().await;
        }

        let fault = self.faults.lock().unwrap().get(op).copied();
        match fault {
            Some(kind) => Err(RepoError::new(repo_op(op), kind)),
            None => Ok(()),
        }
    }
}

fn repo_op(op: &str) -> &'static str {
    match op {
        "create" => "memory_repo.create",
        "get_by_id" => "memory_repo.get_by_id",
        "update" => "memory_repo.update",
        "delete" => "memory_repo.delete",
        "list" => "memory_repo.list",
        "list_all" => "memory_repo.list_all",
        _ => "memory_repo.unknown",
    }
}

fn matches_filter(sub: &Subscription, filter: &SubscriptionFilter) -> bool {
    filter.user_id.map_or(true, |id| sub.user_id == id)
        && filter
            .service_name
            .as_deref()
            .map_or(true, |name| sub.service_name == name)
}

/// In-memory repository. Outside a transaction it writes committed rows
/// directly; inside one it writes to a staged copy.
pub struct MemoryRepository {
    store: Arc<Store>,
    staged: Option<Mutex<Vec<Subscription>>>,
    limits: PageLimits,
}

impl MemoryRepository {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            staged: None,
            limits: PageLimits::default(),
        }
    }

    fn with_rows<R>(&self, f: impl FnOnce(&mut Vec<Subscription>) -> R) -> R {
        match &self.staged {
            Some(staged) => f(&mut staged.lock().unwrap()),
            None => f(&mut self.store.rows.lock().unwrap()),
        }
    }
}

#[async_trait]
impl SubscriptionRepository for MemoryRepository {
    async fn create(&self, new: &NewSubscription) -> Result<Subscription, RepoError> {
        self.store.enter("create").await?;
        let sub = self.store.materialize(new.clone());
        self.with_rows(|rows| {
            if rows
                .iter()
                .any(|s| s.user_id == sub.user_id && s.service_name == sub.service_name)
            {
                return Err(RepoError::new(repo_op("create"), RepoKind::Duplicate));
            }
            rows.push(sub.clone());
            Ok(sub)
        })
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Subscription, RepoError> {
        self.store.enter("get_by_id").await?;
        self.with_rows(|rows| {
            rows.iter()
                .find(|s| s.id == id)
                .cloned()
                .ok_or_else(|| RepoError::new(repo_op("get_by_id"), RepoKind::NotFound))
        })
    }

    async fn update(&self, sub: &Subscription) -> Result<Subscription, RepoError> {
        self.store.enter("update").await?;
        self.with_rows(|rows| {
            if rows.iter().any(|s| {
                s.id != sub.id && s.user_id == sub.user_id && s.service_name == sub.service_name
            }) {
                return Err(RepoError::new(repo_op("update"), RepoKind::Duplicate));
            }
            let slot = rows
                .iter_mut()
                .find(|s| s.id == sub.id)
                .ok_or_else(|| RepoError::new(repo_op("update"), RepoKind::NotFound))?;
            *slot = sub.clone();
            Ok(sub.clone())
        })
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.store.enter("delete").await?;
        self.with_rows(|rows| {
            let before = rows.len();
            rows.retain(|s| s.id != id);
            if rows.len() == before {
                return Err(RepoError::new(repo_op("delete"), RepoKind::NotFound));
            }
            Ok(())
        })
    }

    async fn list(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError> {
        self.store.enter("list").await?;
        let (limit, offset) = self.limits.resolve(filter);
        Ok(self.with_rows(|rows| {
            let mut matching: Vec<Subscription> = rows
                .iter()
                .filter(|s| matches_filter(s, filter))
                .cloned()
                .collect();
            matching.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
            matching
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect()
        }))
    }

    async fn list_all(&self, filter: &SubscriptionFilter) -> Result<Vec<Subscription>, RepoError> {
        self.store.enter("list_all").await?;
        Ok(self.with_rows(|rows| {
            rows.iter()
                .filter(|s| matches_filter(s, filter))
                .cloned()
                .collect()
        }))
    }
}

struct MemoryUnitOfWork {
    subscriptions: MemoryRepository,
}

impl UnitOfWork for MemoryUnitOfWork {
    fn subscriptions(&self) -> &dyn SubscriptionRepository {
        &self.subscriptions
    }
}

/// Transaction provider over [`Store`]: work runs against a copy of the
/// committed rows which replaces them only on commit.
pub struct MemoryTxProvider {
    store: Arc<Store>,
}

impl MemoryTxProvider {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TxProvider for MemoryTxProvider {
    async fn with_transaction<T, E, F>(&self, cancel: &CancellationToken, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<RepoError> + Send + 'static,
        F: for<'u> FnOnce(&'u dyn UnitOfWork) -> BoxFuture<'u, Result<T, E>> + Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(RepoError::new("memory_tx.begin", RepoKind::Cancelled).into());
        }

        let snapshot = self.store.rows();
        let uow = MemoryUnitOfWork {
            subscriptions: MemoryRepository {
                store: self.store.clone(),
                staged: Some(Mutex::new(snapshot)),
                limits: PageLimits::default(),
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

        match outcome {
            Ok(Some(Ok(value))) => {
                let staged = uow
                    .subscriptions
                    .staged
                    .map(|rows| rows.into_inner().unwrap())
                    .unwrap_or_default();
                *self.store.rows.lock().unwrap() = staged;
                self.store.commits.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            }
            Ok(Some(Err(err))) => {
                self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
                Err(err)
            }
            Ok(None) => {
                self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
                Err(RepoError::new("memory_tx.run", RepoKind::Cancelled).into())
            }
            Err(panic) => {
                self.store.rollbacks.fetch_add(1, Ordering::SeqCst);
                std::panic::resume_unwind(panic)
            }
        }
    }
}

pub type MemoryService = SubscriptionService<MemoryRepository, MemoryTxProvider>;

pub fn service(store: &Arc<Store>) -> MemoryService {
    SubscriptionService::new(
        MemoryRepository::new(store.clone()),
        MemoryTxProvider::new(store.clone()),
    )
}

pub fn new_subscription(
    user_id: Uuid,
    name: &str,
    cost: i64,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> NewSubscription {
    NewSubscription {
        service_name: name.to_string(),
        monthly_cost: cost,
        user_id,
        start_date: start,
        end_date: end,
    }
}

/// API router over the in-memory store.
pub fn router(store: &Arc<Store>, request_timeout: Duration) -> Router {
    init_tracing();
    api_router(ApiState {
        service: Arc::new(service(store)),
        request_timeout,
    })
}

/// Send a request and decode the JSON body (`Value::Null` when empty).
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Get the database URL for testing. Postgres-backed tests are skipped when
/// `TEST_DATABASE_URL` is unset.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL").ok().filter(|url| !url.is_empty())
}

static SCHEMA_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Generate a unique schema name for test isolation.
fn unique_schema_name() -> String {
    let counter = SCHEMA_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("test_subscription_{}_{}", std::process::id(), counter)
}

/// Full application on a random port, backed by its own Postgres schema.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    /// Pool on the test schema, for driving storage directly.
    pub pool: sqlx::PgPool,
    shutdown: CancellationToken,
    base_url: String,
    schema_name: String,
}

impl TestApp {
    /// Spawn the application, or `None` when no test database is configured.
    pub async fn spawn() -> Option<Self> {
        init_tracing();
        subscription_service::services::init_metrics().unwrap();

        let base_url = test_database_url()?;
        let schema_name = unique_schema_name();

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&base_url)
            .await
            .expect("Failed to connect to test database");
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&pool)
            .await
            .ok();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&pool)
            .await
            .expect("Failed to create test schema");
        pool.close().await;

        let separator = if base_url.contains('?') { "&" } else { "?" };
        let url = format!(
            "{}{}options=-c search_path%3D{}",
            base_url, separator, schema_name
        );

        let mut vars = HashMap::new();
        vars.insert("DATABASE_URL", url.clone());
        vars.insert("DATABASE_MAX_CONNECTIONS", "5".to_string());
        vars.insert("DATABASE_MIN_CONNECTIONS", "1".to_string());
        vars.insert("LOG_LEVEL", "warn".to_string());

        let common = service_core::config::Config {
            port: 0,
            environment: service_core::config::Environment::Dev,
        };
        let config = subscription_service::config::SubscriptionConfig::from_lookup(common, |key| {
            vars.get(key).cloned()
        })
        .expect("Failed to build test config");

        let app = subscription_service::Application::build(config)
            .await
            .expect("Failed to build test application");
        let address = format!("http://127.0.0.1:{}", app.port());
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("Failed to connect to test schema");

        let shutdown = CancellationToken::new();
        let stop = shutdown.clone();
        tokio::spawn(async move {
            app.run_until_stopped(stop).await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        Some(TestApp {
            address,
            client,
            pool,
            shutdown,
            base_url,
            schema_name,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Stop the server and drop the test schema.
    pub async fn cleanup(&self) {
        self.shutdown.cancel();
        self.pool.close().await;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.base_url)
            .await
            .ok();

        if let Some(pool) = pool {
            let _ = sqlx::query(&format!(
                "DROP SCHEMA IF EXISTS {} CASCADE",
                self.schema_name
            ))
            .execute(&pool)
            .await;
            pool.close().await;
        }
    }
}
