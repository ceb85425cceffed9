//! Application startup and lifecycle management.

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::api_key::{require_api_key, ApiKeys};
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::rate_limit::{
    api_key_rate_limit_middleware, create_keyed_rate_limiter, KeyedRateLimiter,
};
use service_core::middleware::tracing::{make_request_span, request_id_middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::adapters::{build_adapter, ApAdapter};
use crate::config::Config;
use crate::delivery::{DeliveryOrchestrator, RetryPolicy};
use crate::guards::{IdempotencyGuard, ReplayGuard};
use crate::handlers;
use crate::services::{Reconciler, SubmissionService};
use crate::stores::{ArtifactStore, DlqStore, StatusStore, SubmissionStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub api_keys: ApiKeys,
    pub adapter: Arc<dyn ApAdapter>,
    pub orchestrator: DeliveryOrchestrator,
    pub submissions: SubmissionService,
    pub reconciler: Reconciler,
    pub idempotency: IdempotencyGuard,
    pub replay: Arc<ReplayGuard>,
    pub status: Arc<StatusStore>,
    pub dlq: Arc<DlqStore>,
    pub rate_limiter: KeyedRateLimiter,
}

impl AsRef<ApiKeys> for AppState {
    fn as_ref(&self) -> &ApiKeys {
        &self.api_keys
    }
}

impl AppState {
    /// Open stores and wire services around `adapter`.
    pub async fn build(
        config: Config,
        adapter: Arc<dyn ApAdapter>,
        shutdown: CancellationToken,
    ) -> Result<Self, AppError> {
        let storage = &config.storage;
        tokio::fs::create_dir_all(&storage.data_dir).await?;

        let status = Arc::new(StatusStore::open(&storage.status_path).await?);
        let submission_store = Arc::new(SubmissionStore::open(&storage.submissions_path).await?);
        let dlq = Arc::new(DlqStore::new(&storage.dlq_path));
        let artifacts = ArtifactStore::new(&storage.history_dir);

        let orchestrator = DeliveryOrchestrator::new(
            adapter.clone(),
            status.clone(),
            dlq.clone(),
            RetryPolicy::from(config.delivery),
            config.environment.clone(),
            shutdown,
        );
        let idempotency = IdempotencyGuard::new(config.guards.idempotency_ttl);
        let submissions = SubmissionService::new(
            orchestrator.clone(),
            idempotency.clone(),
            submission_store.clone(),
            status.clone(),
            artifacts.clone(),
        );
        let reconciler = Reconciler::new(status.clone(), submission_store, artifacts, adapter.clone());

        let rate_limiter = create_keyed_rate_limiter(
            config.rate_limit_per_minute,
            Duration::from_secs(60),
        );

        Ok(Self {
            api_keys: ApiKeys::new(config.api_keys.clone()),
            replay: Arc::new(ReplayGuard::new(config.guards.replay_ttl)),
            config: Arc::new(config),
            adapter,
            orchestrator,
            submissions,
            reconciler,
            idempotency,
            status,
            dlq,
            rate_limiter,
        })
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Clear the in-process idempotency and replay caches.
    pub fn reset_caches(&self) {
        self.idempotency.reset();
        self.replay.reset();
    }
}

pub fn router(state: AppState) -> Router {
    let submissions = Router::new()
        .route("/v0/invoices", post(handlers::submit_invoice))
        .route("/v0/invoices/:invoice_id", get(handlers::get_invoice))
        .layer(from_fn_with_state(
            state.rate_limiter.clone(),
            api_key_rate_limit_middleware,
        ));

    let protected = Router::new()
        .merge(submissions)
        .route("/ap/status-webhook", post(handlers::ap_status_webhook))
        .layer(from_fn_with_state(state.clone(), require_api_key::<AppState>));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/webhooks/scrada", post(handlers::scrada_webhook))
        .merge(protected)
        .with_state(state)
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(from_fn(request_id_middleware))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Application {
    /// Build with the adapter named in configuration.
    pub async fn build(config: Config) -> Result<Self, AppError> {
        let adapter = build_adapter(&config.ap).map_err(|e| {
            tracing::error!(error = %e, "Failed to build access point adapter");
            AppError::ConfigError(e.into())
        })?;
        Self::build_with_adapter(config, adapter).await
    }

    pub async fn build_with_adapter(
        config: Config,
        adapter: Arc<dyn ApAdapter>,
    ) -> Result<Self, AppError> {
        if config.api_keys.is_empty() {
            tracing::warn!("EINVOICE_API_KEYS is empty; authenticated routes will fail");
        }

        let shutdown = CancellationToken::new();
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Invalid listen address: {e}"))
            })?;
        let state = AppState::build(config, adapter, shutdown.clone()).await?;

        // Port 0 picks a random port for tests.
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();
        tracing::info!(
            port,
            adapter = state.adapter_name(),
            environment = %state.config.environment,
            "einvoice-service listening"
        );

        Ok(Self {
            port,
            listener,
            state,
            shutdown,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Cancelled on shutdown; ends pending delivery backoffs early.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until ctrl-c or the shutdown token is cancelled.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let shutdown = self.shutdown.clone();
        let app = router(self.state);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        tracing::info!("Shutdown signal received");
                    }
                    _ = shutdown.cancelled() => {}
                }
                shutdown.cancel();
            })
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
