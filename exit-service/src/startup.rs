use crate::config::{ExitConfig, StorageBackend};
use crate::handlers;
use crate::services::{
    Database, IdentityDirectory, IdentityResolver, LifecycleEngine, MemoryStore, OversightView,
    PassVerifier, RequestStore,
};
use axum::{
    body::Body,
    http::Request,
    middleware,
    routing::{get, post, put},
    Router,
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: ExitConfig,
    pub store: Arc<dyn RequestStore>,
    pub identity: IdentityResolver,
    pub engine: LifecycleEngine,
    pub verifier: PassVerifier,
    pub oversight: OversightView,
}

impl AppState {
    pub fn new(
        config: ExitConfig,
        store: Arc<dyn RequestStore>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        let identity = IdentityResolver::new(directory);
        let engine = LifecycleEngine::new(store.clone(), identity.clone(), config.review.policy());
        let verifier = PassVerifier::new(store.clone(), identity.clone());
        let oversight = OversightView::new(store.clone(), identity.clone());

        Self {
            config,
            store,
            identity,
            engine,
            verifier,
            oversight,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .route("/me", get(handlers::profile::me))
        .route("/me/profile", put(handlers::profile::update_profile))
        .route("/halls", get(handlers::profile::list_halls))
        .route("/requests", post(handlers::requests::submit_request))
        .route("/requests/mine", get(handlers::requests::my_requests))
        .route(
            "/requests/:id",
            get(handlers::requests::get_request)
                .put(handlers::requests::edit_request)
                .delete(handlers::requests::withdraw_request),
        )
        .route(
            "/requests/:id/review",
            post(handlers::requests::review_request),
        )
        .route("/requests/:id/exit", post(handlers::gate::mark_exited))
        .route("/requests/:id/return", post(handlers::gate::mark_returned))
        .route("/reviews/queue", get(handlers::requests::review_queue))
        .route("/passes/:credential", get(handlers::gate::lookup_pass))
        .route("/gate/recent", get(handlers::gate::recent_activity))
        .route("/oversight/summary", get(handlers::oversight::summary))
        .route("/oversight/requests", get(handlers::oversight::list_requests))
        .route("/oversight/users", get(handlers::oversight::list_users))
        .route("/oversight/overdue", get(handlers::oversight::overdue))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                    user_id = tracing::field::Empty,
                )
            }),
        )
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

pub struct Application {
    port: u16,
    server: Box<dyn std::future::Future<Output = std::io::Result<()>> + Send + Unpin>,
}

impl Application {
    pub async fn build(config: ExitConfig) -> Result<Self, AppError> {
        let (store, directory): (Arc<dyn RequestStore>, Arc<dyn IdentityDirectory>) =
            match config.storage {
                StorageBackend::Postgres => {
                    let db_config = config.database.as_ref().ok_or_else(|| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "DATABASE_URL is required for the postgres backend"
                        ))
                    })?;
                    let db = Database::new(
                        db_config.url.expose_secret(),
                        db_config.max_connections,
                        db_config.min_connections,
                    )
                    .await?;
                    db.run_migrations().await?;

                    let db = Arc::new(db);
                    let store: Arc<dyn RequestStore> = db.clone();
                    let directory: Arc<dyn IdentityDirectory> = db;
                    (store, directory)
                }
                StorageBackend::Memory => {
                    tracing::warn!("Using in-memory storage; data is lost on restart");
                    let memory = Arc::new(MemoryStore::new());
                    let store: Arc<dyn RequestStore> = memory.clone();
                    let directory: Arc<dyn IdentityDirectory> = memory;
                    (store, directory)
                }
            };

        let state = AppState::new(config.clone(), store, directory);
        let app = build_router(state);

        let addr = format!("{}:{}", config.common.host, config.common.port);
        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            tracing::error!("Failed to bind TCP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            service = %config.service_name,
            version = %config.service_version,
            "Listening on {}",
            port
        );

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        Ok(Self {
            port,
            server: Box::new(server.into_future()),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.server.await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
