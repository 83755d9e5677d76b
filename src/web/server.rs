use anyhow::Result;
use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method, Request},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use uuid::Uuid;

use super::auth::{ApiKeyStore, API_KEY_HEADER};
use super::handlers;
use crate::config::ServerConfig;
use crate::deployment::ClientConfig;
use crate::ml::MLEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MLEngine>,
    pub keys: Arc<ApiKeyStore>,
    pub auth_enabled: bool,
    pub client_config: Arc<ClientConfig>,
    pub metrics: Option<PrometheusHandle>,
}

pub struct ApiServer {
    state: AppState,
    config: ServerConfig,
}

impl ApiServer {
    pub fn new(state: AppState, config: ServerConfig) -> Self {
        Self { state, config }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.config)
    }

    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Exoplanet detection API listening on http://{}", addr);
        info!("Advertised API base: {}", self.state.client_config.api_base_url);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutdown signal received, draining connections");
            })
            .await?;
        Ok(())
    }
}

/// Local (`/`, `/health`) and hosted (`/api/...`) route shapes are both
/// mounted, so one binary serves either deployment.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, HeaderName::from_static(API_KEY_HEADER)]);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        tracing::info_span!(
            "request",
            id = %Uuid::new_v4(),
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    let mut router = Router::new()
        .route("/", get(handlers::service_info).post(handlers::predict_csv))
        .route("/health", get(handlers::health))
        .route("/predict", post(handlers::predict_series))
        .route("/predict_batch", post(handlers::predict_batch))
        .route("/generate_key", post(handlers::generate_key))
        .route("/admin/reload", post(handlers::reload_model))
        .route("/metrics", get(handlers::render_metrics))
        .route("/api", get(handlers::service_info))
        .route("/api/health", get(handlers::health))
        .route("/api/config", get(handlers::client_config))
        .route("/api/predict", post(handlers::predict_csv))
        .route("/api/predict/series", post(handlers::predict_series))
        .route("/api/predict/batch", post(handlers::predict_batch))
        .fallback(handlers::not_found);

    if let Some(dir) = &config.static_dir {
        router = router.nest_service("/static", ServeDir::new(dir));
    }

    router
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_seconds)))
        .layer(cors)
        .layer(trace)
        .with_state(state)
}
