use std::net::SocketAddr;

use axum::{
    Extension, Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    response::IntoResponse,
    routing::{any, get},
};
use serde_json::json;
use smartgate_auth::policy::AbacDecision;
use smartgate_auth::{AuthServices, MaintenanceTasks, RequestIdentity, auth_routes, enforce};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;

pub fn build_app(services: AuthServices, cfg: &AppConfig) -> Router {
    let fhir_root = format!("{}/{{*path}}", services.fhir_path());
    let fhir = Router::new()
        .route(&fhir_root, any(fhir_gateway))
        .route_layer(middleware::from_fn_with_state(services.clone(), enforce));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(fhir)
        .merge(auth_routes())
        .with_state(services)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(DefaultBodyLimit::max(cfg.server.body_limit_bytes))
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Stands in for the FHIR data plane: anything that gets past enforcement
/// is answered with the identity and obligations it was admitted with.
async fn fhir_gateway(
    Extension(identity): Extension<RequestIdentity>,
    decision: Option<Extension<AbacDecision>>,
) -> impl IntoResponse {
    Json(json!({
        "identity": identity,
        "abac": decision.map(|Extension(d)| d),
    }))
}

pub struct ServerBuilder {
    config: AppConfig,
    addr: Option<SocketAddr>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            addr: None,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.config = cfg;
        self
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Wires the auth subsystem over in-memory stores and loads the
    /// bootstrap credentials.
    pub async fn build(self) -> anyhow::Result<SmartgateServer> {
        let services = AuthServices::in_memory(self.config.auth.clone())?;
        services.bootstrap().await?;
        let app = build_app(services.clone(), &self.config);
        Ok(SmartgateServer {
            addr: self.addr.unwrap_or_else(|| self.config.addr()),
            app,
            services,
            shutdown: CancellationToken::new(),
        })
    }
}

pub struct SmartgateServer {
    addr: SocketAddr,
    app: Router,
    services: AuthServices,
    shutdown: CancellationToken,
}

impl SmartgateServer {
    pub fn services(&self) -> &AuthServices {
        &self.services
    }

    /// Cancelling this token stops the server as Ctrl+C would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener until shutdown, then stops the
    /// maintenance tasks and cancels outstanding lookups.
    pub async fn serve(self, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
        tracing::info!("listening on {}", listener.local_addr()?);
        let tasks: MaintenanceTasks = self.services.spawn_maintenance();
        let result = axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal(self.shutdown))
            .await;

        self.services.shutdown();
        tasks.shutdown().await;
        result?;
        Ok(())
    }
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = token.cancelled() => {}
    }
    tracing::info!("shutdown signal received");
}
