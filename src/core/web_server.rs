//! HTTP side of the bot: billing callback, payment return page, health and metrics.
//!
//! Runs on WEB_PORT. In webhook mode the Telegram update route is merged into
//! the same router, so one listener serves everything.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::billing::webhook::{self, WebhookState, SIGNATURE_HEADER};
use crate::core::metrics;

/// Shared state for the web server.
#[derive(Clone, Default)]
pub struct WebState {
    /// `None` when payments are not configured; callbacks then get 503.
    pub billing: Option<WebhookState>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/billing/webhook", post(billing_webhook_handler))
        .route("/billing/return", get(billing_return_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serves `app` on `port` until `shutdown` is cancelled.
pub async fn start_web_server(port: u16, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(&addr).await?;

    log::info!("Starting web server on http://{}", addr);
    log::info!("  /billing/webhook - Payment provider callback");
    log::info!("  /billing/return  - Post-checkout landing page");
    log::info!("  /health          - Health check");
    log::info!("  /metrics         - Prometheus metrics");

    serve(listener, app, shutdown).await
}

pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> anyhow::Result<()> {
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("Web server stopped");
    Ok(())
}

/// POST /billing/webhook. The raw body is needed for the signature check.
async fn billing_webhook_handler(State(state): State<WebState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let Some(billing) = state.billing else {
        log::warn!("Billing callback received but payments are not configured");
        return StatusCode::SERVICE_UNAVAILABLE;
    };
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    webhook::handle_callback(&billing, signature, &body).await
}

#[derive(Debug, Deserialize)]
struct ReturnQuery {
    reference: Option<String>,
}

/// GET /billing/return: where the provider sends the browser after checkout.
async fn billing_return_handler(Query(query): Query<ReturnQuery>) -> Html<String> {
    if let Some(reference) = &query.reference {
        log::info!("Checkout return for {}", reference);
    }
    Html(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>TurnitQ</title></head>\
         <body><h1>Thanks!</h1><p>Your payment is being confirmed. \
         You'll get a message in Telegram as soon as your plan is active.</p></body></html>"
            .to_string(),
    )
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            log::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to encode metrics: {}", e)).into_response()
        }
    }
}
