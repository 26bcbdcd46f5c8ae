//! Axum server setup and router configuration.

use crate::api;
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .nest("/api/v1", api::router())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    /// Delivery pairs not yet delivered or given up on.
    backlog: u64,
}

/// Healthy while the ledger answers.
async fn health_check(state: State<AppState>) -> impl IntoResponse {
    match state.ledger.backlog_depth().await {
        Ok(backlog) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy",
                version: env!("CARGO_PKG_VERSION"),
                backlog,
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "ledger unavailable").into_response()
        }
    }
}

/// Prometheus text exposition.
async fn metrics() -> impl IntoResponse {
    match chainbell_core::metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Run the server until `shutdown` resolves.
pub async fn run_server(
    router: Router,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AdminConfig;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use chainbell_core::ledger::MemoryLedger;
    use chainbell_core::registry::{MemoryRegistry, SubscriptionRegistry};
    use chainbell_sdk::objects::SubscriptionResponse;
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "hunter2";

    fn app() -> (Router, Arc<MemoryRegistry>) {
        let registry = Arc::new(MemoryRegistry::new());
        let state = AppState::new(
            registry.clone(),
            Arc::new(MemoryLedger::new()),
            AdminConfig::new(Some(TOKEN)),
        );
        (build_router(state), registry)
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_backlog() {
        let (app, _) = app();
        let response = app
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backlog"], 0);
    }

    #[tokio::test]
    async fn test_metrics_are_exposed() {
        let (app, _) = app();
        let response = app
            .oneshot(request("GET", "/metrics", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; version=0.0.4"
        );
    }

    #[tokio::test]
    async fn test_subscription_api_requires_token() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/subscriptions?recipient_id=-1001", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request(
                "GET",
                "/api/v1/subscriptions?recipient_id=-1001",
                Some("wrong"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let (app, registry) = app();
        let body = r#"{"recipient_id":"-1001","filter":{"kind":"buy","min_amount":"10"},"display":{"symbol":"MOON","chart_url":"https://dexscreener.com/sui/0xpool"}}"#;
        let response = app
            .clone()
            .oneshot(request("POST", "/api/v1/subscriptions", Some(TOKEN), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: SubscriptionResponse = json(response).await;
        assert_eq!(created.recipient_id, "-1001");
        assert_eq!(created.display.symbol.as_deref(), Some("MOON"));
        assert_eq!(
            created.display.chart_url.as_deref(),
            Some("https://dexscreener.com/sui/0xpool")
        );
        assert!(registry.get(created.id).await.unwrap().is_some());

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/v1/subscriptions?recipient_id=-1001",
                Some(TOKEN),
                None,
            ))
            .await
            .unwrap();
        let listed: Vec<SubscriptionResponse> = json(response).await;
        assert_eq!(listed, vec![created.clone()]);

        let uri = format!("/api/v1/subscriptions/{}", created.id);
        let response = app
            .clone()
            .oneshot(request("DELETE", &uri, Some(TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(request("DELETE", &uri, Some(TOKEN), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_subscription_is_rejected() {
        let (app, _) = app();
        let body = r#"{"recipient_id":"not a chat","filter":{}}"#;
        let response = app
            .oneshot(request("POST", "/api/v1/subscriptions", Some(TOKEN), Some(body)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
