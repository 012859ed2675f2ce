//! HTTP/JSON transport (axum).
//!
//! Every response is structured JSON (the exposition endpoint excepted);
//! execution outcomes travel as full `ToolOutput` bodies with the status
//! code derived from the error taxonomy, and the correlation id is always
//! echoed.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;
use warden_types::ToolInput;

use crate::registry::ExecuteOutcome;
use crate::ServerState;

/// Interval between SSE status events.
const EVENT_INTERVAL: Duration = Duration::from_secs(5);

/// Build the transport's router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_tools))
        .route("/tools/:name/execute", post(execute_tool))
        .route("/tools/:name/enable", post(enable_tool))
        .route("/tools/:name/disable", post(disable_tool))
        .route("/metrics", get(metrics))
        .route("/events", get(events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    state: ServerState,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http transport listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn health(State(state): State<ServerState>) -> Response {
    let report = match state.health.current() {
        Some(report) => report,
        None => state.health.run_once().await,
    };
    let status = match report.status {
        warden_health::HealthStatus::Healthy => StatusCode::OK,
        warden_health::HealthStatus::Degraded => StatusCode::MULTI_STATUS,
        warden_health::HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    let body = json!({
        "status": report.status,
        "timestamp": report.timestamp,
        "transport": "http",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_sec": report.uptime_sec,
        "checks": report.checks,
    });
    (status, Json(body)).into_response()
}

async fn list_tools(State(state): State<ServerState>) -> Response {
    Json(json!({ "tools": state.registry().list() })).into_response()
}

async fn execute_tool(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Json(input): Json<ToolInput>,
) -> Response {
    match state.registry().execute(&name, input).await {
        ExecuteOutcome::UnknownTool => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown tool '{name}'") })),
        )
            .into_response(),
        ExecuteOutcome::Disabled => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": format!("tool '{name}' is disabled") })),
        )
            .into_response(),
        ExecuteOutcome::Completed(output) => {
            let status = output
                .error_type
                .map(|kind| {
                    StatusCode::from_u16(kind.http_status()).unwrap_or(StatusCode::OK)
                })
                .unwrap_or(StatusCode::OK);
            (status, Json(*output)).into_response()
        }
    }
}

async fn enable_tool(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    set_enabled(&state, &name, true)
}

async fn disable_tool(State(state): State<ServerState>, Path(name): Path<String>) -> Response {
    set_enabled(&state, &name, false)
}

fn set_enabled(state: &ServerState, name: &str, enabled: bool) -> Response {
    if state.registry().set_enabled(name, enabled) {
        Json(json!({ "name": name, "enabled": enabled })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown tool '{name}'") })),
        )
            .into_response()
    }
}

async fn metrics(State(state): State<ServerState>) -> Response {
    let registry = state.registry();
    if !registry.config().metrics.prometheus_enabled {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "metrics exposition is disabled" })),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        registry.metrics().gather_text(),
    )
        .into_response()
}

async fn events(
    State(state): State<ServerState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = futures::stream::unfold((state, true), |(state, first)| async move {
        if !first {
            tokio::time::sleep(EVENT_INTERVAL).await;
        }
        let event = status_event(&state).await;
        Some((Ok(event), (state, false)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// One periodic status event: health snapshot plus per-tool state.
async fn status_event(state: &ServerState) -> Event {
    let report = match state.health.current() {
        Some(report) => report,
        None => state.health.run_once().await,
    };
    let registry = state.registry();
    let tools: Vec<_> = registry
        .list()
        .into_iter()
        .zip(registry.breaker_states())
        .map(|(listing, (_, breaker))| {
            json!({
                "name": listing.name,
                "enabled": listing.enabled,
                "breaker": breaker,
                "stats": registry.metrics().tool_stats(&listing.name),
            })
        })
        .collect();
    let payload = json!({
        "status": report.status,
        "timestamp": report.timestamp,
        "transitions": state.health.history(),
        "tools": tools,
    });
    Event::default()
        .event("status")
        .json_data(&payload)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use warden_config::Config;
    use warden_health::{HealthMonitor, MonitorSettings};

    use crate::registry::ToolRegistry;

    fn state() -> ServerState {
        let registry =
            Arc::new(ToolRegistry::from_config(Arc::new(Config::default())).expect("registry"));
        let health = Arc::new(HealthMonitor::new(MonitorSettings::default()));
        ServerState::new(registry, health).1
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn tools_listing_is_served() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/tools").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_response()).await;
        let tools = json["tools"].as_array().expect("tools array");
        assert_eq!(tools.len(), 5);
        assert!(tools.iter().any(|t| t["name"] == "PortSweep"));
    }

    #[tokio::test]
    async fn unknown_tool_is_404_with_a_structured_body() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/NoSuchTool/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target": "10.0.0.1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response.into_response()).await;
        assert!(json["error"].as_str().unwrap().contains("NoSuchTool"));
    }

    #[tokio::test]
    async fn validation_failure_is_400_with_the_full_output() {
        let app = router(state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/PortSweep/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target": "8.8.8.8"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response.into_response()).await;
        assert_eq!(json["error_type"], "VALIDATION_ERROR");
        assert_eq!(json["returncode"], 1);
        assert!(json["metadata"].is_object());
    }

    #[tokio::test]
    async fn disable_and_enable_round_trip() {
        let app_state = state();
        let app = router(app_state.clone());
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/WebEnum/disable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/WebEnum/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target": "http://10.0.0.1/"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        assert!(app_state.registry().set_enabled("WebEnum", true));
    }

    #[tokio::test]
    async fn health_endpoint_reports_a_status() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        // No checks registered: trivially healthy.
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response.into_response()).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["transport"], "http");
        assert!(json["checks"].is_object());
    }

    #[tokio::test]
    async fn metrics_exposition_is_text() {
        let app = router(state());
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/plain"));
    }
}
