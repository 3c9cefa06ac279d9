//! HTTP surface for the UI. Every endpoint answers with the current status
//! document; mutating endpoints apply their change first. Bodies are decoded
//! leniently: a request we cannot parse is logged and ignored, and the
//! client still gets a fresh status to render.

use std::net::SocketAddr;

use anyhow::Result;
use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::args::Specification;
use crate::hub::Hub;
use crate::types::{LimitRequest, StartRequest};

#[derive(Clone)]
struct AppState {
    hub: Hub,
}

pub fn router(hub: Hub) -> Router {
    Router::new()
        .route("/reaper/status", get(status).post(status))
        .route("/reaper/setMemLimit", post(set_mem_limit))
        .route("/reaper/setStartHour", post(set_start_hour))
        .route("/reaper/extend", post(extend))
        .route("/reaper/restart", post(restart))
        .with_state(AppState { hub })
}

pub async fn run(hub: Hub, spec: &Specification) -> Result<()> {
    let mut app = router(hub);
    if spec.cors_enabled {
        tracing::info!(origins = ?spec.cors_origins, "CORS enabled");
        app = app.layer(podreaper_common::cors::layer(&spec.cors_origins));
    }
    if !spec.static_files.is_empty() {
        app = app.fallback_service(ServeDir::new(&spec.static_files));
    }

    let addr: SocketAddr = format!("0.0.0.0:{}", spec.port).parse()?;
    tracing::info!(%addr, "serving status");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(podreaper_common::shutdown::shutdown_signal())
        .await?;
    Ok(())
}

async fn current_status(hub: &Hub) -> ([(header::HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "application/json")],
        hub.status().await,
    )
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    current_status(&state.hub).await
}

async fn set_mem_limit(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<LimitRequest>(&body) {
        Ok(req) => {
            let mut cfg = state.hub.config_for(&req.namespace).await;
            cfg.limit = req.limit;
            state.hub.update_config(cfg).await;
        }
        Err(err) => tracing::warn!(error = %err, "undecodable setMemLimit request"),
    }
    current_status(&state.hub).await
}

async fn set_start_hour(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<StartRequest>(&body) {
        Ok(req) if req.start_hour.is_none_or(|h| h <= 23) => {
            let mut cfg = state.hub.config_for(&req.namespace).await;
            cfg.auto_start_hour = req.start_hour;
            state.hub.update_config(cfg).await;
        }
        Ok(req) => {
            tracing::warn!(namespace = %req.namespace, hour = ?req.start_hour, "start hour out of range")
        }
        Err(err) => tracing::warn!(error = %err, "undecodable setStartHour request"),
    }
    current_status(&state.hub).await
}

async fn extend(State(state): State<AppState>, body: String) -> impl IntoResponse {
    match serde_json::from_str::<StartRequest>(&body) {
        Ok(req) => {
            let mut cfg = state.hub.config_for(&req.namespace).await;
            cfg.last_started = Utc::now().timestamp() - 1;
            state.hub.update_config(cfg).await;
        }
        Err(err) => tracing::warn!(error = %err, "undecodable extend request"),
    }
    current_status(&state.hub).await
}

async fn restart(State(_state): State<AppState>) -> StatusCode {
    // The supervisor restarts us; exiting clean is the whole point.
    tracing::info!("restart requested, exiting");
    std::process::exit(0)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::hub::testing::started_hub;
    use crate::k8s::fake::FakeCluster;
    use crate::types::{DEFAULT_LIMIT_GIB, NsState, Status};

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_status(response: axum::response::Response) -> Status {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn state(name: &str) -> NsState {
        NsState {
            name: name.into(),
            has_down_quota: false,
            mem_used: 0,
            remaining: String::new(),
            last_scheduled: 0,
        }
    }

    #[tokio::test]
    async fn status_returns_json_document() {
        let (hub, _trigger) = started_hub(Arc::new(FakeCluster::default()));
        hub.update_state(state("a")).await;

        let response = router(hub)
            .oneshot(post_json("/reaper/status", ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
        let status = body_status(response).await;
        assert_eq!(status.namespaces.len(), 1);
        assert_eq!(status.namespaces[0].name, "a");
    }

    #[tokio::test]
    async fn extend_starts_the_window_now() {
        let (hub, _trigger) = started_hub(Arc::new(FakeCluster::default()));
        hub.update_state(state("c")).await;

        let response = router(hub.clone())
            .oneshot(post_json("/reaper/extend", r#"{"namespace":"c"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let now = Utc::now().timestamp();
        let cfg = hub.config_for("c").await;
        assert!(cfg.last_started < now && now - cfg.last_started <= 3);

        // just extended: cannot extend again for an hour
        let status = body_status(response).await;
        assert!(!status.namespaces[0].can_extend);
    }

    #[tokio::test]
    async fn set_mem_limit_updates_config() {
        let (hub, _trigger) = started_hub(Arc::new(FakeCluster::default()));
        let response = router(hub.clone())
            .oneshot(post_json(
                "/reaper/setMemLimit",
                r#"{"namespace":"e","limit":32}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hub.config_for("e").await.limit, 32);
    }

    #[tokio::test]
    async fn set_start_hour_roundtrip_and_clear() {
        let (hub, _trigger) = started_hub(Arc::new(FakeCluster::default()));
        let app = router(hub.clone());
        app.clone()
            .oneshot(post_json(
                "/reaper/setStartHour",
                r#"{"namespace":"s","startHour":9}"#,
            ))
            .await
            .unwrap();
        assert_eq!(hub.config_for("s").await.auto_start_hour, Some(9));

        app.oneshot(post_json(
            "/reaper/setStartHour",
            r#"{"namespace":"s","startHour":null}"#,
        ))
        .await
        .unwrap();
        assert_eq!(hub.config_for("s").await.auto_start_hour, None);
    }

    #[tokio::test]
    async fn out_of_range_hour_is_ignored() {
        let (hub, _trigger) = started_hub(Arc::new(FakeCluster::default()));
        router(hub.clone())
            .oneshot(post_json(
                "/reaper/setStartHour",
                r#"{"namespace":"s","startHour":24}"#,
            ))
            .await
            .unwrap();
        assert_eq!(hub.config_for("s").await.auto_start_hour, None);
    }

    #[tokio::test]
    async fn undecodable_body_is_a_noop_that_still_serves_status() {
        let (hub, _trigger) = started_hub(Arc::new(FakeCluster::default()));
        let response = router(hub.clone())
            .oneshot(post_json("/reaper/setMemLimit", "not json at all"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_status(response).await;
        assert!(status.namespaces.is_empty());
        assert_eq!(hub.config_for("x").await.limit, DEFAULT_LIMIT_GIB);
        assert!(hub.configs().await.is_empty());
    }
}
