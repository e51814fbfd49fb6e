use crate::format;
use crate::metrics::Metrics;
use crate::scheduler::Command;
use crate::state::{AlertLevel, MetricKey, State as EngineState, Visibility};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub state: Arc<RwLock<EngineState>>,
    pub commands: mpsc::Sender<Command>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiMetric {
    pub value: Option<f64>,
    pub max: f64,
    pub alert: Option<AlertLevel>,
    pub display: Option<String>,
    pub max_display: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiSnapshot {
    pub started_at_unix: i64,
    pub tick: u64,
    pub timestamp: String,
    pub interface: Option<String>,
    pub visibility: Visibility,
    pub metrics: BTreeMap<&'static str, ApiMetric>,
}

impl From<&EngineState> for ApiSnapshot {
    fn from(value: &EngineState) -> Self {
        let snapshot = &value.snapshot;
        let metrics = MetricKey::ALL
            .into_iter()
            .map(|key| {
                let sample = snapshot.sample(key);
                let max = snapshot.maxima.get(key);
                let metric = ApiMetric {
                    value: sample.map(|s| s.value),
                    max,
                    alert: sample.and_then(|s| s.alert),
                    display: sample.map(|s| format::metric(key, s.value)),
                    max_display: format::metric(key, max),
                };
                (key.as_str(), metric)
            })
            .collect();

        let taken_at = UNIX_EPOCH + Duration::from_secs(snapshot.taken_at_unix.max(0) as u64);
        Self {
            started_at_unix: value.started_at_unix,
            tick: snapshot.tick,
            timestamp: humantime::format_rfc3339_seconds(taken_at).to_string(),
            interface: snapshot.interface.clone(),
            visibility: value.visibility,
            metrics,
        }
    }
}

pub fn build_router(
    metrics: Arc<Metrics>,
    state: Arc<RwLock<EngineState>>,
    commands: mpsc::Sender<Command>,
) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/maxima/reset", post(reset_maxima_handler))
        .route("/api/pointer/enter", post(pointer_enter_handler))
        .route("/api/pointer/leave", post(pointer_leave_handler))
        .with_state(HttpAppState {
            metrics,
            state,
            commands,
        })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.state.read().await;
    Json(ApiSnapshot::from(&*guard))
}

async fn reset_maxima_handler(State(state): State<HttpAppState>) -> StatusCode {
    enqueue(&state, Command::ResetMaxima).await
}

async fn pointer_enter_handler(State(state): State<HttpAppState>) -> StatusCode {
    enqueue(&state, Command::PointerEntered).await
}

async fn pointer_leave_handler(State(state): State<HttpAppState>) -> StatusCode {
    enqueue(&state, Command::PointerLeft).await
}

async fn enqueue(state: &HttpAppState, cmd: Command) -> StatusCode {
    match state.commands.send(cmd).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            warn!(command = ?cmd, "tick loop is not running, command dropped");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::TickReport;
    use crate::state::{MetricSample, Snapshot};
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app_with(
        state: EngineState,
    ) -> (Router, Arc<Metrics>, mpsc::Receiver<Command>) {
        let metrics = Metrics::new().expect("metrics");
        let (tx, rx) = mpsc::channel(4);
        let app = build_router(metrics.clone(), Arc::new(RwLock::new(state)), tx);
        (app, metrics, rx)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let (app, _, _rx) = app_with(EngineState::new(0));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn metrics_exposes_tick_counter() {
        let (app, metrics, _rx) = app_with(EngineState::new(0));
        metrics.update_from_snapshot(&Snapshot::default(), &TickReport::default());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        assert!(text.contains("vitals_ticks_total 1"));
        assert!(text.contains("vitals_uptime_seconds"));
    }

    #[tokio::test]
    async fn snapshot_reports_values_and_gaps() {
        let mut state = EngineState::new(0);
        let mut snapshot = Snapshot {
            tick: 3,
            taken_at_unix: 1_700_000_000,
            interface: Some("eth0".to_string()),
            ..Snapshot::default()
        };
        snapshot.samples.insert(
            MetricKey::Cpu,
            MetricSample {
                value: 85.0,
                alert: Some(AlertLevel::Warn),
            },
        );
        snapshot.maxima.observe(MetricKey::Cpu, 92.0);
        state.publish(snapshot);
        let (app, _, _rx) = app_with(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/snapshot")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["tick"], 3);
        assert_eq!(json["timestamp"], "2023-11-14T22:13:20Z");
        assert_eq!(json["interface"], "eth0");
        assert_eq!(json["visibility"], "active");
        assert_eq!(json["metrics"]["cpu"]["value"], 85.0);
        assert_eq!(json["metrics"]["cpu"]["alert"], "WARN");
        assert_eq!(json["metrics"]["cpu"]["display"], "85.0 %");
        assert_eq!(json["metrics"]["cpu"]["max_display"], "92.0 %");
        assert!(json["metrics"]["gpu_temp"]["value"].is_null());
        assert!(json["metrics"]["gpu_temp"]["display"].is_null());
        assert_eq!(json["metrics"]["net_down"]["max_display"], "0.0 B/s");
    }

    #[tokio::test]
    async fn reset_enqueues_command() {
        let (app, _, mut rx) = app_with(EngineState::new(0));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/maxima/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await, Some(Command::ResetMaxima));
    }

    #[tokio::test]
    async fn pointer_routes_map_to_commands() {
        let (app, _, mut rx) = app_with(EngineState::new(0));

        for uri in ["/api/pointer/enter", "/api/pointer/leave"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED);
        }
        assert_eq!(rx.recv().await, Some(Command::PointerEntered));
        assert_eq!(rx.recv().await, Some(Command::PointerLeft));
    }

    #[tokio::test]
    async fn stopped_engine_yields_service_unavailable() {
        let (app, _, rx) = app_with(EngineState::new(0));
        drop(rx);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/maxima/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
