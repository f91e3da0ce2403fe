use axum::{
    extract::State,
    http::{HeaderName, Method, Request, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub mod error;
pub mod orders;
pub mod state;
pub mod worker;

pub use state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Stamps each request with a fresh UUID v4 unless the caller sent one.
#[derive(Clone, Copy, Default)]
struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
            HeaderName::from_static(orders::USER_ID_HEADER),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ]);

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<axum::body::Body>| {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "http",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    });

    Router::new()
        .route("/health", get(health))
        .merge(orders::routes())
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(trace)
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Liveness follows the store; the cache only degrades latency.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let health = state.orders.health().await;
    let (status, label) = if health.store {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };

    (
        status,
        Json(json!({
            "status": label,
            "store": health.store,
            "cache": health.cache,
        })),
    )
}
