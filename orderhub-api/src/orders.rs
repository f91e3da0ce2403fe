use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use orderhub_core::validation::validate_order;
use orderhub_order::{OrderService, Reconciliation};
use orderhub_shared::Order;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;

/// Caller identity used by the ownership check.
pub const USER_ID_HEADER: &str = "x-user-id";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/v1/order", post(create_order))
        .route("/api/v1/order/{order_uid}", get(get_order))
        .route("/api/v1/cache/stats", get(cache_stats))
}

async fn get_order(
    State(state): State<AppState>,
    Path(order_uid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, AppError> {
    let order = state.orders.get_by_id(&order_uid).await?;

    if let Some(user_id) = headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()) {
        if !OrderService::can_access_customer_orders(&order.customer_id, user_id) {
            warn!("User {} denied access to order {}", user_id, order_uid);
            return Err(AppError::AuthorizationError("Access denied".to_string()));
        }
    }

    Ok(Json(json!({ "data": order })))
}

async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<Order>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let Json(mut order) = payload?;

    validate_order(&order)?;
    let outcome = state.orders.create_or_update(&mut order).await?;

    let message = match outcome {
        Reconciliation::Created => "Order created",
        Reconciliation::Updated => "Order updated",
    };
    info!("{} via API: {}", message, order.order_uid);

    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": order, "message": message, "result": outcome })),
    ))
}

async fn cache_stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let stats = state.orders.cache_stats().await?;
    Ok(Json(json!(stats)))
}
