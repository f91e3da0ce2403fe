//! Drives the router in-process with `tower::ServiceExt::oneshot` over the
//! in-memory store and cache.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use orderhub_api::{app, AppState};
use orderhub_core::memory::{InMemoryOrderCache, InMemoryOrderStore};
use orderhub_order::{CacheSettings, OrderService, ReconcileSettings};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    store: Arc<InMemoryOrderStore>,
    cache: Arc<InMemoryOrderCache>,
    router: Router,
}

fn test_app() -> TestApp {
    let store = Arc::new(InMemoryOrderStore::new());
    let cache = Arc::new(InMemoryOrderCache::new());
    let service = Arc::new(OrderService::new(
        store.clone(),
        cache.clone(),
        CacheSettings { max_orders: 5 },
        ReconcileSettings::default(),
    ));
    let router = app(AppState::new(service, Duration::from_secs(5)));
    TestApp {
        store,
        cache,
        router,
    }
}

fn sample_order() -> Value {
    json!({
        "order_uid": "b563feb7b2b84b6test",
        "track_number": "WBILMTESTTRACK",
        "entry": "WBIL",
        "delivery": {
            "name": "Test Testov",
            "phone": "+9720000000",
            "zip": "2639809",
            "city": "Kiryat Mozkin",
            "address": "Ploshad Mira 15",
            "region": "Kraiot",
            "email": "test@gmail.com"
        },
        "payment": {
            "transaction": "b563feb7b2b84b6test",
            "request_id": "",
            "currency": "USD",
            "provider": "wbpay",
            "amount": 1817,
            "payment_dt": 1637907727,
            "bank": "alpha",
            "delivery_cost": 1500,
            "goods_total": 317,
            "custom_fee": 0
        },
        "items": [{
            "chrt_id": 9934930,
            "track_number": "WBILMTESTTRACK",
            "price": 453,
            "rid": "ab4219087a764ae0btest",
            "name": "Mascaras",
            "sale": 30,
            "size": "0",
            "total_price": 317,
            "nm_id": 2389212,
            "brand": "Vivienne Sabo",
            "status": 202
        }],
        "locale": "en",
        "internal_signature": "",
        "customer_id": "test",
        "delivery_service": "meest",
        "shardkey": "9",
        "sm_id": 99,
        "date_created": "2021-11-26T06:22:19Z",
        "oof_shard": "1"
    })
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn create_sample(router: &Router) {
    let response = router
        .clone()
        .oneshot(post_json("/api/v1/order", sample_order().to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_health_ok() {
    let t = test_app();
    let response = t.router.oneshot(get("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], true);
}

#[tokio::test]
async fn test_health_reports_unreachable_store() {
    let t = test_app();
    t.store.fail_next_call();

    let response = t.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["store"], false);
}

#[tokio::test]
async fn test_create_and_fetch_order() {
    let t = test_app();

    let response = t
        .router
        .clone()
        .oneshot(post_json("/api/v1/order", sample_order().to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["data"]["order_uid"], "b563feb7b2b84b6test");
    assert_eq!(body["result"], "CREATED");
    assert!(body["data"]["id"].as_i64().unwrap() > 0);

    let response = t
        .router
        .oneshot(get("/api/v1/order/b563feb7b2b84b6test"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["items"][0]["chrt_id"], 9934930);
    assert_eq!(body["data"]["items"][0]["brand"], "Vivienne Sabo");
    assert_eq!(body["data"]["payment"]["amount"], 1817);
    assert!(t.cache.contains("b563feb7b2b84b6test").await);
}

#[tokio::test]
async fn test_posting_existing_order_updates_it() {
    let t = test_app();
    create_sample(&t.router).await;

    let mut changed = sample_order();
    changed["track_number"] = json!("WBILMNEWTRACK");
    let response = t
        .router
        .oneshot(post_json("/api/v1/order", changed.to_string()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await;
    assert_eq!(body["result"], "UPDATED");
    assert_eq!(body["data"]["track_number"], "WBILMNEWTRACK");
    assert_eq!(t.store.len().await, 1);
}

#[tokio::test]
async fn test_post_runs_full_validation() {
    let t = test_app();

    let mut invalid = sample_order();
    invalid["items"] = json!([]);
    let response = t
        .router
        .clone()
        .oneshot(post_json("/api/v1/order", invalid.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["field"], "items");

    let mut bad_email = sample_order();
    bad_email["delivery"]["email"] = json!("not-an-email");
    let response = t
        .router
        .oneshot(post_json("/api/v1/order", bad_email.to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["field"], "delivery.email");

    assert!(t.store.is_empty().await);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let t = test_app();
    let response = t
        .router
        .oneshot(post_json("/api/v1/order", "{not json".to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_order_is_404() {
    let t = test_app();
    let response = t
        .router
        .oneshot(get("/api/v1/order/nonexistent-uid-1234"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(t.cache.is_empty().await);
}

#[tokio::test]
async fn test_malformed_uid_is_400() {
    let t = test_app();
    let response = t.router.oneshot(get("/api/v1/order/short")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["field"], "order_uid");
}

#[tokio::test]
async fn test_ownership_header() {
    let t = test_app();
    create_sample(&t.router).await;

    let request = |user: &str| {
        Request::builder()
            .uri("/api/v1/order/b563feb7b2b84b6test")
            .header("x-user-id", user)
            .body(Body::empty())
            .unwrap()
    };

    let response = t.router.clone().oneshot(request("someone-else")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t.router.oneshot(request("test")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_store_failure_hides_details() {
    let t = test_app();
    t.store.fail_next_call();

    let response = t
        .router
        .oneshot(get("/api/v1/order/b563feb7b2b84b6test"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["error"], "Internal Server Error");
}

#[tokio::test]
async fn test_cache_stats() {
    let t = test_app();
    create_sample(&t.router).await;

    let response = t.router.oneshot(get("/api/v1/cache/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["cached_orders"], 1);
    assert_eq!(body["max_orders"], 5);
}

#[tokio::test]
async fn test_request_id_is_assigned_and_echoed() {
    let t = test_app();

    let response = t.router.clone().oneshot(get("/health")).await.unwrap();
    let generated = response.headers().get("x-request-id").unwrap().to_str().unwrap();
    assert_eq!(generated.len(), 36);

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "caller-supplied-id")
        .body(Body::empty())
        .unwrap();
    let response = t.router.oneshot(request).await.unwrap();
    assert_eq!(response.headers()["x-request-id"], "caller-supplied-id");
}
