//! Tests for the admin surface: `/add-backend`, `/stats`, `/cache-metrics`,
//! and the interaction between them (cache invalidation on backend changes,
//! concurrent `/stats` calls coalescing through the stats batcher).

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use reverse_proxy_lb::{create_router, AppState, Config};
use tower::ServiceExt;

fn state() -> AppState {
    AppState::new(Config::for_test())
}

#[tokio::test]
async fn cache_metrics_reports_all_three_caches() {
    let app = create_router(state());

    let request = Request::builder()
        .uri("/cache-metrics")
        .method("GET")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let cache_metrics = body.get("cache_metrics").expect("cache_metrics key");
    assert!(cache_metrics.get("health").is_some());
    assert!(cache_metrics.get("stats").is_some());
    assert!(cache_metrics.get("routing").is_some());

    let pool_metrics = body.get("pool_metrics").expect("pool_metrics key");
    assert!(pool_metrics.get("hit_count").is_some());
    assert!(pool_metrics.get("create_count").is_some());

    let request_metrics = body.get("request_metrics").expect("request_metrics key");
    assert_eq!(request_metrics["total_requests"], 0);
    assert_eq!(request_metrics["error_rate"], 0.0);
}

#[tokio::test]
async fn dispatch_failure_is_reflected_in_request_metrics() {
    let app_state = state();
    let app = create_router(app_state.clone());

    let request = Request::builder()
        .uri("/anything")
        .method("GET")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let snapshot = app_state.request_metrics.snapshot();
    assert_eq!(snapshot.total_requests, 1);
    assert_eq!(snapshot.failed_requests, 1);
    assert_eq!(snapshot.error_rate, 1.0);
}

#[tokio::test]
async fn adding_a_backend_invalidates_the_stats_cache() {
    let state = state();
    state.caches.stats.set(Vec::new()).await;
    assert!(state.caches.stats.get().await.is_some());

    state.pool.add_backend("http://127.0.0.1:3".to_string(), &state.caches).await;

    // `add_backend` marks the stats snapshot dirty; a stale snapshot must
    // never be served after the backend list changed.
    assert!(state.caches.stats.get().await.is_none());
}

#[tokio::test]
async fn concurrent_stats_requests_coalesce_through_the_batcher() {
    let app_state = state();
    app_state
        .pool
        .add_backend("http://127.0.0.1:4".to_string(), &app_state.caches)
        .await;
    let app = create_router(app_state.clone());

    let make_request = || {
        Request::builder()
            .uri("/stats")
            .method("GET")
            .body(Body::empty())
            .unwrap()
    };

    let (a, b) = tokio::join!(
        app.clone().oneshot(make_request()),
        app.clone().oneshot(make_request())
    );

    assert_eq!(a.unwrap().status(), StatusCode::OK);
    assert_eq!(b.unwrap().status(), StatusCode::OK);
}
