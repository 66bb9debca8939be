mod common;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use common::{cleanup, sqlite_pool};
use corpfront::RetryPolicy;
use corpfront::config::Config;
use corpfront::middleware::db_session::DbHandle;
use corpfront::router::{DashboardState, dashboard_router};
use serde_json::{Value, json};
use tower::ServiceExt;

const ADMIN_KEY: &str = "test-admin-key";

fn app(pool: sqlx::AnyPool) -> axum::Router {
    let mut cfg = Config::default();
    cfg.basic.admin_key = ADMIN_KEY.to_string();
    let db = DbHandle::new(pool, RetryPolicy::immediate(3));
    dashboard_router(DashboardState::new(db, &cfg))
}

fn admin(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN_KEY}"));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(resp: axum::response::Response) -> Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_database_ok() {
    let (pool, path) = sqlite_pool("router_health").await;
    let app = app(pool.clone());

    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await, json!({"status": "ok", "database": "ok"}));
    cleanup(pool, path).await;
}

#[tokio::test]
async fn admin_routes_require_the_key() {
    let (pool, path) = sqlite_pool("router_auth").await;
    let app = app(pool.clone());

    let resp = app
        .clone()
        .oneshot(
            Request::get("/api/admin/config/slideshow_type")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .oneshot(
            Request::get("/api/admin/config/slideshow_type")
                .header("x-admin-key", ADMIN_KEY)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        json_body(resp).await,
        json!({"key": "slideshow_type", "value": null})
    );
    cleanup(pool, path).await;
}

#[tokio::test]
async fn config_put_then_get() {
    let (pool, path) = sqlite_pool("router_config").await;
    let app = app(pool.clone());

    let resp = app
        .clone()
        .oneshot(admin(
            "PUT",
            "/api/admin/config/dashboard_title",
            Some(json!({"value": " Q3 Review "})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(admin("GET", "/api/admin/config/dashboard_title", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["value"], "Q3 Review");
    cleanup(pool, path).await;
}

#[tokio::test]
async fn slideshow_flow_over_http() {
    let (pool, path) = sqlite_pool("router_slideshow").await;
    let app = app(pool.clone());

    let resp = app
        .clone()
        .oneshot(admin("POST", "/api/admin/slideshow/start", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");

    let resp = app
        .clone()
        .oneshot(admin(
            "POST",
            "/api/admin/slideshow/set-url",
            Some(json!({"embed_url": "https://docs.example.com/deck"})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(admin(
            "POST",
            "/api/admin/slideshow/start",
            Some(json!({"interval_seconds": 999})),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["is_active"], true);
    assert_eq!(body["interval_seconds"], 300);

    let resp = app
        .oneshot(
            Request::get("/api/dashboard/slideshow")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["type"], "url");
    assert_eq!(body["source"], "https://docs.example.com/deck");
    assert_eq!(body["is_active"], true);
    cleanup(pool, path).await;
}

#[tokio::test]
async fn revenue_current_file_is_404_until_uploaded() {
    let (pool, path) = sqlite_pool("router_revenue").await;
    let app = app(pool.clone());

    let resp = app
        .oneshot(admin("GET", "/api/admin/revenue/current-file", None))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        json_body(resp).await["error"]["message"],
        "No revenue file uploaded yet"
    );
    cleanup(pool, path).await;
}
