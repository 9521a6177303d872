//! Tests for the provisioning client against an HTTP test double

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::time::Duration;

use portbridge::ProvisionClient;

#[derive(Default)]
struct ControlState {
    start_calls: AtomicU32,
    query_calls: AtomicU32,
    ready_after: u32,
}

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn control_router(state: Arc<ControlState>) -> Router {
    Router::new()
        .route("/start", post(start_handler))
        .route("/query_ip", post(query_handler))
        .with_state(state)
}

async fn start_handler(
    State(state): State<Arc<ControlState>>,
    body: String,
) -> (StatusCode, String) {
    if body != "password=sekrit" {
        return (StatusCode::FORBIDDEN, "bad password".to_string());
    }
    state.start_calls.fetch_add(1, Ordering::SeqCst);
    (StatusCode::OK, "ok".to_string())
}

async fn query_handler(
    State(state): State<Arc<ControlState>>,
    body: String,
) -> (StatusCode, String) {
    if body != "password=sekrit" {
        return (StatusCode::FORBIDDEN, "bad password".to_string());
    }
    let calls = state.query_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if calls > state.ready_after {
        (StatusCode::OK, "203.0.113.7".to_string())
    } else {
        (StatusCode::OK, "null".to_string())
    }
}

#[tokio::test]
async fn test_resolve_polls_until_address_is_ready() {
    let state = Arc::new(ControlState {
        ready_after: 2,
        ..Default::default()
    });
    let addr = serve(control_router(Arc::clone(&state))).await;

    let client = ProvisionClient::new(&format!("http://{}", addr), "sekrit")
        .unwrap()
        .with_polling(Duration::from_millis(10), 11);

    let address = client.resolve().await.unwrap();
    assert_eq!(address, "203.0.113.7");
    assert_eq!(state.start_calls.load(Ordering::SeqCst), 1);
    assert_eq!(state.query_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_resolve_times_out_when_never_ready() {
    let state = Arc::new(ControlState {
        ready_after: u32::MAX,
        ..Default::default()
    });
    let addr = serve(control_router(Arc::clone(&state))).await;

    let client = ProvisionClient::new(&format!("http://{}", addr), "sekrit")
        .unwrap()
        .with_polling(Duration::from_millis(10), 3);

    let err = client.resolve().await.unwrap_err();
    assert!(err.to_string().contains("Timed out"));
    assert_eq!(state.query_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_start_failure_carries_the_status() {
    let router = Router::new().route(
        "/start",
        post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "busy") }),
    );
    let addr = serve(router).await;

    let client = ProvisionClient::new(&format!("http://{}", addr), "sekrit").unwrap();
    let err = client.request_start().await.unwrap_err();
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_query_treats_null_as_not_ready() {
    let state = Arc::new(ControlState {
        ready_after: u32::MAX,
        ..Default::default()
    });
    let addr = serve(control_router(Arc::clone(&state))).await;

    let client = ProvisionClient::new(&format!("http://{}", addr), "sekrit").unwrap();
    assert!(client.query_address().await.unwrap().is_none());
}
