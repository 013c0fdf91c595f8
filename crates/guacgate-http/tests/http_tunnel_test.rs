// End-to-end exercises of the long-poll adapter against a scripted
// in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use guacgate_http::{router, AppState};
use guacgate_tunnel::mock::MockConnector;
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

fn test_app() -> (axum::Router, mpsc::UnboundedReceiver<DuplexStream>) {
    let (connector, backends) = MockConnector::new();
    let state = AppState::new(Arc::new(connector)).with_read_timeout(Duration::from_millis(100));
    (router(state), backends)
}

async fn connect(app: &axum::Router) -> Uuid {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tunnel?connect&protocol=vnc&hostname=host1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/octet-stream"
    );

    let body = response.into_body().collect().await.unwrap().to_bytes();
    Uuid::parse_str(std::str::from_utf8(&body).unwrap()).unwrap()
}

#[tokio::test]
async fn test_connect_returns_uuid() {
    let (app, mut backends) = test_app();
    let uuid = connect(&app).await;
    assert!(!uuid.is_nil());
    assert!(backends.recv().await.is_some());
}

#[tokio::test]
async fn test_connect_refused_maps_to_unauthorized() {
    let state = AppState::new(Arc::new(MockConnector::refusing("bad credentials")));
    let app = router(state);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/tunnel?connect&protocol=vnc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        response.headers().get("Guacamole-Status-Code").unwrap(),
        "769"
    );
    assert!(response.headers().get("Guacamole-Error-Message").is_some());
}

#[tokio::test]
async fn test_read_streams_until_backend_eof() {
    let (app, mut backends) = test_app();
    let uuid = connect(&app).await;
    let mut backend = backends.recv().await.unwrap();

    tokio::spawn(async move {
        backend.write_all(b"4.size,2.10,2.20;").await.unwrap();
        backend.shutdown().await.unwrap();
    });

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", uuid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"4.size,2.10,2.20;0.;");

    // EOF tore the tunnel down; the UUID no longer resolves.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", uuid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_handoff_delivers_buffered_instructions() {
    let (connector, mut backends) = MockConnector::new();
    let state = AppState::new(Arc::new(connector)).with_read_timeout(Duration::from_secs(2));
    let app = router(state);
    let uuid = connect(&app).await;
    let mut backend = backends.recv().await.unwrap();

    // First poll takes the reader and blocks waiting for data.
    let first_poll = tokio::spawn(
        app.clone().oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", uuid))
                .body(Body::empty())
                .unwrap(),
        ),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Second poll queues behind it.
    let second_poll = tokio::spawn(
        app.clone().oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", uuid))
                .body(Body::empty())
                .unwrap(),
        ),
    );
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Both instructions arrive in one packet. The first poll consumes the
    // first from the socket, then must deliver it (terminated in-band)
    // before yielding the reader to the queued poll.
    backend.write_all(b"5.guacA,1.1;5.guacB,1.2;").await.unwrap();

    let response = first_poll.await.unwrap().unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"5.guacA,1.1;0.;");

    backend.shutdown().await.unwrap();
    let response = second_poll.await.unwrap().unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"5.guacB,1.2;0.;");
}

#[tokio::test]
async fn test_write_forwards_bytes_verbatim() {
    let (app, mut backends) = test_app();
    let uuid = connect(&app).await;
    let mut backend = backends.recv().await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/tunnel?write:{}", uuid))
                .body(Body::from("3.key,5.65307,1.1;"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut buf = vec![0u8; 64];
    let n = backend.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"3.key,5.65307,1.1;");
}

#[tokio::test]
async fn test_failed_write_closes_and_deregisters_tunnel() {
    let (app, mut backends) = test_app();
    let uuid = connect(&app).await;
    let backend = backends.recv().await.unwrap();

    // Kill the backend outright so the flush fails with an I/O error.
    drop(backend);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/tunnel?write:{}", uuid))
                .body(Body::from("3.nop;"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The fatal error tore the tunnel down; the UUID no longer resolves.
    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", uuid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_read_idle_timeout_returns_empty_response() {
    let (app, mut backends) = test_app();
    let uuid = connect(&app).await;
    let _backend = backends.recv().await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", uuid))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());

    // The tunnel survives an idle poll; the client simply re-polls.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/tunnel?write:{}", uuid))
                .body(Body::from("3.nop;"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_uuid_is_not_found() {
    let (app, _backends) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/tunnel?read:{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get("Guacamole-Status-Code").unwrap(),
        "516"
    );
}

#[tokio::test]
async fn test_invalid_operation_is_bad_request() {
    let (app, _backends) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/tunnel?frobnicate")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_uuid_is_bad_request() {
    let (app, _backends) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/tunnel?read:not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
