//! Integration tests for the HTTP transport against a local aggregator stub.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;

use fedavg_net::http::HttpTransport;
use fedavg_net::route::AggregatorRoute;
use fedavg_net::traits::AggregatorTransport;
use fedavg_net::Error;

type Received = Arc<Mutex<Vec<Vec<u8>>>>;

/// Serve `/recv` on an ephemeral port and return (port, received bodies).
async fn stub_aggregator(status: StatusCode) -> (u16, Received) {
    let received: Received = Arc::default();
    let app = Router::new()
        .route(
            "/recv",
            post(move |State(store): State<Received>, body: Bytes| async move {
                store.lock().unwrap().push(body.to_vec());
                status
            }),
        )
        .with_state(Arc::clone(&received));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, received)
}

#[tokio::test]
async fn http_transport_posts_raw_body() {
    let (port, received) = stub_aggregator(StatusCode::OK).await;
    let route = AggregatorRoute::new("127.0.0.1", port);
    let transport = HttpTransport::new(&route, 0).unwrap();

    transport.send(&[1, 2, 3, 255]).await.unwrap();
    transport.send(b"second").await.unwrap();

    let bodies = received.lock().unwrap().clone();
    assert_eq!(bodies, vec![vec![1, 2, 3, 255], b"second".to_vec()]);
    assert_eq!(transport.destination(), format!("http://127.0.0.1:{port}/recv"));
}

#[tokio::test]
async fn http_transport_reports_rejection() {
    let (port, _) = stub_aggregator(StatusCode::SERVICE_UNAVAILABLE).await;
    let transport = HttpTransport::new(&AggregatorRoute::new("127.0.0.1", port), 0).unwrap();

    assert!(matches!(
        transport.send(b"payload").await,
        Err(Error::Rejected { status: 503 })
    ));
}

#[tokio::test]
async fn http_transport_reports_unreachable_aggregator() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport = HttpTransport::new(&AggregatorRoute::new("127.0.0.1", port), 0).unwrap();

    assert!(matches!(
        transport.send(b"payload").await,
        Err(Error::ConnectionFailed(_))
    ));
}
