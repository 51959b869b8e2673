//! The HTTP interface and fetching from a remote source.

mod common;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::net::TcpListener;
use url::Url;
use roahist::api::roa::RoaHistoryInfo;
use roahist::api::status::{HistoryStatus, IngestStatus};
use roahist::commons::error::Error;
use roahist::daemon::http::server::HttpServer;
use roahist::daemon::start::http_listener;
use roahist::server::manager::RoaHistoryManager;
use roahist::server::source::{HttpRoaSource, RoaSource, StaticRoaSource};
use common::{manager, mem_storage, roa, snapshot};


/// Starts serving the manager on a random local port.
async fn serve(
    manager: RoaHistoryManager<StaticRoaSource>
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        http_listener(HttpServer::new(Arc::new(manager)), listener)
    );
    addr
}

/// Starts a server that answers every request with the given response.
async fn remote(status: StatusCode, body: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return
            };
            tokio::spawn(async move {
                let _ = http1::Builder::new().serve_connection(
                    TokioIo::new(stream),
                    service_fn(move |_req| async move {
                        let mut res = Response::new(
                            Full::new(Bytes::from_static(body.as_bytes()))
                        );
                        *res.status_mut() = status;
                        Ok::<_, Infallible>(res)
                    })
                ).await;
            });
        }
    });
    Url::parse(&format!("http://{addr}/roas.json")).unwrap()
}

/// Starts a server that accepts connections but never answers.
async fn silent() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut streams = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            streams.push(stream);
        }
    });
    Url::parse(&format!("http://{addr}/roas.json")).unwrap()
}

#[tokio::test]
async fn http_interface() {
    let addr = serve(manager(&mem_storage(), snapshot(&[
        roa("AS64500", "203.0.113.0/24", 24, "ARIN"),
        roa("AS64501", "2001:db8::/32", 48, "RIPE"),
    ]))).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let res = client.get(format!("{base}/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(format!("{base}/api/v1/status"))
        .send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let status: HistoryStatus = res.json().await.unwrap();
    assert_eq!(status.last_run, None);
    assert_eq!(status.roas, 0);

    let res = client.post(format!("{base}/update")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    match res.json::<IngestStatus>().await.unwrap() {
        IngestStatus::Ok { report } => {
            assert_eq!(report.fetched, 2);
            assert_eq!(report.inserted, 2);
        }
        other => panic!("expected ok, got {other:?}"),
    }

    let res = client.get(format!("{base}/update")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "too_soon");
    assert!(body["next_allowed"].is_string());

    let res = client.get(format!("{base}/api/v1/roas?asn=AS64501"))
        .send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let roas: Vec<RoaHistoryInfo> = res.json().await.unwrap();
    assert_eq!(roas.len(), 1);
    assert_eq!(roas[0].prefix_str, "2001:db8::/32");
    assert_eq!(roas[0].observed.len(), 1);

    let res = client.get(format!("{base}/api/v1/roas"))
        .send().await.unwrap();
    let roas: Vec<RoaHistoryInfo> = res.json().await.unwrap();
    assert_eq!(roas.len(), 2);

    let res = client.get(format!("{base}/api/v1/roas?prefix=10.0.0.0/xx"))
        .send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["label"], "api-invalid-query");

    let res = client.get(format!("{base}/nothing")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(format!("{base}/update")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn failing_source_is_reported() {
    let manager = manager(&mem_storage(), snapshot(&[]));
    manager.source().clear();
    let addr = serve(manager).await;

    let res = reqwest::get(format!("http://{addr}/update")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["detail"].is_string());
}

#[tokio::test]
async fn fetch_from_remote_source() {
    let timeout = Duration::from_secs(5);

    let uri = remote(
        StatusCode::OK,
        r#"{"roas": [{"asn": "AS64500", "prefix": "203.0.113.0/24",
                      "maxLength": 24, "ta": "ARIN"}]}"#
    ).await;
    let source = HttpRoaSource::new(uri, timeout).unwrap();
    let snapshot = source.fetch().await.unwrap();
    assert_eq!(
        snapshot.roas, vec![roa("AS64500", "203.0.113.0/24", 24, "ARIN")]
    );

    let uri = remote(StatusCode::INTERNAL_SERVER_ERROR, "oops").await;
    let source = HttpRoaSource::new(uri, timeout).unwrap();
    assert!(matches!(
        source.fetch().await, Err(Error::SourceUnavailable(_))
    ));

    let uri = remote(StatusCode::OK, r#"{"roas": [{"asn": "AS1""#).await;
    let source = HttpRoaSource::new(uri, timeout).unwrap();
    assert!(matches!(
        source.fetch().await, Err(Error::MalformedPayload(_))
    ));
}

#[tokio::test]
async fn hung_source_times_out() {
    let source = HttpRoaSource::new(
        silent().await, Duration::from_millis(200)
    ).unwrap();
    let start = tokio::time::Instant::now();
    assert!(matches!(
        source.fetch().await, Err(Error::SourceUnavailable(_))
    ));
    assert!(start.elapsed() < Duration::from_secs(5));
}
