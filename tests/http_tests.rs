//! HTTP tests: the dashboard served through the router over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use probe_status::event::{PROBE_LABEL, TARGET_LABEL};
use probe_status::server::{serve, Router};
use probe_status::sysvars::ProcessInfo;
use probe_status::{EventMetrics, HtmlRenderer, ProbeStatus, ProbeStatusHandle, SurfacerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

struct Harness {
    addr: SocketAddr,
    handle: ProbeStatusHandle,
    cancel: CancellationToken,
}

async fn start(config: SurfacerConfig) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let (actor, handle) = ProbeStatus::new(&config, ProcessInfo::current(), HtmlRenderer).unwrap();
    actor.spawn(cancel.clone());

    let mut router = Router::new();
    handle.register(&mut router).unwrap();
    tokio::spawn(serve(listener, Arc::new(router), cancel.clone()));

    Harness {
        addr,
        handle,
        cancel,
    }
}

async fn request(addr: SocketAddr, method: &str, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let raw = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

#[tokio::test]
async fn test_get_dashboard() {
    let h = start(SurfacerConfig::default()).await;
    h.handle.write(
        EventMetrics::new(Utc::now())
            .add_label(PROBE_LABEL, "ping")
            .add_label(TARGET_LABEL, "10.0.0.1")
            .add_metric("total", 3)
            .add_metric("success", 3),
    );
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.handle.stats().events_accepted < 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let resp = request(h.addr, "GET", "/probestatus").await;
    assert!(resp.starts_with("HTTP/1.1 200 OK\r\n"), "{resp}");
    assert!(resp.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(resp.contains("Probe: ping"));
    assert!(resp.contains("<b>10.0.0.1</b>"));
    h.cancel.cancel();
}

#[tokio::test]
async fn test_custom_url() {
    let h = start(SurfacerConfig {
        url: "/status".into(),
        ..Default::default()
    })
    .await;

    assert!(request(h.addr, "GET", "/status").await.starts_with("HTTP/1.1 200"));
    assert!(request(h.addr, "GET", "/probestatus").await.starts_with("HTTP/1.1 404"));
    h.cancel.cancel();
}

#[tokio::test]
async fn test_non_get_is_405() {
    let h = start(SurfacerConfig::default()).await;
    let resp = request(h.addr, "DELETE", "/probestatus").await;
    assert!(resp.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"), "{resp}");
    assert!(resp.contains("Allow: GET\r\n"));
    h.cancel.cancel();
}

#[tokio::test]
async fn test_stopped_actor_is_503() {
    let (actor, handle) =
        ProbeStatus::new(&SurfacerConfig::default(), ProcessInfo::current(), HtmlRenderer).unwrap();
    drop(actor);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut router = Router::new();
    handle.register(&mut router).unwrap();
    let cancel = CancellationToken::new();
    tokio::spawn(serve(listener, Arc::new(router), cancel.clone()));

    let resp = request(addr, "GET", "/probestatus").await;
    assert!(resp.starts_with("HTTP/1.1 503 Service Unavailable\r\n"), "{resp}");
    cancel.cancel();
}
