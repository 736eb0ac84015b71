//! Integration tests for the HTTP trigger listener over a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use farm_core::{DeviceEvent, FleetStatus, LogTracker};
use farm_coordinator::application::device_loop::event_queue;
use farm_coordinator::infrastructure::http::server::{self, HttpError, HttpState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_test::assert_ok;

struct Running {
    addr: SocketAddr,
    events: mpsc::Receiver<DeviceEvent>,
    tracker: Arc<LogTracker>,
    stop: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), HttpError>>,
}

async fn start() -> Running {
    let (sender, events) = event_queue(8, Duration::from_millis(50));
    let (_status_tx, status) = watch::channel(FleetStatus::default());
    let tracker = Arc::new(LogTracker::new(10));
    let state = HttpState::new(sender, status, Arc::clone(&tracker), "bridge");

    let listener = assert_ok!(server::bind("127.0.0.1:0".parse().unwrap()).await);
    let addr = listener.local_addr().unwrap();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(server::serve(listener, state, async {
        let _ = stop_rx.await;
    }));
    Running {
        addr,
        events,
        tracker,
        stop,
        task,
    }
}

/// Sends one HTTP/1.1 request and returns the full response text.
async fn request(addr: SocketAddr, method: &str, path: &str, content_type: &str, body: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!(
        "{method} {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.expect("write");
    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

fn status_line(response: &str) -> &str {
    response.lines().next().unwrap_or_default()
}

#[tokio::test]
async fn test_form_connect_is_queued() {
    let mut running = start().await;

    let response = request(
        running.addr,
        "POST",
        "/dev_connect",
        "application/x-www-form-urlencoded",
        "uuid=abcdefabcdefabcdefabcdef",
    )
    .await;

    assert!(status_line(&response).contains("200"), "{response}");
    assert_eq!(
        running.events.recv().await,
        Some(DeviceEvent::Connect {
            uuid: "abcdefab-cdefabcdefabcdef".into()
        })
    );
    let _ = running.stop.send(());
    assert_ok!(running.task.await.unwrap());
}

#[tokio::test]
async fn test_query_disconnect_is_queued() {
    let mut running = start().await;

    let response = request(running.addr, "GET", "/dev_disconnect?uuid=dev-1", "text/plain", "").await;

    assert!(status_line(&response).contains("200"), "{response}");
    assert_eq!(
        running.events.recv().await,
        Some(DeviceEvent::Disconnect { uuid: "dev-1".into() })
    );
}

#[tokio::test]
async fn test_malformed_interface_is_bad_request() {
    let mut running = start().await;

    let response = request(running.addr, "POST", "/new_interface", "application/json", "{oops").await;

    assert!(status_line(&response).contains("400"), "{response}");
    assert!(running.events.try_recv().is_err());
}

#[tokio::test]
async fn test_status_and_log_pages() {
    let running = start().await;
    running.tracker.append("bridge", "older");
    running.tracker.append("bridge", "newer");

    let status = request(running.addr, "GET", "/", "text/plain", "").await;
    let log = request(running.addr, "GET", "/log", "text/plain", "").await;

    assert!(status_line(&status).contains("200"), "{status}");
    assert!(status.contains("application/json"), "{status}");
    assert!(log.ends_with("newer\nolder"), "{log}");
}

#[tokio::test]
async fn test_bind_conflict_is_reported() {
    let running = start().await;

    let err = server::bind(running.addr).await.unwrap_err();

    assert!(matches!(err, HttpError::BindFailed { addr, .. } if addr == running.addr));
}
