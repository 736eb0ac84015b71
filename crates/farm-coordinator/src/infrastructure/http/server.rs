//! axum router for hardware triggers and status pages.
//!
//! | Route                  | Method     | Body / query            | Effect                      |
//! |------------------------|------------|-------------------------|-----------------------------|
//! | `/dev_connect`         | GET, POST  | `uuid` form field       | queue `Connect`             |
//! | `/dev_disconnect`      | GET, POST  | `uuid` form field       | queue `Disconnect`          |
//! | `/new_interface`       | POST       | interface JSON          | queue `InterfaceAdded`      |
//! | `/frame`               | POST       | frame JSON              | queue `FrameConfigured`     |
//! | `/`                    | GET        |                         | JSON fleet status           |
//! | `/log`                 | GET        | optional `process`      | log history, newest first   |
//!
//! One listener serves all of it, including the frame messages that mirrors
//! post back.  Malformed input is answered with `400` and a debug log
//! entry; a full or closed event queue with `503`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::FormRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use farm_core::{
    connect_event, disconnect_event, DeviceEvent, FleetStatus, FrameMessage, InterfaceDescriptor,
    LogTracker, TriggerError,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::application::device_loop::EventSender;

/// Error type for the HTTP listener.
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("HTTP server failed: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct HttpState {
    events: EventSender,
    status: watch::Receiver<FleetStatus>,
    tracker: Arc<LogTracker>,
    log_process: Arc<str>,
}

impl HttpState {
    pub fn new(
        events: EventSender,
        status: watch::Receiver<FleetStatus>,
        tracker: Arc<LogTracker>,
        log_process: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            events,
            status,
            tracker,
            log_process: log_process.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UuidForm {
    #[serde(default)]
    uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    process: Option<String>,
}

/// Builds the router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/dev_connect", get(dev_connect).post(dev_connect))
        .route("/dev_disconnect", get(dev_disconnect).post(dev_disconnect))
        .route("/new_interface", post(new_interface))
        .route("/frame", post(frame))
        .route("/", get(fleet_status))
        .route("/log", get(log_view))
        .with_state(state)
}

/// Binds the listener.
///
/// # Errors
///
/// Returns [`HttpError::BindFailed`] if the address is unavailable.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, HttpError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| HttpError::BindFailed { addr, source })
}

/// Serves requests until `shutdown` completes.
///
/// # Errors
///
/// Returns [`HttpError::Serve`] if the accept loop fails.
pub async fn serve<F>(listener: TcpListener, state: HttpState, shutdown: F) -> Result<(), HttpError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP listener on {addr}");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(HttpError::Serve)
}

// ── Trigger handlers ─────────────────────────────────────────────────────────

async fn enqueue(state: &HttpState, event: DeviceEvent) -> StatusCode {
    match state.events.send(event).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn rejected(trigger: &str, error: &dyn std::fmt::Display) -> StatusCode {
    debug!(trigger, "dropping malformed trigger: {error}");
    StatusCode::BAD_REQUEST
}

async fn uuid_trigger(
    state: &HttpState,
    trigger: &str,
    form: Result<Form<UuidForm>, FormRejection>,
    build: fn(&str) -> Result<DeviceEvent, TriggerError>,
) -> StatusCode {
    let Form(form) = match form {
        Ok(form) => form,
        Err(e) => return rejected(trigger, &e),
    };
    match build(&form.uuid) {
        Ok(event) => enqueue(state, event).await,
        Err(e) => rejected(trigger, &e),
    }
}

pub async fn dev_connect(
    State(state): State<HttpState>,
    form: Result<Form<UuidForm>, FormRejection>,
) -> StatusCode {
    uuid_trigger(&state, "dev_connect", form, connect_event).await
}

pub async fn dev_disconnect(
    State(state): State<HttpState>,
    form: Result<Form<UuidForm>, FormRejection>,
) -> StatusCode {
    uuid_trigger(&state, "dev_disconnect", form, disconnect_event).await
}

pub async fn new_interface(State(state): State<HttpState>, body: Bytes) -> StatusCode {
    let descriptor = match InterfaceDescriptor::parse(&body) {
        Ok(descriptor) => descriptor,
        Err(e) => return rejected("new_interface", &e),
    };
    debug!(
        serial = %descriptor.serial,
        class = %descriptor.class,
        subclass = %descriptor.subclass,
        vendor = %descriptor.vendor,
        product = %descriptor.product,
        "interface descriptor"
    );
    match descriptor.into_event() {
        Ok(Some(event)) => enqueue(&state, event).await,
        Ok(None) => StatusCode::OK,
        Err(e) => rejected("new_interface", &e),
    }
}

pub async fn frame(State(state): State<HttpState>, body: Bytes) -> StatusCode {
    match FrameMessage::parse(&body).and_then(FrameMessage::into_event) {
        Ok(Some(event)) => enqueue(&state, event).await,
        Ok(None) => StatusCode::OK,
        Err(e) => rejected("frame", &e),
    }
}

// ── Status handlers ──────────────────────────────────────────────────────────

pub async fn fleet_status(State(state): State<HttpState>) -> Json<FleetStatus> {
    Json(state.status.borrow().clone())
}

/// Plain-text log history, newest line first.
pub async fn log_view(State(state): State<HttpState>, Query(query): Query<LogQuery>) -> String {
    let process = query.process.as_deref().unwrap_or(&*state.log_process);
    state.tracker.snapshot(process).join("\n")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
