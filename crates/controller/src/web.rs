//! HTTP control surface.
//!
//! Handlers never touch controller state.  Each request becomes a
//! [`Command`] queued for the control loop together with a reply slot; the
//! loop answers at most one request per tick.  Every response is a 200
//! with a plain-text body.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::rejection::QueryRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dispatch::Command;

/// Requests waiting for the control loop beyond this are turned away.
pub const QUEUE_DEPTH: usize = 8;

pub const BUSY: &str = "Busy, try again";
pub const UNKNOWN_ENDPOINT: &str = "Unknown endpoint";

#[derive(Debug)]
pub struct HttpRequest {
    pub command: Command,
    pub remote_addr: SocketAddr,
    pub reply: oneshot::Sender<String>,
}

#[derive(Clone)]
struct WebState {
    queue: mpsc::Sender<HttpRequest>,
    reply_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct SecParam {
    sec: Option<String>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(queue: mpsc::Sender<HttpRequest>, reply_timeout: Duration) -> Router {
    Router::new()
        .route("/pump_on", get(pump_on))
        .route("/pump_off", get(pump_off))
        .route("/set_interval", get(set_interval))
        .route("/set_duration", get(set_duration))
        .route("/tank", get(tank))
        .route("/auto_on", get(auto_on))
        .route("/auto_off", get(auto_off))
        .route("/status", get(status))
        .fallback(unknown)
        .method_not_allowed_fallback(unknown)
        .with_state(WebState {
            queue,
            reply_timeout,
        })
}

async fn pump_on(State(s): State<WebState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    submit(&s, addr, Command::PumpOn).await
}

async fn pump_off(State(s): State<WebState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    submit(&s, addr, Command::PumpOff).await
}

async fn set_interval(
    State(s): State<WebState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    query: Result<Query<SecParam>, QueryRejection>,
) -> String {
    submit(&s, addr, Command::SetWaterInterval(sec_arg(query))).await
}

async fn set_duration(
    State(s): State<WebState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    query: Result<Query<SecParam>, QueryRejection>,
) -> String {
    submit(&s, addr, Command::SetWaterDuration(sec_arg(query))).await
}

/// A query string that does not parse counts as a missing argument, which
/// the dispatcher rejects with the usual text reply.
fn sec_arg(query: Result<Query<SecParam>, QueryRejection>) -> String {
    match query {
        Ok(Query(q)) => q.sec.unwrap_or_default(),
        Err(e) => {
            debug!(error = %e, "http: unreadable query string");
            String::new()
        }
    }
}

async fn tank(State(s): State<WebState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    submit(&s, addr, Command::Tank).await
}

async fn auto_on(State(s): State<WebState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    submit(&s, addr, Command::AutoOn).await
}

async fn auto_off(State(s): State<WebState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    submit(&s, addr, Command::AutoOff).await
}

async fn status(State(s): State<WebState>, ConnectInfo(addr): ConnectInfo<SocketAddr>) -> String {
    submit(&s, addr, Command::Status).await
}

async fn unknown() -> &'static str {
    UNKNOWN_ENDPOINT
}

/// Queue a command and wait for the control loop's answer.
async fn submit(state: &WebState, remote_addr: SocketAddr, command: Command) -> String {
    let (reply, answer) = oneshot::channel();
    let request = HttpRequest {
        command,
        remote_addr,
        reply,
    };
    if let Err(e) = state.queue.try_send(request) {
        warn!(%remote_addr, error = %e, "http: request refused");
        return BUSY.to_string();
    }
    match tokio::time::timeout(state.reply_timeout, answer).await {
        Ok(Ok(body)) => body,
        Ok(Err(_)) => {
            warn!(%remote_addr, "http: control loop dropped the request");
            BUSY.to_string()
        }
        Err(_) => {
            warn!(%remote_addr, timeout = ?state.reply_timeout, "http: no answer in time");
            BUSY.to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind http listener on {addr}"))
}

pub async fn serve(listener: TcpListener, app: Router) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http control listening");
    }
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("http server error")
}

// ===========================================================================
// Tests
// ===========================================================================
