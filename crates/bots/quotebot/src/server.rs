//! HTTP trigger: `GET /health` and `GET|POST /run`.

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use quotebot_util_error::FmtCompact as _;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt as _, Snafu};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{error, info, warn};

use crate::{Bot, CycleReport, SkipReason};

const LOG_TARGET: &str = "quotebot::server";

pub const RUN_KEY_HEADER: &str = "x-run-key";

#[derive(Debug, Snafu)]
pub enum ServerError {
    #[snafu(display("Failed to bind {addr}"))]
    Bind { addr: SocketAddr, source: io::Error },
    #[snafu(display("Server failed"))]
    Serve { source: io::Error },
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

pub struct AppJson<T>(pub T);

impl<T> IntoResponse for AppJson<T>
where
    Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

#[derive(Serialize)]
struct Health {
    ok: bool,
}

#[derive(Serialize)]
struct RunOk {
    ok: bool,
    result: CycleReport,
}

#[derive(Serialize)]
struct RunFailed {
    ok: bool,
    error: String,
}

impl RunFailed {
    fn response(status: StatusCode, error: impl Into<String>) -> Response {
        (
            status,
            AppJson(Self {
                ok: false,
                error: error.into(),
            }),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct RunQuery {
    key: Option<String>,
}

struct AppState {
    bot: Arc<Bot>,
    run_key: String,
}

impl AppState {
    /// The header wins over the query parameter. An empty configured key
    /// never authorizes anything.
    fn is_authorized(&self, headers: &HeaderMap, query: &RunQuery) -> bool {
        let provided = headers
            .get(RUN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .or(query.key.as_deref());

        !self.run_key.is_empty() && provided == Some(self.run_key.as_str())
    }
}

async fn health() -> impl IntoResponse {
    AppJson(Health { ok: true })
}

async fn run(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<RunQuery>,
) -> Response {
    if !state.is_authorized(&headers, &query) {
        warn!(target: LOG_TARGET, "Unauthorized run request");
        return RunFailed::response(StatusCode::UNAUTHORIZED, "unauthorized");
    }

    // A disconnecting client drops this handler, but must not cancel the cycle
    let bot = state.bot.clone();
    let cycle = match tokio::spawn(async move { bot.run_cycle().await }).await {
        Ok(cycle) => cycle,
        Err(err) => {
            error!(target: LOG_TARGET, err = %err.fmt_compact(), "Run cycle task failed");
            return RunFailed::response(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    match cycle {
        Ok(report) if report.reason == Some(SkipReason::AlreadyRunning) => {
            RunFailed::response(StatusCode::CONFLICT, SkipReason::AlreadyRunning.as_str())
        }
        Ok(report) => (
            StatusCode::OK,
            AppJson(RunOk {
                ok: true,
                result: report,
            }),
        )
            .into_response(),
        Err(err) => {
            error!(target: LOG_TARGET, err = %err.fmt_compact(), "Run cycle failed");
            RunFailed::response(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.fmt_compact().to_string(),
            )
        }
    }
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let msg = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(target: LOG_TARGET, %msg, "Request handler panicked");
    RunFailed::response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

pub fn router(bot: Arc<Bot>, run_key: String) -> Router {
    let state = Arc::new(AppState { bot, run_key });
    Router::new()
        .route("/health", get(health))
        .route("/run", get(run).post(run))
        .layer(CatchPanicLayer::custom(handle_panic))
        .with_state(state)
}

pub async fn bind(addr: SocketAddr) -> ServerResult<TcpListener> {
    TcpListener::bind(addr).await.context(BindSnafu { addr })
}

/// Serve until Ctrl+C / SIGTERM.
pub async fn serve(listener: TcpListener, bot: Arc<Bot>, run_key: String) -> ServerResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(target: LOG_TARGET, %addr, "Starting server");
    }
    axum::serve(listener, router(bot, run_key))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context(ServeSnafu)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(target: LOG_TARGET, err = %err.fmt_compact(), "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target: LOG_TARGET, "Shutting down");
}
