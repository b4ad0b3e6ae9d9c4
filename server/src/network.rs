//! HTTP transport exposing the board to remote players.
//!
//! Every route answers with the caller's board view in the text format from
//! [`shared::BoardView`]. Failed operations answer with a plain-text reason.

use crate::board::{Board, ChangeOutcome, Position};
use crate::error::{FlipError, LabelError};
use crate::player::PlayerId;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Router};
use log::{debug, info, warn};
use serde::Deserialize;
use shared::DEFAULT_WATCH_TIMEOUT_MS;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;

/// Transport-level limits applied to blocking requests.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Longest a first flip may wait for a controlled card. `None` waits until
    /// the request is dropped.
    pub flip_timeout: Option<Duration>,
    /// Default long-poll duration for `/watch` when the query sets none.
    pub watch_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            flip_timeout: None,
            watch_timeout: Duration::from_millis(DEFAULT_WATCH_TIMEOUT_MS),
        }
    }
}

#[derive(Clone)]
struct AppState {
    board: Arc<Board>,
    config: ServerConfig,
}

/// A request the transport refused, mapped onto an HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid player id {0:?}, expected letters, digits or '_'")]
    BadPlayer(String),

    #[error("invalid position {0:?}, expected ROW,COLUMN")]
    BadPosition(String),

    #[error("cannot flip this card: {0}")]
    Flip(#[from] FlipError),

    #[error("cannot replace label: {0}")]
    Label(#[from] LabelError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadPlayer(_)
            | ApiError::BadPosition(_)
            | ApiError::Label(_)
            | ApiError::Flip(FlipError::InvalidPosition { .. }) => StatusCode::BAD_REQUEST,
            ApiError::Flip(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!("Rejected request: {}", self);
        (self.status(), self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct WatchParams {
    timeout_ms: Option<u64>,
}

/// Parses a transport player token: one or more ASCII letters, digits or `_`.
pub fn parse_player(token: &str) -> Result<PlayerId, ApiError> {
    let well_formed = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !well_formed {
        return Err(ApiError::BadPlayer(token.to_string()));
    }
    PlayerId::new(token).map_err(|_| ApiError::BadPlayer(token.to_string()))
}

/// Parses `ROW,COLUMN` into a position. Range checks are left to the board.
pub fn parse_position(text: &str) -> Result<Position, ApiError> {
    text.split_once(',')
        .and_then(|(row, col)| Some(Position::new(row.parse().ok()?, col.parse().ok()?)))
        .ok_or_else(|| ApiError::BadPosition(text.to_string()))
}

/// Builds the route table over a shared board.
pub fn router(board: Arc<Board>, config: ServerConfig) -> Router {
    Router::new()
        .route("/look/{player}", get(look))
        .route("/flip/{player}/{position}", get(flip))
        .route("/replace/{player}/{from}/{to}", get(replace))
        .route("/watch/{player}", get(watch))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(AppState { board, config })
}

async fn allow_any_origin(mut response: Response) -> Response {
    response.headers_mut().insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

async fn look(
    State(app): State<AppState>,
    Path(player): Path<String>,
) -> Result<String, ApiError> {
    let player = parse_player(&player)?;
    Ok(app.board.inspect(&player).await.to_string())
}

async fn flip(
    State(app): State<AppState>,
    Path((player, position)): Path<(String, String)>,
) -> Result<String, ApiError> {
    let player = parse_player(&player)?;
    let pos = parse_position(&position)?;

    // a dropped request drops this future, which withdraws any pending wait
    let outcome = app
        .board
        .flip_until(&player, pos, app.config.flip_timeout, std::future::pending())
        .await?;
    debug!("Player {} flipped {}: {:?}", player, pos, outcome);

    Ok(app.board.inspect(&player).await.to_string())
}

async fn replace(
    State(app): State<AppState>,
    Path((player, from, to)): Path<(String, String, String)>,
) -> Result<String, ApiError> {
    let player = parse_player(&player)?;
    let changed = app.board.relabel(&from, &to).await?;
    debug!("Player {} replaced {:?} with {:?}: {}", player, from, to, changed);

    Ok(app.board.inspect(&player).await.to_string())
}

async fn watch(
    State(app): State<AppState>,
    Path(player): Path<String>,
    Query(params): Query<WatchParams>,
) -> Result<String, ApiError> {
    let player = parse_player(&player)?;
    let timeout = params
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(app.config.watch_timeout);

    match app.board.await_change(Some(timeout), std::future::pending()).await {
        ChangeOutcome::Changed(version) => debug!("Player {} saw version {}", player, version),
        ChangeOutcome::TimedOut => debug!("Watch by {} timed out", player),
        ChangeOutcome::Cancelled => {}
    }

    Ok(app.board.inspect(&player).await.to_string())
}

/// HTTP server bound to a listening socket.
pub struct Server {
    listener: TcpListener,
    app: Router,
}

impl Server {
    pub async fn new(
        addr: &str,
        board: Arc<Board>,
        config: ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        Ok(Server {
            listener,
            app: router(board, config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until the process exits.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves requests until `shutdown` completes, then drains open ones.
    pub async fn run_until<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Server stopped");
        Ok(())
    }
}
