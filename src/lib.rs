pub mod config;
pub mod db;
pub mod deck;
pub mod error;
pub mod game;
pub mod res;
pub mod rooms;

use std::sync::Arc;

use axum::{
    Router,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::{ErrorKind, GameError},
    game::Engine,
    rooms::{actions::Dispatcher, registry::Registry},
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub registry: Arc<Registry>,
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool) -> Self {
        AppState {
            engine: Arc::new(Engine::new(db_pool)),
            registry: Arc::new(Registry::new()),
            dispatcher: Arc::new(Dispatcher::default()),
        }
    }
}

/// The whole HTTP surface: room sockets under `/r` plus a liveness probe.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/r", rooms::router())
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz(State(engine): State<Arc<Engine>>) -> AppResult<&'static str> {
    sqlx::query("SELECT 1").execute(engine.db_pool()).await?;
    Ok("ok")
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub error: anyhow::Error,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        AppError {
            status,
            error: anyhow::Error::msg(message.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("{:?}", self.error);
            return (self.status, "internal error").into_response();
        }
        (self.status, self.error.to_string()).into_response()
    }
}

impl From<GameError> for AppError {
    fn from(err: GameError) -> Self {
        let status = match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Exhausted => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Store => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError {
            status,
            error: err.into(),
        }
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                AppError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    error: anyhow::Error::from(err),
                }
            }
        }
    };
}

apperr_impl!(serde_json::Error);
apperr_impl!(sqlx::Error);
apperr_impl!(axum::Error);
