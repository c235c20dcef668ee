pub mod actions;
pub mod msg;
pub mod registry;
pub mod validate;
mod ws;

use axum::{Router, routing::get};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::lobby_ws))
        .route("/{code}/ws", get(ws::room_ws))
}
