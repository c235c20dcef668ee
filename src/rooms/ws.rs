use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use super::{
    actions::Dispatcher,
    registry::{Connection, GroupKey, Registry},
};
use crate::{AppError, AppResult, game::Engine};

/// Socket for clients that are not in a room yet: creating and validating.
#[debug_handler(state = crate::AppState)]
pub async fn lobby_ws(
    State(engine): State<Arc<Engine>>,
    State(registry): State<Arc<Registry>>,
    State(dispatcher): State<Arc<Dispatcher>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |stream| serve_connection(stream, None, engine, registry, dispatcher))
}

/// Socket bound to one room. The connection hears the room's broadcasts
/// from the moment it opens.
#[debug_handler(state = crate::AppState)]
pub async fn room_ws(
    Path(code): Path<String>,
    State(engine): State<Arc<Engine>>,
    State(registry): State<Arc<Registry>>,
    State(dispatcher): State<Arc<Dispatcher>>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let code = code.trim().to_lowercase();
    if !engine.validate_room_code(&code).await? {
        return Err(AppError::new(StatusCode::NOT_FOUND, format!("no room {code}")));
    }

    Ok(ws.on_upgrade(move |stream| {
        serve_connection(stream, Some(GroupKey::room(code)), engine, registry, dispatcher)
    }))
}

async fn serve_connection(
    stream: WebSocket,
    room: Option<GroupKey>,
    engine: Arc<Engine>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
) {
    let (connection, mut outbox) = Connection::open();
    let (mut sender, mut receiver) = stream.split();
    info!(connection = %connection.id(), room = ?room.as_ref().map(ToString::to_string), "socket opened");

    if let Some(room) = room {
        registry.join(room, &connection);
    }

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            if sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    dispatcher.dispatch(&engine, &registry, &connection, text.as_str()).await;
                }
                Some(Ok(Message::Binary(_))) => {
                    debug!(connection = %connection.id(), "ignoring binary frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(connection = %connection.id(), "socket error: {err}");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    // Players outlive their sockets; only the subscriptions go.
    registry.leave_all(connection.id());
    writer.abort();
    info!(connection = %connection.id(), "socket closed");
}
