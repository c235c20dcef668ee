use std::{net::SocketAddr, time::Duration};

use cardgame::{AppState, app, db, deck::Deck};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_server() -> SocketAddr {
    let db_pool = db::connect_in_memory().await.unwrap();
    Deck::bundled().unwrap().seed(&db_pool).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app(AppState::new(db_pool))).await });
    addr
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
    client
}

async fn send(client: &mut Client, action: &str, payload: Value) {
    let frame = json!({ "action": action, "payload": payload });
    client.send(Message::text(frame.to_string())).await.unwrap();
}

async fn recv(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("server replied in time")
            .expect("socket still open")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn expect_event(client: &mut Client, event: &str) -> Value {
    let frame = recv(client).await;
    assert_eq!(frame["event"], event, "{frame}");
    frame["data"].clone()
}

async fn create_room(addr: SocketAddr) -> String {
    let mut lobby = connect(addr, "/r/ws").await;
    send(&mut lobby, "create_room", Value::Null).await;
    let data = expect_event(&mut lobby, "create_room").await;
    data["room_code"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn a_full_round_over_websockets() {
    let addr = spawn_server().await;
    let code = create_room(addr).await;
    assert_eq!(code.len(), 4);

    let mut tim = connect(addr, &format!("/r/{code}/ws")).await;
    send(&mut tim, "join_room", json!({ "room_code": code, "player_name": "tim" })).await;
    let snapshot = expect_event(&mut tim, "join_room").await;
    assert_eq!(snapshot["player"]["status"], "judge");
    assert_eq!(snapshot["hand"].as_array().unwrap().len(), 5);
    let tim_key = snapshot["player"]["key"].as_i64().unwrap();
    expect_event(&mut tim, "player_joined").await;

    let mut bob = connect(addr, &format!("/r/{code}/ws")).await;
    send(&mut bob, "join_room", json!({ "room_code": code, "player_name": "bob" })).await;
    let snapshot = expect_event(&mut bob, "join_room").await;
    assert_eq!(snapshot["player"]["status"], "waiting");
    assert_eq!(snapshot["judge"]["key"], tim_key);
    let bob_key = snapshot["player"]["key"].as_i64().unwrap();
    let card_key = snapshot["hand"][0]["key"].as_i64().unwrap();
    expect_event(&mut bob, "player_joined").await;

    let joined = expect_event(&mut tim, "player_joined").await;
    assert_eq!(joined["player"]["name"], "bob");
    assert_eq!(joined["players"].as_array().unwrap().len(), 2);

    send(&mut bob, "submit_card", json!({ "room_code": code, "card_key": card_key })).await;
    let hand = expect_event(&mut bob, "submit_card").await;
    assert_eq!(hand["hand"].as_array().unwrap().len(), 4);
    expect_event(&mut bob, "card_submitted").await;

    let submitted = expect_event(&mut tim, "card_submitted").await;
    assert_eq!(submitted["card"]["key"], card_key);
    assert_eq!(submitted["submitting_player"]["key"], bob_key);
    assert_eq!(submitted["all_players_submitted"], true);

    send(&mut tim, "pick_card", json!({ "room_code": code, "card_key": card_key })).await;
    for client in [&mut tim, &mut bob] {
        let picked = expect_event(client, "card_picked").await;
        assert_eq!(picked["picked_player"]["key"], bob_key);
        assert_eq!(picked["picked_player"]["score"], 1);

        let round = expect_event(client, "new_round").await;
        assert_eq!(round["judge"]["key"], bob_key);
        assert!(round["matching_card"]["key"].is_i64());
        assert_eq!(round["hand"].as_array().unwrap().len(), 5);
    }
}

#[tokio::test]
async fn bad_frames_are_answered_and_the_socket_stays_up() {
    let addr = spawn_server().await;
    let mut lobby = connect(addr, "/r/ws").await;

    lobby.send(Message::text("not json")).await.unwrap();
    let reply = recv(&mut lobby).await;
    assert_eq!(reply["action"], "unknown");

    send(&mut lobby, "shuffle_deck", json!({})).await;
    let reply = recv(&mut lobby).await;
    assert_eq!(reply["action"], "shuffle_deck");
    assert_eq!(reply["data"]["error"], "unknown action");

    send(&mut lobby, "join_room", json!({ "room_code": "zzzz", "player_name": "tim" })).await;
    let reply = recv(&mut lobby).await;
    assert_eq!(reply["action"], "join_room");
    assert_eq!(
        reply["data"]["errors"]["room_code"][0],
        "Unfortunately, that game code does not exist."
    );

    send(&mut lobby, "validate_room_code", json!({ "room_code": "zzzz" })).await;
    let data = expect_event(&mut lobby, "validate_room_code").await;
    assert_eq!(data["valid"], false);
}

#[tokio::test]
async fn room_sockets_need_an_existing_room() {
    let addr = spawn_server().await;
    assert!(connect_async(format!("ws://{addr}/r/zzzz/ws")).await.is_err());

    let code = create_room(addr).await;
    let mut watcher = connect(addr, &format!("/r/{}/ws", code.to_uppercase())).await;

    // Room sockets hear the room before they join it themselves.
    let mut lobby = connect(addr, "/r/ws").await;
    send(&mut lobby, "join_room", json!({ "room_code": code, "player_name": "ann" })).await;
    expect_event(&mut lobby, "join_room").await;
    let joined = expect_event(&mut watcher, "player_joined").await;
    assert_eq!(joined["player"]["name"], "ann");
}
