//! Read-side projections of a game, shaped the way clients receive them.

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::db::{Assignment, Game, Player, PlayerStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerView {
    pub key: i64,
    pub name: String,
    pub status: PlayerStatus,
    pub score: i64,
}

impl From<Player> for PlayerView {
    fn from(player: Player) -> Self {
        PlayerView {
            key: player.id,
            name: player.name,
            status: player.status,
            score: player.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CardView {
    pub key: i64,
    pub name: String,
    pub text: String,
}

/// Everything a client needs to render a game from scratch.
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_code: String,
    pub player: PlayerView,
    pub players: Vec<PlayerView>,
    pub hand: Vec<CardView>,
    pub matching_card: Option<CardView>,
    pub submitted_cards: Vec<CardView>,
    pub all_players_submitted: bool,
    pub judge: Option<PlayerView>,
}

pub(crate) async fn find_game(conn: &mut SqliteConnection, code: &str) -> Result<Option<Game>, sqlx::Error> {
    sqlx::query_as("SELECT id, code, created_at FROM games WHERE code = ?")
        .bind(code)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn find_player(
    conn: &mut SqliteConnection,
    game_id: i64,
    player_id: i64,
) -> Result<Option<Player>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM players WHERE game_id = ? AND id = ?")
        .bind(game_id)
        .bind(player_id)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn players(conn: &mut SqliteConnection, game_id: i64) -> Result<Vec<Player>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM players WHERE game_id = ? ORDER BY created_at, id")
        .bind(game_id)
        .fetch_all(conn)
        .await
}

pub(crate) async fn judge(conn: &mut SqliteConnection, game_id: i64) -> Result<Option<Player>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM players WHERE game_id = ? AND status = 'judge'")
        .bind(game_id)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn find_assignment(
    conn: &mut SqliteConnection,
    game_id: i64,
    card_id: i64,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query_as("SELECT id, card_id, game_id, player_id, status FROM assignments WHERE game_id = ? AND card_id = ?")
        .bind(game_id)
        .bind(card_id)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn matching_assignment(
    conn: &mut SqliteConnection,
    game_id: i64,
) -> Result<Option<Assignment>, sqlx::Error> {
    sqlx::query_as("SELECT id, card_id, game_id, player_id, status FROM assignments WHERE game_id = ? AND status = 'matching'")
        .bind(game_id)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn card(conn: &mut SqliteConnection, card_id: i64) -> Result<CardView, sqlx::Error> {
    sqlx::query_as("SELECT id AS key, name, text FROM cards WHERE id = ?")
        .bind(card_id)
        .fetch_one(conn)
        .await
}

pub(crate) async fn hand(conn: &mut SqliteConnection, player_id: i64) -> Result<Vec<CardView>, sqlx::Error> {
    sqlx::query_as(
        "SELECT c.id AS key, c.name, c.text FROM assignments a JOIN cards c ON c.id = a.card_id \
         WHERE a.player_id = ? AND a.status = 'hand' ORDER BY a.id",
    )
    .bind(player_id)
    .fetch_all(conn)
    .await
}

pub(crate) async fn matching_card(conn: &mut SqliteConnection, game_id: i64) -> Result<Option<CardView>, sqlx::Error> {
    sqlx::query_as(
        "SELECT c.id AS key, c.name, c.text FROM assignments a JOIN cards c ON c.id = a.card_id \
         WHERE a.game_id = ? AND a.status = 'matching'",
    )
    .bind(game_id)
    .fetch_optional(conn)
    .await
}

pub(crate) async fn submitted_cards(conn: &mut SqliteConnection, game_id: i64) -> Result<Vec<CardView>, sqlx::Error> {
    sqlx::query_as(
        "SELECT c.id AS key, c.name, c.text FROM assignments a JOIN cards c ON c.id = a.card_id \
         WHERE a.game_id = ? AND a.status = 'submitted' ORDER BY a.id",
    )
    .bind(game_id)
    .fetch_all(conn)
    .await
}

pub(crate) fn roster(players: Vec<Player>) -> Vec<PlayerView> {
    players.into_iter().map(PlayerView::from).collect()
}

pub(crate) fn all_submitted(players: &[PlayerView]) -> bool {
    players.iter().all(|player| player.status != PlayerStatus::Waiting)
}

pub(crate) fn judge_of(players: &[PlayerView]) -> Option<PlayerView> {
    players.iter().find(|player| player.status == PlayerStatus::Judge).cloned()
}

pub(crate) async fn snapshot(
    conn: &mut SqliteConnection,
    game: &Game,
    player: PlayerView,
) -> Result<RoomSnapshot, sqlx::Error> {
    let players = roster(players(&mut *conn, game.id).await?);
    let hand = hand(&mut *conn, player.key).await?;
    let matching_card = matching_card(&mut *conn, game.id).await?;
    let submitted_cards = submitted_cards(&mut *conn, game.id).await?;

    Ok(RoomSnapshot {
        room_code: game.code.clone(),
        all_players_submitted: all_submitted(&players),
        judge: judge_of(&players),
        player,
        players,
        hand,
        matching_card,
        submitted_cards,
    })
}
