//! Game rules as atomic transitions over the entity store.
//!
//! Every public operation on [`Engine`] runs inside one store transaction, so
//! it either applies completely or not at all. Operations on an existing room
//! additionally hold that room's lock for their whole duration, which keeps a
//! pick from interleaving with a submit or a join on the same room.

mod draw;
mod view;


use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use rand::Rng;
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::{
    db::{self, AssignmentStatus, CardCategory, Game, PlayerStatus},
    error::{GameError, GameResult},
};

pub use view::{CardView, PlayerView, RoomSnapshot};

/// Response cards each player holds between rounds.
pub const HAND_SIZE: usize = 5;
pub const CODE_LENGTH: usize = 4;
const CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const CODE_ATTEMPTS: usize = 32;
const DRAW_ATTEMPTS: usize = 32;
const TRANSACTION_ATTEMPTS: usize = 8;

#[derive(Debug, Clone)]
pub struct Joined {
    pub player: PlayerView,
    pub snapshot: RoomSnapshot,
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub room_code: String,
    pub card: CardView,
    pub player: PlayerView,
    pub hand: Vec<CardView>,
    pub players: Vec<PlayerView>,
    pub submitted_cards: Vec<CardView>,
    pub all_players_submitted: bool,
}

/// A player's view of the round that a pick just opened.
#[derive(Debug, Clone)]
pub struct Dealt {
    pub player: PlayerView,
    pub hand: Vec<CardView>,
}

#[derive(Debug, Clone)]
pub struct Picked {
    pub room_code: String,
    pub card: CardView,
    pub winner: PlayerView,
    pub players: Vec<PlayerView>,
    pub judge: PlayerView,
    pub matching_card: CardView,
    pub hands: Vec<Dealt>,
}

#[derive(Debug, Clone)]
pub struct Booted {
    pub room_code: String,
    pub player: PlayerView,
    pub players: Vec<PlayerView>,
    pub judge: Option<PlayerView>,
}

pub struct Engine {
    db_pool: SqlitePool,
    rooms: DashMap<String, Arc<Mutex<()>>>,
}

impl Engine {
    pub fn new(db_pool: SqlitePool) -> Self {
        Engine {
            db_pool,
            rooms: DashMap::new(),
        }
    }

    pub fn db_pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    /// Locks a room that exists. Codes nobody created never get a lock.
    async fn lock_room(&self, code: &str) -> GameResult<OwnedMutexGuard<()>> {
        let existing = self.rooms.get(code).map(|lock| lock.value().clone());
        let lock = match existing {
            Some(lock) => lock,
            None => {
                if !self.validate_room_code(code).await? {
                    return Err(GameError::RoomNotFound(code.to_owned()));
                }
                self.rooms.entry(code.to_owned()).or_default().value().clone()
            }
        };
        Ok(lock.lock_owned().await)
    }

    /// Runs `op` in a fresh transaction, starting over when SQLite reports the
    /// database busy or locked.
    async fn transact<T, F>(&self, mut op: F) -> GameResult<T>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> BoxFuture<'c, GameResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let mut tx = self.db_pool.begin().await?;
            let result = match op(&mut *tx).await {
                Ok(value) => tx.commit().await.map(|()| value).map_err(GameError::from),
                Err(err) => Err(err),
            };

            match result {
                Err(err) if err.is_busy() && attempt < TRANSACTION_ATTEMPTS => {
                    warn!(attempt, "store busy, retrying transaction");
                    tokio::time::sleep(Duration::from_millis(10 << attempt)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Creates a game under a fresh random code and returns the code.
    pub async fn create_room(&self) -> GameResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = generate_room_code();
            let inserted = sqlx::query("INSERT INTO games (code, created_at) VALUES (?, ?)")
                .bind(&code)
                .bind(db::unix_now())
                .execute(&self.db_pool)
                .await;

            match inserted {
                Ok(_) => {
                    info!(room = %code, "room created");
                    return Ok(code);
                }
                Err(err) if db::is_unique_violation(&err) => debug!(room = %code, "room code taken"),
                Err(err) => return Err(err.into()),
            }
        }
        Err(GameError::CodeSpaceExhausted(CODE_ATTEMPTS))
    }

    pub async fn join_room(&self, code: &str, name: &str) -> GameResult<Joined> {
        let _room = self.lock_room(code).await?;
        let joined = self
            .transact(|conn| {
                let (code, name) = (code.to_owned(), name.to_owned());
                Box::pin(async move { join(conn, &code, &name).await })
            })
            .await?;
        info!(room = %code, player = %joined.player.name, status = %joined.player.status, "player joined");
        Ok(joined)
    }

    /// Re-attaches to an existing player, returning the same snapshot a join does.
    pub async fn rejoin_room(&self, code: &str, player_id: i64) -> GameResult<RoomSnapshot> {
        self.transact(|conn| {
            let code = code.to_owned();
            Box::pin(async move {
                let game = require_game(conn, &code).await?;
                let player = view::find_player(conn, game.id, player_id)
                    .await?
                    .ok_or(GameError::PlayerNotFound(player_id))?;
                Ok(view::snapshot(conn, &game, player.into()).await?)
            })
        })
        .await
    }

    pub async fn submit_card(&self, code: &str, card_id: i64) -> GameResult<Submitted> {
        let _room = self.lock_room(code).await?;
        let submitted = self
            .transact(|conn| {
                let code = code.to_owned();
                Box::pin(async move { submit(conn, &code, card_id).await })
            })
            .await?;
        debug!(room = %code, player = %submitted.player.name, card_id, "card submitted");
        Ok(submitted)
    }

    /// Closes the round in favour of `card_id`. The caller is responsible for
    /// only letting the judge do this.
    pub async fn pick_card(&self, code: &str, card_id: i64) -> GameResult<Picked> {
        let _room = self.lock_room(code).await?;
        let picked = self
            .transact(|conn| {
                let code = code.to_owned();
                Box::pin(async move { pick(conn, &code, card_id).await })
            })
            .await?;
        info!(room = %code, winner = %picked.winner.name, score = picked.winner.score, "card picked");
        Ok(picked)
    }

    /// Tops up every hand in the room. Returns how many cards were dealt.
    pub async fn replenish_hands(&self, code: &str) -> GameResult<usize> {
        let _room = self.lock_room(code).await?;
        self.transact(|conn| {
            let code = code.to_owned();
            Box::pin(async move {
                let game = require_game(conn, &code).await?;
                draw::replenish_hands(conn, game.id).await
            })
        })
        .await
    }

    pub async fn boot_player(&self, code: &str, player_id: i64) -> GameResult<Booted> {
        let _room = self.lock_room(code).await?;
        let booted = self
            .transact(|conn| {
                let code = code.to_owned();
                Box::pin(async move { boot(conn, &code, player_id).await })
            })
            .await?;
        info!(room = %code, player = %booted.player.name, "player booted");
        Ok(booted)
    }

    pub async fn validate_room_code(&self, code: &str) -> GameResult<bool> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM games WHERE code = ?")
            .bind(code)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(exists.is_some())
    }

    /// True when the room exists and nobody in it goes by `name`, ignoring case.
    pub async fn validate_player_name(&self, code: &str, name: &str) -> GameResult<bool> {
        let (exists, taken): (bool, bool) = sqlx::query_as(
            "SELECT EXISTS (SELECT 1 FROM games WHERE code = ?), \
             EXISTS (SELECT 1 FROM players p JOIN games g ON g.id = p.game_id WHERE g.code = ? AND p.name = ?)",
        )
        .bind(code)
        .bind(code)
        .bind(name)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(exists && !taken)
    }

    /// Tears down every game, with their players and assignments.
    pub async fn clear_all_games(&self) -> GameResult<u64> {
        let removed = sqlx::query("DELETE FROM games")
            .execute(&self.db_pool)
            .await?
            .rows_affected();
        self.rooms.clear();
        info!(removed, "cleared all games");
        Ok(removed)
    }
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

async fn require_game(conn: &mut SqliteConnection, code: &str) -> GameResult<Game> {
    view::find_game(conn, code)
        .await?
        .ok_or_else(|| GameError::RoomNotFound(code.to_owned()))
}

async fn set_player_status(conn: &mut SqliteConnection, player_id: i64, status: PlayerStatus) -> GameResult<()> {
    sqlx::query("UPDATE players SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(player_id)
        .execute(conn)
        .await?;
    Ok(())
}

async fn set_assignment_status(
    conn: &mut SqliteConnection,
    assignment_id: i64,
    status: AssignmentStatus,
) -> GameResult<()> {
    sqlx::query("UPDATE assignments SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(assignment_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Makes `player_id` the judge and hands them the live prompt, drawing one if
/// the room has none. A card they already put on the table is lost: judges
/// never pick their own.
async fn seat_judge(conn: &mut SqliteConnection, game_id: i64, player_id: i64) -> GameResult<()> {
    sqlx::query("UPDATE assignments SET status = ? WHERE player_id = ? AND status = ?")
        .bind(AssignmentStatus::Lost.as_str())
        .bind(player_id)
        .bind(AssignmentStatus::Submitted.as_str())
        .execute(&mut *conn)
        .await?;

    match view::matching_assignment(&mut *conn, game_id).await? {
        Some(matching) => {
            sqlx::query("UPDATE assignments SET player_id = ? WHERE id = ?")
                .bind(player_id)
                .bind(matching.id)
                .execute(&mut *conn)
                .await?;
        }
        None => {
            draw::draw(&mut *conn, game_id, Some(player_id), CardCategory::Match, 1).await?;
        }
    }
    set_player_status(conn, player_id, PlayerStatus::Judge).await
}

async fn join(conn: &mut SqliteConnection, code: &str, name: &str) -> GameResult<Joined> {
    let game = require_game(&mut *conn, code).await?;

    let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM players WHERE game_id = ? AND name = ?")
        .bind(game.id)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;
    if taken.is_some() {
        return Err(GameError::NameTaken(name.to_owned()));
    }

    let inserted = sqlx::query("INSERT INTO players (game_id, name, status, score, created_at) VALUES (?, ?, ?, 0, ?)")
        .bind(game.id)
        .bind(name)
        .bind(PlayerStatus::Waiting.as_str())
        .bind(db::unix_now())
        .execute(&mut *conn)
        .await;
    let player_id = match inserted {
        Ok(done) => done.last_insert_rowid(),
        Err(err) if db::is_unique_violation(&err) => return Err(GameError::NameTaken(name.to_owned())),
        Err(err) => return Err(err.into()),
    };

    draw::draw(&mut *conn, game.id, Some(player_id), CardCategory::Response, HAND_SIZE).await?;

    // The first player in, or the first one back into a room whose judge left.
    if view::judge(&mut *conn, game.id).await?.is_none() {
        seat_judge(&mut *conn, game.id, player_id).await?;
    }

    let player: PlayerView = view::find_player(&mut *conn, game.id, player_id)
        .await?
        .ok_or(GameError::PlayerNotFound(player_id))?
        .into();
    let snapshot = view::snapshot(conn, &game, player.clone()).await?;
    Ok(Joined { player, snapshot })
}

async fn submit(conn: &mut SqliteConnection, code: &str, card_id: i64) -> GameResult<Submitted> {
    let game = require_game(&mut *conn, code).await?;
    let assignment = view::find_assignment(&mut *conn, game.id, card_id)
        .await?
        .ok_or(GameError::CardNotFound(card_id))?;
    if assignment.status != AssignmentStatus::Hand {
        return Err(GameError::InvalidTransition {
            card: card_id,
            from: assignment.status,
            to: AssignmentStatus::Submitted,
        });
    }
    let player_id = assignment.player_id.ok_or(GameError::CardNotFound(card_id))?;
    let owner = view::find_player(&mut *conn, game.id, player_id)
        .await?
        .ok_or(GameError::PlayerNotFound(player_id))?;
    match owner.status {
        PlayerStatus::Judge => return Err(GameError::JudgeCannotSubmit),
        PlayerStatus::Submitted => return Err(GameError::AlreadySubmitted),
        PlayerStatus::Waiting => {}
    }

    set_assignment_status(&mut *conn, assignment.id, AssignmentStatus::Submitted).await?;
    set_player_status(&mut *conn, player_id, PlayerStatus::Submitted).await?;

    let players = view::roster(view::players(&mut *conn, game.id).await?);
    let player = players
        .iter()
        .find(|player| player.key == player_id)
        .cloned()
        .ok_or(GameError::PlayerNotFound(player_id))?;

    Ok(Submitted {
        card: view::card(&mut *conn, card_id).await?,
        hand: view::hand(&mut *conn, player_id).await?,
        submitted_cards: view::submitted_cards(&mut *conn, game.id).await?,
        all_players_submitted: view::all_submitted(&players),
        room_code: game.code,
        player,
        players,
    })
}

async fn pick(conn: &mut SqliteConnection, code: &str, card_id: i64) -> GameResult<Picked> {
    let game = require_game(&mut *conn, code).await?;
    let matching = view::matching_assignment(&mut *conn, game.id)
        .await?
        .ok_or(GameError::NoMatchingCard)?;
    let target = view::find_assignment(&mut *conn, game.id, card_id)
        .await?
        .ok_or(GameError::CardNotFound(card_id))?;
    if target.status != AssignmentStatus::Submitted {
        return Err(GameError::InvalidTransition {
            card: card_id,
            from: target.status,
            to: AssignmentStatus::Picked,
        });
    }
    let winner_id = target.player_id.ok_or(GameError::CardNotFound(card_id))?;

    set_assignment_status(&mut *conn, matching.id, AssignmentStatus::Won).await?;

    // Everybody, the outgoing judge included, goes back to waiting before
    // the winner takes the chair.
    sqlx::query("UPDATE players SET status = ? WHERE game_id = ?")
        .bind(PlayerStatus::Waiting.as_str())
        .bind(game.id)
        .execute(&mut *conn)
        .await?;

    set_assignment_status(&mut *conn, target.id, AssignmentStatus::Picked).await?;
    sqlx::query("UPDATE players SET score = score + 1, status = ? WHERE id = ?")
        .bind(PlayerStatus::Judge.as_str())
        .bind(winner_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE assignments SET status = ? WHERE game_id = ? AND status = ?")
        .bind(AssignmentStatus::Lost.as_str())
        .bind(game.id)
        .bind(AssignmentStatus::Submitted.as_str())
        .execute(&mut *conn)
        .await?;

    draw::replenish_hands(&mut *conn, game.id).await?;
    draw::draw(&mut *conn, game.id, Some(winner_id), CardCategory::Match, 1).await?;

    let players = view::roster(view::players(&mut *conn, game.id).await?);
    let winner = players
        .iter()
        .find(|player| player.key == winner_id)
        .cloned()
        .ok_or(GameError::PlayerNotFound(winner_id))?;
    let matching_card = view::matching_card(&mut *conn, game.id)
        .await?
        .ok_or(GameError::NoMatchingCard)?;

    let mut hands = Vec::with_capacity(players.len());
    for player in &players {
        hands.push(Dealt {
            hand: view::hand(&mut *conn, player.key).await?,
            player: player.clone(),
        });
    }

    Ok(Picked {
        card: view::card(&mut *conn, card_id).await?,
        room_code: game.code,
        judge: winner.clone(),
        winner,
        players,
        matching_card,
        hands,
    })
}

async fn boot(conn: &mut SqliteConnection, code: &str, player_id: i64) -> GameResult<Booted> {
    let game = require_game(&mut *conn, code).await?;
    let player = view::find_player(&mut *conn, game.id, player_id)
        .await?
        .ok_or(GameError::PlayerNotFound(player_id))?;

    // Cards the booted player still held or had on the table are out of play.
    sqlx::query("UPDATE assignments SET status = ?, player_id = NULL WHERE player_id = ? AND status IN (?, ?)")
        .bind(AssignmentStatus::Lost.as_str())
        .bind(player_id)
        .bind(AssignmentStatus::Hand.as_str())
        .bind(AssignmentStatus::Submitted.as_str())
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM players WHERE id = ?")
        .bind(player_id)
        .execute(&mut *conn)
        .await?;

    if player.status == PlayerStatus::Judge {
        let successor: Option<i64> =
            sqlx::query_scalar("SELECT id FROM players WHERE game_id = ? ORDER BY created_at, id LIMIT 1")
                .bind(game.id)
                .fetch_optional(&mut *conn)
                .await?;
        if let Some(successor) = successor {
            seat_judge(&mut *conn, game.id, successor).await?;
            debug!(room = %game.code, successor, "judge booted, chair handed on");
        }
    }

    let players = view::roster(view::players(&mut *conn, game.id).await?);
    Ok(Booted {
        room_code: game.code,
        judge: view::judge_of(&players),
        player: player.into(),
        players,
    })
}
