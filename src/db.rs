use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cards (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    text TEXT NOT NULL DEFAULT '',
    category TEXT NOT NULL CHECK (category IN ('match', 'response')),
    UNIQUE (name, category)
);

CREATE TABLE IF NOT EXISTS games (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS players (
    id INTEGER PRIMARY KEY,
    game_id INTEGER NOT NULL REFERENCES games (id) ON DELETE CASCADE,
    name TEXT NOT NULL COLLATE NOCASE,
    status TEXT NOT NULL DEFAULT 'waiting',
    score INTEGER NOT NULL DEFAULT 0 CHECK (score >= 0),
    created_at INTEGER NOT NULL,
    UNIQUE (game_id, name)
);

CREATE TABLE IF NOT EXISTS assignments (
    id INTEGER PRIMARY KEY,
    card_id INTEGER NOT NULL REFERENCES cards (id),
    game_id INTEGER NOT NULL REFERENCES games (id) ON DELETE CASCADE,
    player_id INTEGER REFERENCES players (id) ON DELETE SET NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    UNIQUE (card_id, game_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS one_matching_card_per_game
    ON assignments (game_id) WHERE status = 'matching';

CREATE INDEX IF NOT EXISTS assignments_by_player
    ON assignments (player_id, status);
"#;

/// Opens the pool described by `database_url` and makes sure the schema exists.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let db_pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;
    migrate(&db_pool).await?;
    Ok(db_pool)
}

/// A private in-memory database. A single connection that never expires is
/// what keeps the data alive, so the pool is capped at one.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    migrate(&db_pool).await?;
    Ok(db_pool)
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// SQLITE_BUSY and SQLITE_LOCKED, including their extended codes.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    db_err
        .code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value {value:?}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                match value.as_str() {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardCategory {
    /// The prompt the judge matches against.
    Match,
    Response,
}

text_enum!(CardCategory, "card category", { Match => "match", Response => "response" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Waiting,
    Submitted,
    Judge,
}

text_enum!(PlayerStatus, "player status", {
    Waiting => "waiting",
    Submitted => "submitted",
    Judge => "judge",
});

/// Life cycle of a card inside one game. Statuses only ever move forward:
/// `hand -> submitted -> picked | lost` and `matching -> won`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    Hand,
    Matching,
    Submitted,
    Picked,
    Won,
    Lost,
}

text_enum!(AssignmentStatus, "assignment status", {
    Hand => "hand",
    Matching => "matching",
    Submitted => "submitted",
    Picked => "picked",
    Won => "won",
    Lost => "lost",
});

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Game {
    pub id: i64,
    pub code: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Player {
    pub id: i64,
    pub game_id: i64,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub status: PlayerStatus,
    pub score: i64,
    pub created_at: i64,
}

// unique: card_id, game_id
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Assignment {
    pub id: i64,
    pub card_id: i64,
    pub game_id: i64,
    pub player_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: AssignmentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_round_trip_through_text() {
        for status in [
            AssignmentStatus::Hand,
            AssignmentStatus::Matching,
            AssignmentStatus::Submitted,
            AssignmentStatus::Picked,
            AssignmentStatus::Won,
            AssignmentStatus::Lost,
        ] {
            assert_eq!(AssignmentStatus::try_from(status.as_str().to_owned()).unwrap(), status);
        }
        assert!(PlayerStatus::try_from("boss".to_owned()).is_err());
    }

    #[tokio::test]
    async fn schema_rejects_duplicate_codes_and_second_matching_card() {
        let db_pool = connect_in_memory().await.unwrap();

        sqlx::query("INSERT INTO games (code, created_at) VALUES ('abcd', 0)")
            .execute(&db_pool)
            .await
            .unwrap();
        let err = sqlx::query("INSERT INTO games (code, created_at) VALUES ('abcd', 0)")
            .execute(&db_pool)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));

        sqlx::query("INSERT INTO cards (name, category) VALUES ('a', 'match'), ('b', 'match')")
            .execute(&db_pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO assignments (card_id, game_id, status, created_at) VALUES (1, 1, 'matching', 0)")
            .execute(&db_pool)
            .await
            .unwrap();
        let err = sqlx::query("INSERT INTO assignments (card_id, game_id, status, created_at) VALUES (2, 1, 'matching', 0)")
            .execute(&db_pool)
            .await
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }
}
