use rand::seq::IndexedRandom;
use sqlx::SqliteConnection;
use tracing::debug;

use crate::{
    db::{self, AssignmentStatus, CardCategory},
    error::{GameError, GameResult},
};

use super::{DRAW_ATTEMPTS, HAND_SIZE};

/// Deals `count` cards of `category` that this game has never seen.
///
/// Response cards land in the player's hand, a match card becomes the game's
/// live prompt. Returns the drawn card ids.
pub(crate) async fn draw(
    conn: &mut SqliteConnection,
    game_id: i64,
    player_id: Option<i64>,
    category: CardCategory,
    count: usize,
) -> GameResult<Vec<i64>> {
    draw_from(conn, game_id, player_id, category, count, random_candidates).await
}

fn random_candidates(unused: &[i64], missing: usize) -> Vec<i64> {
    unused.choose_multiple(&mut rand::rng(), missing).copied().collect()
}

/// The draw loop with the choice of candidates left to `choose`, which gets
/// the cards still unused in this game and how many are missing.
///
/// Losing a (card, game) race to another writer only costs a redraw of
/// whatever is still missing.
async fn draw_from<F>(
    conn: &mut SqliteConnection,
    game_id: i64,
    player_id: Option<i64>,
    category: CardCategory,
    count: usize,
    mut choose: F,
) -> GameResult<Vec<i64>>
where
    F: FnMut(&[i64], usize) -> Vec<i64>,
{
    let status = match category {
        CardCategory::Match => AssignmentStatus::Matching,
        CardCategory::Response => AssignmentStatus::Hand,
    };

    let mut drawn = Vec::with_capacity(count);
    for _ in 0..DRAW_ATTEMPTS {
        let missing = count - drawn.len();
        if missing == 0 {
            return Ok(drawn);
        }

        let unused: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM cards WHERE category = ? \
             AND id NOT IN (SELECT card_id FROM assignments WHERE game_id = ?)",
        )
        .bind(category.as_str())
        .bind(game_id)
        .fetch_all(&mut *conn)
        .await?;
        if unused.len() < missing {
            return Err(GameError::Exhausted {
                category,
                requested: missing,
                available: unused.len(),
            });
        }

        for card_id in choose(&unused, missing) {
            let inserted = sqlx::query(
                "INSERT INTO assignments (card_id, game_id, player_id, status, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(card_id)
            .bind(game_id)
            .bind(player_id)
            .bind(status.as_str())
            .bind(db::unix_now())
            .execute(&mut *conn)
            .await;

            match inserted {
                Ok(_) => drawn.push(card_id),
                Err(err) if db::is_unique_violation(&err) => {
                    debug!(game_id, card_id, "card already drawn into this game, drawing again");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    if drawn.len() == count {
        Ok(drawn)
    } else {
        Err(GameError::DrawContention {
            category,
            attempts: DRAW_ATTEMPTS,
        })
    }
}

/// Tops every hand in the game back up to [`HAND_SIZE`]. Returns how many
/// cards were dealt in total.
pub(crate) async fn replenish_hands(conn: &mut SqliteConnection, game_id: i64) -> GameResult<usize> {
    let holdings: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT p.id, (SELECT COUNT(*) FROM assignments a WHERE a.player_id = p.id AND a.status = 'hand') \
         FROM players p WHERE p.game_id = ? ORDER BY p.created_at, p.id",
    )
    .bind(game_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut dealt = 0;
    for (player_id, held) in holdings {
        let shortfall = HAND_SIZE.saturating_sub(held as usize);
        if shortfall > 0 {
            dealt += draw(&mut *conn, game_id, Some(player_id), CardCategory::Response, shortfall)
                .await?
                .len();
        }
    }
    Ok(dealt)
}
