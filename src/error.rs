//! Domain errors raised by the game engine.

use crate::db::{AssignmentStatus, CardCategory};

pub type GameResult<T> = Result<T, GameError>;

/// Coarse classification used by the gateway when it reports a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidInput,
    Exhausted,
    Store,
}

#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Unfortunately, that game code does not exist.")]
    RoomNotFound(String),

    #[error("Unfortunately, that player does not exist.")]
    PlayerNotFound(i64),

    #[error("That card is not in play in this game.")]
    CardNotFound(i64),

    #[error("This game has no matching card in play.")]
    NoMatchingCard,

    #[error("Unfortunately, that player name is already taken.")]
    NameTaken(String),

    #[error("The judge does not submit cards.")]
    JudgeCannotSubmit,

    #[error("You already submitted a card this round.")]
    AlreadySubmitted,

    #[error("Card {card} is {from} and cannot become {to}.")]
    InvalidTransition {
        card: i64,
        from: AssignmentStatus,
        to: AssignmentStatus,
    },

    #[error("No free game code after {0} attempts.")]
    CodeSpaceExhausted(usize),

    #[error("Drawing {category} cards lost the race {attempts} times in a row.")]
    DrawContention { category: CardCategory, attempts: usize },

    #[error("The deck has {available} {category} cards left but {requested} are needed.")]
    Exhausted {
        category: CardCategory,
        requested: usize,
        available: usize,
    },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        use GameError::*;
        match self {
            RoomNotFound(_) | PlayerNotFound(_) | CardNotFound(_) | NoMatchingCard => ErrorKind::NotFound,
            NameTaken(_)
            | JudgeCannotSubmit
            | AlreadySubmitted
            | InvalidTransition { .. }
            | CodeSpaceExhausted(_)
            | DrawContention { .. } => ErrorKind::Conflict,
            Exhausted { .. } => ErrorKind::Exhausted,
            Store(_) => ErrorKind::Store,
        }
    }

    /// The request field the error is about, if it is about one.
    pub fn field(&self) -> Option<&'static str> {
        use GameError::*;
        match self {
            RoomNotFound(_) => Some("room_code"),
            PlayerNotFound(_) => Some("player_key"),
            NameTaken(_) => Some("player_name"),
            CardNotFound(_) | JudgeCannotSubmit | AlreadySubmitted | InvalidTransition { .. } => Some("card_key"),
            _ => None,
        }
    }

    pub(crate) fn is_busy(&self) -> bool {
        matches!(self, GameError::Store(err) if crate::db::is_busy(err))
    }
}
