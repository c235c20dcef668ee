//! The card catalog every game draws from.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::{db::CardCategory, include_res};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSpec {
    pub name: String,
    #[serde(default)]
    pub text: String,
    pub category: CardCategory,
}

#[derive(Debug, Clone, Default)]
pub struct Deck {
    cards: Vec<CardSpec>,
}

impl Deck {
    /// The deck compiled into the binary.
    pub fn bundled() -> anyhow::Result<Deck> {
        Self::from_json(include_res!(str, "/deck.json")).context("bundled deck is malformed")
    }

    pub async fn from_path(path: &Path) -> anyhow::Result<Deck> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading deck {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("parsing deck {}", path.display()))
    }

    pub fn from_json(json: &str) -> serde_json::Result<Deck> {
        Ok(Deck { cards: serde_json::from_str(json)? })
    }

    pub fn from_cards(cards: Vec<CardSpec>) -> Deck {
        Deck { cards }
    }

    pub fn cards(&self) -> &[CardSpec] {
        &self.cards
    }

    pub fn count(&self, category: CardCategory) -> usize {
        self.cards.iter().filter(|card| card.category == category).count()
    }

    /// Inserts every card the store does not know yet. Returns how many were new.
    pub async fn seed(&self, db_pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let mut tx = db_pool.begin().await?;
        let mut added = 0;
        for card in &self.cards {
            added += sqlx::query("INSERT OR IGNORE INTO cards (name, text, category) VALUES (?, ?, ?)")
                .bind(&card.name)
                .bind(&card.text)
                .bind(card.category.as_str())
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        Ok(added)
    }
}
