use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::{CardView, PlayerView};

/// `{"action": "...", "payload": {...}}` as sent by clients.
#[derive(Debug, Deserialize)]
pub struct Inbound {
    pub action: String,
    #[serde(default)]
    pub payload: Value,
}

/// Field name to the messages explaining what is wrong with it.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub error: String,
    pub errors: FieldErrors,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Outbound {
    Event { event: String, data: Value },
    Error { action: String, data: ErrorData },
}

impl Outbound {
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Outbound::Event { event: event.into(), data }
    }

    pub fn encode(event: impl Into<String>, data: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self::event(event, serde_json::to_value(data)?))
    }

    pub fn error(action: impl Into<String>, error: impl Into<String>, errors: FieldErrors) -> Self {
        Outbound::Error {
            action: action.into(),
            data: ErrorData { error: error.into(), errors },
        }
    }

    pub fn to_text(&self) -> String {
        // Plain maps of strings and numbers; encoding them cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct RoomCreated {
    pub room_code: String,
}

#[derive(Debug, Serialize)]
pub struct RoomCodeValidity {
    pub room_code: String,
    pub valid: bool,
}

#[derive(Debug, Serialize)]
pub struct PlayerNameValidity {
    pub room_code: String,
    pub player_name: String,
    pub valid: bool,
}

#[derive(Debug, Serialize)]
pub struct PlayerJoined<'a> {
    pub room_code: &'a str,
    pub player: &'a PlayerView,
    pub players: &'a [PlayerView],
}

#[derive(Debug, Serialize)]
pub struct HandUpdate<'a> {
    pub room_code: &'a str,
    pub hand: &'a [CardView],
}

#[derive(Debug, Serialize)]
pub struct CardSubmitted<'a> {
    pub room_code: &'a str,
    pub submitting_player: &'a PlayerView,
    pub card: &'a CardView,
    pub players: &'a [PlayerView],
    pub submitted_cards: &'a [CardView],
    pub all_players_submitted: bool,
}

#[derive(Debug, Serialize)]
pub struct CardPicked<'a> {
    pub room_code: &'a str,
    pub picked_player: &'a PlayerView,
    pub card: &'a CardView,
    pub players: &'a [PlayerView],
}

#[derive(Debug, Serialize)]
pub struct NewRound<'a> {
    pub room_code: &'a str,
    pub judge: &'a PlayerView,
    pub matching_card: &'a CardView,
    pub hand: &'a [CardView],
}

#[derive(Debug, Serialize)]
pub struct PlayerBooted<'a> {
    pub room_code: &'a str,
    pub player_name: &'a str,
    pub players: &'a [PlayerView],
    pub judge: Option<&'a PlayerView>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_and_errors_have_distinct_envelopes() {
        let event = Outbound::event("player_joined", json!({ "room_code": "abcd" }));
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({ "event": "player_joined", "data": { "room_code": "abcd" } })
        );

        let mut errors = FieldErrors::new();
        errors.insert("room_code".into(), vec!["This field is required.".into()]);
        let error = Outbound::error("join_room", "join failed", errors);
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({
                "action": "join_room",
                "data": { "error": "join failed", "errors": { "room_code": ["This field is required."] } }
            })
        );
    }

    #[test]
    fn payload_defaults_to_null() {
        let inbound: Inbound = serde_json::from_str(r#"{"action": "create_room"}"#).unwrap();
        assert_eq!(inbound.action, "create_room");
        assert!(inbound.payload.is_null());
    }
}
