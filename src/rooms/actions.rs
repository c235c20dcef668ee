//! Inbound actions and what each one sends where.
//!
//! Every action is a handler registered under its wire name. A handler turns
//! a payload into a [`Dispatch`]: the groups the requesting connection should
//! join, an optional direct reply, and the broadcasts to publish, in order.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{
    msg::{
        CardPicked, CardSubmitted, FieldErrors, HandUpdate, Inbound, NewRound, Outbound, PlayerBooted, PlayerJoined,
        PlayerNameValidity, RoomCodeValidity, RoomCreated,
    },
    registry::{Connection, GroupKey, Registry},
    validate::Form,
};
use crate::{
    error::{ErrorKind, GameError},
    game::Engine,
};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("invalid request")]
    Invalid(FieldErrors),

    #[error(transparent)]
    Game(#[from] GameError),

    #[error("unknown action")]
    UnknownAction,

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("internal error")]
    Internal(String),
}

impl From<FieldErrors> for ActionError {
    fn from(errors: FieldErrors) -> Self {
        ActionError::Invalid(errors)
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(err: serde_json::Error) -> Self {
        ActionError::Internal(err.to_string())
    }
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Invalid(_) | ActionError::UnknownAction | ActionError::Malformed(_) => ErrorKind::InvalidInput,
            ActionError::Game(err) => err.kind(),
            ActionError::Internal(_) => ErrorKind::Store,
        }
    }

    /// The `{action, data: {error, errors}}` frame sent back to the requester.
    pub fn to_outbound(&self, action: &str) -> Outbound {
        match self {
            ActionError::Invalid(errors) => Outbound::error(action, format!("{action} failed"), errors.clone()),
            ActionError::Game(err) => {
                let mut errors = FieldErrors::new();
                if let Some(field) = err.field() {
                    errors.insert(field.to_owned(), vec![err.to_string()]);
                }
                let error = match err.kind() {
                    ErrorKind::Store => "internal error".to_owned(),
                    _ => err.to_string(),
                };
                Outbound::error(action, error, errors)
            }
            other => Outbound::error(action, other.to_string(), FieldErrors::new()),
        }
    }
}

#[derive(Debug, Default)]
pub struct Dispatch {
    pub subscribe: Vec<GroupKey>,
    pub reply: Option<Outbound>,
    pub publish: Vec<(GroupKey, Outbound)>,
}

impl Dispatch {
    fn reply(frame: Outbound) -> Self {
        Dispatch {
            reply: Some(frame),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError>;
}

pub struct Dispatcher {
    actions: HashMap<&'static str, Arc<dyn Action>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Dispatcher::new()
            .register("create_room", CreateRoom)
            .register("join_room", JoinRoom)
            .register("rejoin_room", RejoinRoom)
            .register("submit_card", SubmitCard)
            .register("pick_card", PickCard)
            .register("boot_player", BootPlayer)
            .register("validate_room_code", ValidateRoomCode)
            .register("validate_player_name", ValidatePlayerName)
    }
}

impl Dispatcher {
    /// A dispatcher that knows no actions yet.
    pub fn new() -> Self {
        Dispatcher { actions: HashMap::new() }
    }

    pub fn register(mut self, name: &'static str, action: impl Action + 'static) -> Self {
        self.actions.insert(name, Arc::new(action));
        self
    }

    pub fn actions(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.actions.keys().copied()
    }

    /// Handles one text frame from `connection` to completion.
    ///
    /// The engine call runs on its own task, so a client that hangs up
    /// mid-action cannot abandon half of it; only the reply goes nowhere.
    pub async fn dispatch(&self, engine: &Arc<Engine>, registry: &Registry, connection: &Connection, text: &str) {
        let inbound: Inbound = match serde_json::from_str(text) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(connection = %connection.id(), "malformed frame: {err}");
                connection.send(&ActionError::Malformed(err.to_string()).to_outbound("unknown"));
                return;
            }
        };
        let Inbound { action: name, payload } = inbound;

        let Some(action) = self.actions.get(name.as_str()).cloned() else {
            debug!(connection = %connection.id(), action = %name, "unknown action");
            connection.send(&ActionError::UnknownAction.to_outbound(&name));
            return;
        };

        debug!(connection = %connection.id(), action = %name, "dispatching");
        let task_engine = engine.clone();
        let handled = tokio::spawn(async move { action.handle(&task_engine, &payload).await }).await;

        let dispatch = match handled {
            Ok(Ok(dispatch)) => dispatch,
            Ok(Err(err)) => {
                match err.kind() {
                    ErrorKind::Store | ErrorKind::Exhausted => error!(action = %name, "{err}"),
                    _ => debug!(action = %name, "{err}"),
                }
                connection.send(&err.to_outbound(&name));
                return;
            }
            Err(join_err) => {
                error!(action = %name, "action task failed: {join_err}");
                connection.send(&ActionError::Internal(join_err.to_string()).to_outbound(&name));
                return;
            }
        };

        for group in dispatch.subscribe {
            registry.join(group, connection);
        }
        if let Some(reply) = dispatch.reply {
            connection.send(&reply);
        }
        for (group, frame) in dispatch.publish {
            registry.publish(&group, &frame);
        }
    }
}

struct CreateRoom;

#[async_trait]
impl Action for CreateRoom {
    async fn handle(&self, engine: &Engine, _payload: &Value) -> Result<Dispatch, ActionError> {
        let room_code = engine.create_room().await?;
        Ok(Dispatch::reply(Outbound::encode("create_room", &RoomCreated { room_code })?))
    }
}

struct JoinRoom;

#[async_trait]
impl Action for JoinRoom {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let name = form.player_name();
        let (code, name) = form.finish(code.zip(name))?;

        let joined = engine.join_room(&code, &name).await?;
        let snapshot = &joined.snapshot;
        let room = GroupKey::room(&code);
        let player_joined = PlayerJoined {
            room_code: &snapshot.room_code,
            player: &joined.player,
            players: &snapshot.players,
        };

        Ok(Dispatch {
            subscribe: vec![room.clone(), GroupKey::player(joined.player.key)],
            reply: Some(Outbound::encode("join_room", snapshot)?),
            publish: vec![(room, Outbound::encode("player_joined", &player_joined)?)],
        })
    }
}

struct RejoinRoom;

#[async_trait]
impl Action for RejoinRoom {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let player = form.key("player_key");
        let (code, player) = form.finish(code.zip(player))?;

        let snapshot = engine.rejoin_room(&code, player).await?;
        Ok(Dispatch {
            subscribe: vec![GroupKey::room(&code), GroupKey::player(player)],
            reply: Some(Outbound::encode("rejoin_room", &snapshot)?),
            publish: Vec::new(),
        })
    }
}

struct SubmitCard;

#[async_trait]
impl Action for SubmitCard {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let card = form.key("card_key");
        let (code, card) = form.finish(code.zip(card))?;

        let submitted = engine.submit_card(&code, card).await?;
        let hand = HandUpdate {
            room_code: &submitted.room_code,
            hand: &submitted.hand,
        };
        let card_submitted = CardSubmitted {
            room_code: &submitted.room_code,
            submitting_player: &submitted.player,
            card: &submitted.card,
            players: &submitted.players,
            submitted_cards: &submitted.submitted_cards,
            all_players_submitted: submitted.all_players_submitted,
        };

        Ok(Dispatch {
            publish: vec![
                (GroupKey::player(submitted.player.key), Outbound::encode("submit_card", &hand)?),
                (GroupKey::room(&code), Outbound::encode("card_submitted", &card_submitted)?),
            ],
            ..Default::default()
        })
    }
}

struct PickCard;

#[async_trait]
impl Action for PickCard {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let card = form.key("card_key");
        let (code, card) = form.finish(code.zip(card))?;

        let picked = engine.pick_card(&code, card).await?;
        let card_picked = CardPicked {
            room_code: &picked.room_code,
            picked_player: &picked.winner,
            card: &picked.card,
            players: &picked.players,
        };

        let mut publish = vec![(GroupKey::room(&code), Outbound::encode("card_picked", &card_picked)?)];
        for dealt in &picked.hands {
            let new_round = NewRound {
                room_code: &picked.room_code,
                judge: &picked.judge,
                matching_card: &picked.matching_card,
                hand: &dealt.hand,
            };
            publish.push((GroupKey::player(dealt.player.key), Outbound::encode("new_round", &new_round)?));
        }

        Ok(Dispatch {
            publish,
            ..Default::default()
        })
    }
}

struct BootPlayer;

#[async_trait]
impl Action for BootPlayer {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let player = form.key("player_key");
        let (code, player) = form.finish(code.zip(player))?;

        let booted = engine.boot_player(&code, player).await?;
        let player_booted = PlayerBooted {
            room_code: &booted.room_code,
            player_name: &booted.player.name,
            players: &booted.players,
            judge: booted.judge.as_ref(),
        };

        Ok(Dispatch {
            publish: vec![(GroupKey::room(&code), Outbound::encode("player_booted", &player_booted)?)],
            ..Default::default()
        })
    }
}

struct ValidateRoomCode;

#[async_trait]
impl Action for ValidateRoomCode {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let room_code = form.finish(code)?;

        let valid = engine.validate_room_code(&room_code).await?;
        Ok(Dispatch::reply(Outbound::encode(
            "validate_room_code",
            &RoomCodeValidity { room_code, valid },
        )?))
    }
}

struct ValidatePlayerName;

#[async_trait]
impl Action for ValidatePlayerName {
    async fn handle(&self, engine: &Engine, payload: &Value) -> Result<Dispatch, ActionError> {
        let mut form = Form::new(payload);
        let code = form.room_code();
        let name = form.player_name();
        let (room_code, player_name) = form.finish(code.zip(name))?;

        let valid = engine.validate_player_name(&room_code, &player_name).await?;
        Ok(Dispatch::reply(Outbound::encode(
            "validate_player_name",
            &PlayerNameValidity {
                room_code,
                player_name,
                valid,
            },
        )?))
    }
}
