//! Fan-out groups of live connections.
//!
//! A group is either a whole room (`room:<code>`) or every connection bound
//! to one player (`player:<id>`). Delivery is fire and forget: each connection
//! owns one unbounded queue, so frames reach a connection in the order they
//! were published to it, and a connection that is gone simply misses them.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use super::msg::Outbound;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    Room(String),
    Player(i64),
}

impl GroupKey {
    pub fn room(code: impl Into<String>) -> Self {
        GroupKey::Room(code.into())
    }

    pub fn player(player_id: i64) -> Self {
        GroupKey::Player(player_id)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GroupKey::Room(code) => write!(f, "room:{code}"),
            GroupKey::Player(player_id) => write!(f, "player:{player_id}"),
        }
    }
}

/// Handle to one client's outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    outbox: mpsc::UnboundedSender<String>,
}

impl Connection {
    pub fn open() -> (Connection, mpsc::UnboundedReceiver<String>) {
        let (outbox, inbox) = mpsc::unbounded_channel();
        (Connection { id: Uuid::now_v7(), outbox }, inbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an already encoded frame. False once the client is gone.
    pub fn send_text(&self, frame: String) -> bool {
        self.outbox.send(frame).is_ok()
    }

    pub fn send(&self, frame: &Outbound) -> bool {
        self.send_text(frame.to_text())
    }
}

#[derive(Debug, Default)]
pub struct Registry {
    groups: DashMap<GroupKey, HashMap<ConnectionId, Connection>>,
    memberships: DashMap<ConnectionId, HashSet<GroupKey>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, group: GroupKey, connection: &Connection) {
        self.memberships
            .entry(connection.id)
            .or_default()
            .insert(group.clone());
        trace!(connection = %connection.id, %group, "joined group");
        self.groups
            .entry(group)
            .or_default()
            .insert(connection.id, connection.clone());
    }

    pub fn leave(&self, group: &GroupKey, connection_id: ConnectionId) {
        if let Some(mut groups) = self.memberships.get_mut(&connection_id) {
            groups.remove(group);
        }
        self.memberships.remove_if(&connection_id, |_, groups| groups.is_empty());
        self.remove_member(group, connection_id);
    }

    /// Drops the connection from every group it joined.
    pub fn leave_all(&self, connection_id: ConnectionId) {
        let Some((_, groups)) = self.memberships.remove(&connection_id) else {
            return;
        };
        for group in &groups {
            self.remove_member(group, connection_id);
        }
    }

    fn remove_member(&self, group: &GroupKey, connection_id: ConnectionId) {
        if let Some(mut members) = self.groups.get_mut(group) {
            members.remove(&connection_id);
        }
        self.groups.remove_if(group, |_, members| members.is_empty());
    }

    /// Delivers `frame` to everyone in `group` right now. Returns how many
    /// connections it was queued for.
    pub fn publish(&self, group: &GroupKey, frame: &Outbound) -> usize {
        let Some(members) = self.groups.get(group) else {
            return 0;
        };
        let text = frame.to_text();
        let delivered = members
            .values()
            .filter(|connection| connection.send_text(text.clone()))
            .count();
        trace!(%group, delivered, "published");
        delivered
    }

    pub fn members(&self, group: &GroupKey) -> usize {
        self.groups.get(group).map_or(0, |members| members.len())
    }
}
