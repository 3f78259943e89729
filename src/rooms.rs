// ===============================
// src/rooms.rs
// ===============================
//
// Room membership: symbol -> set of connections, connection -> current
// symbol. An identity belongs to at most one room; joining a new room
// implicitly leaves the previous one. All mutation happens on the hub task,
// so a membership change and its notifications are atomic to observers.
//

use ahash::AHashMap as HashMap;
use std::collections::HashSet;

use crate::domain::ConnId;

#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, HashSet<ConnId>>,
    current: HashMap<ConnId, String>,
}

/// What a join did: the room that was left (with its remaining members),
/// whether the target room gained its first member, and the peers already
/// in the target room.
#[derive(Debug)]
pub struct JoinOutcome {
    pub left: Option<(String, Vec<ConnId>)>,
    pub first_member: bool,
    pub peers: Vec<ConnId>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_of(&self, conn: &str) -> Option<&str> {
        self.current.get(conn).map(|s| s.as_str())
    }

    pub fn members(&self, symbol: &str) -> Vec<ConnId> {
        self.rooms
            .get(symbol)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Audience for a broadcast: room membership minus the sender.
    pub fn peers(&self, symbol: &str, except: &str) -> Vec<ConnId> {
        self.rooms
            .get(symbol)
            .map(|set| set.iter().filter(|c| c.as_str() != except).cloned().collect())
            .unwrap_or_default()
    }

    pub fn member_count(&self, symbol: &str) -> usize {
        self.rooms.get(symbol).map(|s| s.len()).unwrap_or(0)
    }

    pub fn join(&mut self, conn: &str, symbol: &str) -> JoinOutcome {
        let left = self.leave(conn);

        let room = self.rooms.entry(symbol.to_string()).or_default();
        let first_member = room.is_empty();
        let peers: Vec<ConnId> = room.iter().cloned().collect();
        room.insert(conn.to_string());
        self.current.insert(conn.to_string(), symbol.to_string());

        JoinOutcome { left, first_member, peers }
    }

    /// Remove `conn` from its current room, if any. Returns the room and
    /// the members remaining in it.
    pub fn leave(&mut self, conn: &str) -> Option<(String, Vec<ConnId>)> {
        let symbol = self.current.remove(conn)?;
        if let Some(room) = self.rooms.get_mut(&symbol) {
            room.remove(conn);
        }
        let remaining = self.members(&symbol);
        Some((symbol, remaining))
    }
}
