use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A serialized event, shared by every connection it is fanned out to.
pub type Payload = Arc<str>;

/// Identity of one live connection. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

type RoomSet = HashMap<ConnectionId, mpsc::UnboundedSender<Payload>>;

/// Process-local index of chat room -> live connections.
///
/// Each connection is represented by the sending half of its outbound
/// queue. Nothing here is persisted; a restart starts from empty. Fan-out
/// does not cross process boundaries.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    rooms: RwLock<HashMap<i64, RoomSet>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the room if needed.
    pub fn register(&self, room_id: i64, conn_id: ConnectionId, tx: mpsc::UnboundedSender<Payload>) {
        self.write_rooms().entry(room_id).or_default().insert(conn_id, tx);
        debug!("Connection {} joined room {}", conn_id, room_id);
    }

    /// Remove a connection. Returns false when it was not registered.
    pub fn unregister(&self, room_id: i64, conn_id: ConnectionId) -> bool {
        let mut rooms = self.write_rooms();
        let Some(room) = rooms.get_mut(&room_id) else {
            return false;
        };
        let removed = room.remove(&conn_id).is_some();
        if room.is_empty() {
            rooms.remove(&room_id);
        }
        if removed {
            debug!("Connection {} left room {}", conn_id, room_id);
        }
        removed
    }

    /// Create an outbound queue, register it, and return a guard that
    /// unregisters on drop together with the receiving half.
    pub fn join(&self, room_id: i64) -> (Registration, mpsc::UnboundedReceiver<Payload>) {
        let conn_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(room_id, conn_id, tx);
        let registration = Registration {
            registry: self.clone(),
            room_id,
            conn_id,
        };
        (registration, rx)
    }

    /// Send `payload` to every connection in the room except `exclude`.
    /// Connections whose queue is closed are evicted. Returns the number
    /// of connections the payload was queued for.
    pub fn broadcast(&self, room_id: i64, payload: Payload, exclude: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        let mut stale = Vec::new();

        {
            let rooms = self.read_rooms();
            let Some(room) = rooms.get(&room_id) else {
                return 0;
            };
            for (conn_id, tx) in room {
                if Some(*conn_id) == exclude {
                    continue;
                }
                if tx.send(payload.clone()).is_ok() {
                    delivered += 1;
                } else {
                    stale.push(*conn_id);
                }
            }
        }

        for conn_id in stale {
            debug!("Evicting stale connection {} from room {}", conn_id, room_id);
            self.unregister(room_id, conn_id);
        }

        delivered
    }

    pub fn room_size(&self, room_id: i64) -> usize {
        self.read_rooms().get(&room_id).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.read_rooms().len()
    }

    // Sections under these locks never panic, so a poisoned lock still holds
    // a consistent map.
    fn read_rooms(&self) -> std::sync::RwLockReadGuard<'_, HashMap<i64, RoomSet>> {
        self.inner.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rooms(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<i64, RoomSet>> {
        self.inner.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Membership of one connection in one room. Dropping it unregisters.
pub struct Registration {
    registry: ConnectionRegistry,
    room_id: i64,
    conn_id: ConnectionId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn room_id(&self) -> i64 {
        self.room_id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.room_id, self.conn_id);
    }
}
