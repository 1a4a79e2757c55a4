use std::{collections::HashMap, sync::Arc};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc::{self, error::TrySendError}, Mutex, RwLock};

use crate::state::{NowPlaying, PublicEntry, QueueEntry};

pub type ConnId = u64;
/// Per-connection outbound queue, drained by that connection's writer task.
pub type Outbox = mpsc::Sender<Arc<RoomEvent>>;

/// Frames a connection may have in flight before it counts as stalled.
pub const OUTBOX_CAP: usize = 100;

pub fn outbox() -> (Outbox, mpsc::Receiver<Arc<RoomEvent>>) {
    mpsc::channel(OUTBOX_CAP)
}

/* ------------ server → client frames ------------ */
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RoomEvent {
    #[serde(rename = "message", rename_all = "camelCase")]
    Chat {
        room_id:      String,
        sender_id:    String,
        display_name: String,
        content:      String,
        created_at:   DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    PlayVideo {
        room_id:          String,
        entry_id:         String,
        canonical_url:    String,
        title:            String,
        thumbnail_url:    String,
        duration_seconds: u64,
        started_at:       DateTime<Utc>,
    },
    /// `now_playing: None` tells clients the room went Idle.
    #[serde(rename_all = "camelCase")]
    QueueChanged {
        room_id:     String,
        queue:       Vec<PublicEntry>,
        now_playing: Option<PublicEntry>,
    },
    #[serde(rename_all = "camelCase")]
    MemberJoined { room_id: String, connection_id: ConnId, members: usize },
    #[serde(rename_all = "camelCase")]
    MemberLeft { room_id: String, connection_id: ConnId, members: usize },
    /// Only ever sent to the connection that caused it.
    Error { reason: String },
}

impl RoomEvent {
    pub fn play(np: &NowPlaying) -> Self {
        let e = &np.entry;
        RoomEvent::PlayVideo {
            room_id:          e.room_id.clone(),
            entry_id:         e.id.clone(),
            canonical_url:    e.canonical_url.clone(),
            title:            e.title.clone(),
            thumbnail_url:    e.thumbnail_url.clone(),
            duration_seconds: e.duration_seconds,
            started_at:       np.started_at,
        }
    }

    pub fn queue(room: &str, queue: &[QueueEntry], np: Option<&NowPlaying>) -> Self {
        RoomEvent::QueueChanged {
            room_id:     room.to_owned(),
            queue:       queue.iter().map(PublicEntry::from).collect(),
            now_playing: np.map(|n| PublicEntry::from(&n.entry)),
        }
    }
}

/// Member set of one room. `closed` is set once the last member leaves;
/// a closed set is about to be unlinked and must not take new members.
#[derive(Default)]
struct Members {
    conns:  HashMap<ConnId, Outbox>,
    closed: bool,
}

/// Room membership plus ordered fan-out.
///
/// Each room's member set sits behind its own mutex and `publish` holds it
/// for the whole fan-out, so every member sees a room's events in the order
/// `publish` was called. The room map lock is never held while waiting on a
/// member set, so rooms never wait on each other.
#[derive(Clone, Default)]
pub struct Broadcaster {
    rooms: Arc<RwLock<HashMap<String, Arc<Mutex<Members>>>>>,
}

impl Broadcaster {
    pub fn new() -> Self { Self::default() }

    /// Idempotent. Announces `member-joined` only for a new member.
    pub async fn join(&self, room: &str, conn: ConnId, outbox: Outbox) -> bool {
        let (fresh, count) = loop {
            let set = self.rooms.write().await.entry(room.to_owned()).or_default().clone();
            let mut members = set.lock().await;
            if members.closed {
                // lost the race with the last leave; unlink it ourselves and retry
                drop(members);
                self.unlink(room, &set).await;
                continue;
            }
            let fresh = members.conns.insert(conn, outbox).is_none();
            break (fresh, members.conns.len());
        };
        if fresh {
            tracing::debug!(room, conn, members = count, "member joined");
            self.publish(room, RoomEvent::MemberJoined {
                room_id: room.to_owned(), connection_id: conn, members: count,
            }).await;
        }
        fresh
    }

    pub async fn leave(&self, room: &str, conn: ConnId) -> bool {
        let Some(set) = self.rooms.read().await.get(room).cloned() else { return false };
        let (gone, count) = {
            let mut members = set.lock().await;
            let gone = members.conns.remove(&conn).is_some();
            let count = members.conns.len();
            if count == 0 {
                members.closed = true;
            }
            (gone, count)
        };
        if count == 0 {
            self.unlink(room, &set).await;
        }
        if !gone {
            return false;
        }
        tracing::debug!(room, conn, members = count, "member left");
        self.publish(room, RoomEvent::MemberLeft {
            room_id: room.to_owned(), connection_id: conn, members: count,
        }).await;
        true
    }

    /// Drop `set` from the map, unless a newer set already replaced it.
    async fn unlink(&self, room: &str, set: &Arc<Mutex<Members>>) {
        let mut m = self.rooms.write().await;
        if m.get(room).is_some_and(|cur| Arc::ptr_eq(cur, set)) {
            m.remove(room);
        }
    }

    /// Leave every room `conn` is in. Returns those rooms.
    pub async fn disconnect(&self, conn: ConnId) -> Vec<String> {
        let mut rooms = vec![];
        let candidates: Vec<_> = self.rooms.read().await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (room, set) in candidates {
            if set.lock().await.conns.contains_key(&conn) {
                rooms.push(room);
            }
        }
        for room in &rooms {
            self.leave(room, conn).await;
        }
        rooms
    }

    /// Fan `event` out to the room's current members; returns how many took it.
    /// Never waits on a member: one whose socket went away, or whose outbox
    /// is full because it stopped reading, is dropped from the room.
    pub async fn publish(&self, room: &str, event: RoomEvent) -> usize {
        let Some(set) = self.rooms.read().await.get(room).cloned() else { return 0 };
        let event = Arc::new(event);
        let mut members = set.lock().await;
        let mut delivered = 0;
        let mut evicted = vec![];
        for (conn, outbox) in members.conns.iter() {
            match outbox.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(room, conn, "outbox full, dropping stalled member");
                    evicted.push(*conn);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(room, conn, "dropped event for closed connection");
                    evicted.push(*conn);
                }
            }
        }
        for conn in evicted {
            members.conns.remove(&conn);
        }
        delivered
    }

    pub async fn members(&self, room: &str) -> usize {
        let set = self.rooms.read().await.get(room).cloned();
        match set {
            Some(set) => set.lock().await.conns.len(),
            None      => 0,
        }
    }
}

#[cfg(test)]
pub(crate) fn drain(rx: &mut mpsc::Receiver<Arc<RoomEvent>>) -> Vec<RoomEvent> {
    let mut out = vec![];
    while let Ok(ev) = rx.try_recv() {
        out.push((*ev).clone());
    }
    out
}
