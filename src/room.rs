//! One owner task per room.
//!
//! Every queue mutation, advance and snapshot for a room is a message in
//! that room's mailbox; the owner applies them one at a time. That is the
//! whole concurrency story: no two advances for a room overlap, a removal
//! can never race the pop of the same entry, and distinct rooms never wait
//! on each other.

use std::{collections::{HashMap, HashSet}, sync::Arc};
use tokio::sync::{mpsc, oneshot, RwLock};

use crate::{
    broadcast::{ConnId, Outbox},
    error::{AppErr, AppResult},
    playback::{Expect, Playback, Transition},
    state::{NewEntry, QueueEntry, RoomSnapshot},
};

const MAILBOX: usize = 256;

type Reply<T> = oneshot::Sender<AppResult<T>>;

pub enum RoomCmd {
    Enqueue  { entry: NewEntry, reply: Reply<QueueEntry> },
    Remove   { id: String, reply: Reply<bool> },
    Advance  { expect: Expect, reply: Reply<Transition> },
    Snapshot { reply: Reply<RoomSnapshot> },
    /// Subscribe a connection and send it the current state.
    Welcome  { conn: ConnId, outbox: Outbox, reply: Reply<()> },
    /// Timer tick. Fire-and-forget.
    Drift,
    Close,
}

#[derive(Clone)]
pub struct RoomHandle {
    room: String,
    tx:   mpsc::Sender<RoomCmd>,
}

impl RoomHandle {
    async fn ask<T>(&self, make: impl FnOnce(Reply<T>) -> RoomCmd) -> AppResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.map_err(|_| AppErr::RoomGone(self.room.clone()))?;
        rx.await.map_err(|_| AppErr::RoomGone(self.room.clone()))?
    }

    pub async fn enqueue(&self, entry: NewEntry) -> AppResult<QueueEntry> {
        self.ask(|reply| RoomCmd::Enqueue { entry, reply }).await
    }

    pub async fn remove(&self, id: &str) -> AppResult<bool> {
        let id = id.to_owned();
        self.ask(|reply| RoomCmd::Remove { id, reply }).await
    }

    pub async fn advance(&self, expect: Expect) -> AppResult<Transition> {
        self.ask(|reply| RoomCmd::Advance { expect, reply }).await
    }

    /// Runs drift checks first, so an expired item is never observed.
    pub async fn snapshot(&self) -> AppResult<RoomSnapshot> {
        self.ask(|reply| RoomCmd::Snapshot { reply }).await
    }

    pub async fn welcome(&self, conn: ConnId, outbox: Outbox) -> AppResult<()> {
        self.ask(|reply| RoomCmd::Welcome { conn, outbox, reply }).await
    }

    /// Non-blocking; a full mailbox just means the next tick will try again.
    pub fn poke_drift(&self) {
        if self.tx.try_send(RoomCmd::Drift).is_err() {
            tracing::debug!(room = %self.room, "mailbox busy, drift tick skipped");
        }
    }
}

#[derive(Default)]
struct Registry {
    live:   HashMap<String, RoomHandle>,
    /// Deleted rooms. Ids are never reused, so these stay closed for good.
    closed: HashSet<String>,
}

/// 房間表：room id → owner handle，按需啟動
#[derive(Clone)]
pub struct Rooms {
    reg:      Arc<RwLock<Registry>>,
    playback: Playback,
}

impl Rooms {
    pub fn new(playback: Playback) -> Self {
        Self { reg: Arc::default(), playback }
    }

    /// Handle for `room`, spawning its owner on first use or after it died.
    pub async fn get(&self, room: &str) -> AppResult<RoomHandle> {
        if let Some(h) = self.reg.read().await.live.get(room) {
            if !h.tx.is_closed() {
                return Ok(h.clone());
            }
        }
        let mut reg = self.reg.write().await;
        if reg.closed.contains(room) {
            return Err(AppErr::NotFound(format!("Room {room} doesn't exist")));
        }
        match reg.live.get(room) {
            Some(h) if !h.tx.is_closed() => return Ok(h.clone()),
            Some(_) => tracing::error!(room, "room owner died, restarting it"),
            None => {}
        }
        let h = spawn(room.to_owned(), self.playback.clone());
        reg.live.insert(room.to_owned(), h.clone());
        Ok(h)
    }

    pub async fn handles(&self) -> Vec<RoomHandle> {
        self.reg.read().await.live.values().cloned().collect()
    }

    /// Stop the owner, forget the room's queue and playback state, and
    /// refuse to start it again.
    pub async fn close(&self, room: &str) {
        let handle = {
            let mut reg = self.reg.write().await;
            reg.closed.insert(room.to_owned());
            reg.live.remove(room)
        };
        let stopped = match handle {
            Some(h) => h.tx.send(RoomCmd::Close).await.is_ok(),
            None    => false,
        };
        if !stopped {
            if let Err(e) = self.playback.forget(room).await {
                tracing::warn!(room, error = %e, "could not clear room state");
            }
        }
    }
}

fn spawn(room: String, playback: Playback) -> RoomHandle {
    let (tx, rx) = mpsc::channel(MAILBOX);
    tracing::info!(room = %room, "room owner started");
    tokio::spawn(run(room.clone(), rx, playback));
    RoomHandle { room, tx }
}

async fn run(room: String, mut rx: mpsc::Receiver<RoomCmd>, pb: Playback) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCmd::Enqueue { entry, reply } => {
                let _ = reply.send(pb.enqueue(&room, entry).await);
            }
            RoomCmd::Remove { id, reply } => {
                let _ = reply.send(pb.remove(&room, &id).await);
            }
            RoomCmd::Advance { expect, reply } => {
                let _ = reply.send(pb.advance(&room, expect).await);
            }
            RoomCmd::Snapshot { reply } => {
                let out = match pb.settle(&room).await {
                    Ok(())  => pb.snapshot(&room).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(out);
            }
            RoomCmd::Welcome { conn, outbox, reply } => {
                let _ = reply.send(pb.welcome(&room, conn, outbox).await);
            }
            RoomCmd::Drift => {
                if let Err(e) = pb.settle(&room).await {
                    tracing::warn!(room = %room, error = %e, "drift check failed");
                }
            }
            RoomCmd::Close => {
                if let Err(e) = pb.forget(&room).await {
                    tracing::warn!(room = %room, error = %e, "could not clear room state");
                }
                break;
            }
        }
    }
    tracing::info!(room = %room, "room owner stopped");
}
