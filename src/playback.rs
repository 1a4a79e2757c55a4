//! Playback coordinator: the Idle ⇄ Playing state machine of a room.
//!
//! Nothing here locks. Callers must run at most one of these operations per
//! room at a time; `room.rs` guarantees that by funnelling them through a
//! single owner task per room.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::{
    broadcast::{Broadcaster, ConnId, Outbox, RoomEvent},
    db,
    error::AppResult,
    queue::VideoQueue,
    state::{NewEntry, NowPlaying, QueueEntry, RoomSnapshot},
    store::RoomStore,
};

/// What the caller believes about the room when asking to advance.
#[derive(Clone, Debug, PartialEq)]
pub enum Expect {
    /// Only start something if nothing is playing (enqueue auto-start).
    Idle,
    /// The named entry finished. Stale if another entry is current by now.
    Finished(String),
    /// Skip whatever is current.
    Any,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transition {
    Started(NowPlaying),
    Idled,
    Unchanged,
}

#[derive(Clone)]
pub struct Playback {
    store: Arc<dyn RoomStore>,
    queue: VideoQueue,
    bus:   Broadcaster,
    pool:  SqlitePool,
}

impl Playback {
    pub fn new(store: Arc<dyn RoomStore>, bus: Broadcaster, pool: SqlitePool) -> Self {
        Self { queue: VideoQueue::new(store.clone()), store, bus, pool }
    }

    pub async fn advance(&self, room: &str, expect: Expect) -> AppResult<Transition> {
        let current = self.store.now_playing(room).await?;
        let go = match (&expect, &current) {
            (Expect::Any, _)                 => true,
            (Expect::Idle, cur)              => cur.is_none(),
            (Expect::Finished(id), Some(np)) => np.entry.id == *id,
            (Expect::Finished(_), None)      => true,
        };
        if !go {
            tracing::debug!(room, ?expect, "advance skipped, state moved on");
            return Ok(Transition::Unchanged);
        }

        match self.queue.dequeue_head(room).await? {
            Some(entry) => {
                let np = NowPlaying::start(entry);
                self.store.set_now_playing(room, Some(np.clone())).await?;
                tracing::info!(room, entry = %np.entry.id, url = %np.entry.canonical_url, "now playing");

                if let Err(e) = db::set_room_thumbnail(&self.pool, room, &np.entry.thumbnail_url).await {
                    tracing::warn!(room, error = %e, "room thumbnail not updated");
                }
                self.bus.publish(room, RoomEvent::play(&np)).await;
                self.announce(room, Some(&np)).await?;
                Ok(Transition::Started(np))
            }
            None if current.is_some() => {
                self.store.set_now_playing(room, None).await?;
                tracing::info!(room, "queue drained, room idle");
                self.announce(room, None).await?;
                Ok(Transition::Idled)
            }
            None => Ok(Transition::Unchanged),
        }
    }

    /// Advance if the current item ran past its duration. Uses the same
    /// path as a client's end-of-playback signal.
    pub async fn check_drift(&self, room: &str, now: DateTime<Utc>) -> AppResult<Transition> {
        match self.store.now_playing(room).await? {
            Some(np) if np.is_due(now) => {
                tracing::debug!(room, entry = %np.entry.id, elapsed = np.elapsed_secs(now), "drift advance");
                self.advance(room, Expect::Finished(np.entry.id)).await
            }
            _ => Ok(Transition::Unchanged),
        }
    }

    /// Drift-advance until the current item is not yet due. Each round pops
    /// an entry, so this ends within the queue's length.
    pub async fn settle(&self, room: &str) -> AppResult<()> {
        while self.check_drift(room, Utc::now()).await? != Transition::Unchanged {}
        Ok(())
    }

    /// Subscribe `conn` to the room and hand it the current state. Runs in
    /// the owner, so no later playback event can overtake the welcome.
    pub async fn welcome(&self, room: &str, conn: ConnId, outbox: Outbox) -> AppResult<()> {
        self.settle(room).await?;
        self.bus.join(room, conn, outbox.clone()).await;
        let snap = self.snapshot(room).await?;
        let mut frames = vec![RoomEvent::queue(room, &snap.queue, snap.now_playing.as_ref())];
        frames.extend(snap.now_playing.as_ref().map(RoomEvent::play));
        for ev in frames {
            if outbox.try_send(Arc::new(ev)).is_err() {
                tracing::debug!(room, conn, "welcome frame dropped");
            }
        }
        Ok(())
    }

    /// Append, then start it right away if the room was Idle.
    pub async fn enqueue(&self, room: &str, new: NewEntry) -> AppResult<QueueEntry> {
        let entry = self.queue.enqueue(room, new).await?;
        tracing::debug!(room, entry = %entry.id, position = entry.position, "queued");
        if self.advance(room, Expect::Idle).await? == Transition::Unchanged {
            let np = self.store.now_playing(room).await?;
            self.announce(room, np.as_ref()).await?;
        }
        Ok(entry)
    }

    pub async fn remove(&self, room: &str, id: &str) -> AppResult<bool> {
        let removed = self.queue.remove(room, id).await?;
        if removed {
            let np = self.store.now_playing(room).await?;
            self.announce(room, np.as_ref()).await?;
        }
        Ok(removed)
    }

    pub async fn snapshot(&self, room: &str) -> AppResult<RoomSnapshot> {
        Ok(RoomSnapshot {
            queue:       self.queue.list_ordered(room).await?,
            now_playing: self.store.now_playing(room).await?,
        })
    }

    pub async fn forget(&self, room: &str) -> AppResult<()> {
        self.store.drop_room(room).await
    }

    async fn announce(&self, room: &str, np: Option<&NowPlaying>) -> AppResult<()> {
        let queue = self.queue.list_ordered(room).await?;
        self.bus.publish(room, RoomEvent::queue(room, &queue, np)).await;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn fixture() -> (Playback, Arc<crate::store::MemoryStore>, Broadcaster, SqlitePool) {
    let store = Arc::new(crate::store::MemoryStore::new());
    let bus = Broadcaster::new();
    let pool = db::memory_pool().await;
    (Playback::new(store.clone(), bus.clone(), pool.clone()), store, bus, pool)
}
