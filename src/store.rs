//! Shared room state store.
//!
//! Keyed by room id, each slot is a list (the queue), a counter (the next
//! insertion position) and one optional field (the playback record). The
//! shape follows what a cache service offers (`INCR`, `RPUSH`, `LPOP`,
//! `LREM`, `HGET`/`HSET`), so a networked backend can stand in for
//! [`MemoryStore`] without touching callers. Every single call is atomic;
//! multi-step sequences are serialized by the room owner in `room.rs`.

use std::{collections::{HashMap, VecDeque}, sync::Arc};
use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::{error::AppResult, state::{NowPlaying, QueueEntry}};

pub type EntryFilter<'a> = &'a (dyn Fn(&QueueEntry) -> bool + Send + Sync);

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Bumps and returns the room's position counter (first call → 1).
    async fn incr(&self, room: &str) -> AppResult<u64>;
    async fn push_back(&self, room: &str, entry: QueueEntry) -> AppResult<()>;
    async fn pop_front(&self, room: &str) -> AppResult<Option<QueueEntry>>;
    /// Removes every matching entry, returns how many went.
    async fn remove_where(&self, room: &str, filter: EntryFilter<'_>) -> AppResult<usize>;
    async fn list(&self, room: &str) -> AppResult<Vec<QueueEntry>>;
    async fn now_playing(&self, room: &str) -> AppResult<Option<NowPlaying>>;
    async fn set_now_playing(&self, room: &str, np: Option<NowPlaying>) -> AppResult<()>;
    /// Forget everything about a room.
    async fn drop_room(&self, room: &str) -> AppResult<()>;
}

#[derive(Default)]
struct Slot {
    queue:   VecDeque<QueueEntry>,
    seq:     u64,
    playing: Option<NowPlaying>,
}

/// In-process backend. Restart loses everything, which is fine: rooms come
/// back Idle and the next enqueue restarts playback.
///
/// Each room's slot has its own mutex; the map lock is only held to find
/// or create a slot, so rooms never wait on each other.
#[derive(Clone, Default)]
pub struct MemoryStore {
    slots: Arc<RwLock<HashMap<String, Arc<Mutex<Slot>>>>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    async fn slot(&self, room: &str) -> Arc<Mutex<Slot>> {
        if let Some(s) = self.existing(room).await {
            return s;
        }
        self.slots.write().await.entry(room.to_owned()).or_default().clone()
    }

    async fn existing(&self, room: &str) -> Option<Arc<Mutex<Slot>>> {
        self.slots.read().await.get(room).cloned()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn incr(&self, room: &str) -> AppResult<u64> {
        let slot = self.slot(room).await;
        let mut slot = slot.lock().await;
        slot.seq += 1;
        Ok(slot.seq)
    }

    async fn push_back(&self, room: &str, entry: QueueEntry) -> AppResult<()> {
        self.slot(room).await.lock().await.queue.push_back(entry);
        Ok(())
    }

    async fn pop_front(&self, room: &str) -> AppResult<Option<QueueEntry>> {
        Ok(match self.existing(room).await {
            Some(slot) => slot.lock().await.queue.pop_front(),
            None       => None,
        })
    }

    async fn remove_where(&self, room: &str, filter: EntryFilter<'_>) -> AppResult<usize> {
        let Some(slot) = self.existing(room).await else { return Ok(0) };
        let mut slot = slot.lock().await;
        let before = slot.queue.len();
        slot.queue.retain(|e| !filter(e));
        Ok(before - slot.queue.len())
    }

    async fn list(&self, room: &str) -> AppResult<Vec<QueueEntry>> {
        Ok(match self.existing(room).await {
            Some(slot) => slot.lock().await.queue.iter().cloned().collect(),
            None       => vec![],
        })
    }

    async fn now_playing(&self, room: &str) -> AppResult<Option<NowPlaying>> {
        Ok(match self.existing(room).await {
            Some(slot) => slot.lock().await.playing.clone(),
            None       => None,
        })
    }

    async fn set_now_playing(&self, room: &str, np: Option<NowPlaying>) -> AppResult<()> {
        self.slot(room).await.lock().await.playing = np;
        Ok(())
    }

    async fn drop_room(&self, room: &str) -> AppResult<()> {
        self.slots.write().await.remove(room);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::entry;

    #[tokio::test]
    async fn counter_is_per_room_and_monotonic() {
        let s = MemoryStore::new();
        assert_eq!(s.incr("a").await.unwrap(), 1);
        assert_eq!(s.incr("a").await.unwrap(), 2);
        assert_eq!(s.incr("b").await.unwrap(), 1);
        s.pop_front("a").await.unwrap();
        assert_eq!(s.incr("a").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn list_pop_remove() {
        let s = MemoryStore::new();
        for (i, id) in ["x", "y", "z"].iter().enumerate() {
            s.push_back("r1", entry(id, i as u64 + 1, 10)).await.unwrap();
        }
        assert_eq!(s.remove_where("r1", &|e: &QueueEntry| e.id == "y").await.unwrap(), 1);
        assert_eq!(s.remove_where("r1", &|e: &QueueEntry| e.id == "nope").await.unwrap(), 0);
        assert_eq!(s.pop_front("r1").await.unwrap().unwrap().id, "x");
        let left: Vec<_> = s.list("r1").await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(left, ["z"]);
        assert!(s.pop_front("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn playback_field_and_drop() {
        let s = MemoryStore::new();
        assert!(s.now_playing("r1").await.unwrap().is_none());
        let np = NowPlaying::start(entry("a", 1, 10));
        s.set_now_playing("r1", Some(np.clone())).await.unwrap();
        assert_eq!(s.now_playing("r1").await.unwrap(), Some(np));
        s.drop_room("r1").await.unwrap();
        assert!(s.now_playing("r1").await.unwrap().is_none());
        assert_eq!(s.incr("r1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn busy_room_does_not_block_another() {
        let s = MemoryStore::new();
        s.push_back("a", entry("x", 1, 10)).await.unwrap();
        let slot = s.slot("a").await;
        let _held = slot.lock().await;
        let other = tokio::time::timeout(std::time::Duration::from_secs(1), s.incr("b")).await;
        assert_eq!(other.expect("room b waited on room a").unwrap(), 1);
    }
}
