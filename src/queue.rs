use std::sync::Arc;
use crate::{
    error::{bad, AppResult},
    state::{NewEntry, QueueEntry},
    store::RoomStore,
};

/// Room-scoped FIFO over the shared store.
#[derive(Clone)]
pub struct VideoQueue {
    store: Arc<dyn RoomStore>,
}

impl VideoQueue {
    pub fn new(store: Arc<dyn RoomStore>) -> Self { Self { store } }

    pub async fn enqueue(&self, room: &str, new: NewEntry) -> AppResult<QueueEntry> {
        if new.canonical_url.trim().is_empty() {
            return Err(bad("video url is empty"));
        }
        let position = self.store.incr(room).await?;
        let entry = QueueEntry {
            id:               uuid::Uuid::new_v4().to_string(),
            room_id:          room.to_owned(),
            canonical_url:    new.canonical_url,
            title:            new.title,
            thumbnail_url:    new.thumbnail_url,
            duration_seconds: new.duration_seconds,
            requester_id:     new.requester_id,
            requester_name:   new.requester_name,
            position,
        };
        self.store.push_back(room, entry.clone()).await?;
        Ok(entry)
    }

    pub async fn dequeue_head(&self, room: &str) -> AppResult<Option<QueueEntry>> {
        self.store.pop_front(room).await
    }

    /// `false` when the id is not queued; the rest keep their order.
    pub async fn remove(&self, room: &str, id: &str) -> AppResult<bool> {
        Ok(self.store.remove_where(room, &|e: &QueueEntry| e.id == id).await? > 0)
    }

    pub async fn list_ordered(&self, room: &str) -> AppResult<Vec<QueueEntry>> {
        let mut list = self.store.list(room).await?;
        list.sort_by_key(|e| e.position);
        Ok(list)
    }
}

#[cfg(test)]
pub(crate) fn new_entry(url: &str, secs: u64) -> NewEntry {
    NewEntry {
        canonical_url:    url.into(),
        title:            format!("title of {url}"),
        thumbnail_url:    String::new(),
        duration_seconds: secs,
        requester_id:     "u1".into(),
        requester_name:   "alice".into(),
    }
}
