use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/* ------------ 佇列項目 ------------ */
/// One pending video in a room's queue. `position` is the per-room ordering
/// key: strictly increasing, never handed out twice.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id:               String,
    pub room_id:          String,
    pub canonical_url:    String,
    pub title:            String,
    pub thumbnail_url:    String,
    pub duration_seconds: u64,
    pub requester_id:     String,
    pub requester_name:   String,
    pub position:         u64,
}

/// An entry before the queue has given it an id and a position.
#[derive(Clone, Debug)]
pub struct NewEntry {
    pub canonical_url:    String,
    pub title:            String,
    pub thumbnail_url:    String,
    pub duration_seconds: u64,
    pub requester_id:     String,
    pub requester_name:   String,
}

/// What the queue endpoints and `queue-changed` frames expose.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicEntry {
    pub id:            String,
    pub canonical_url: String,
    pub title:         String,
    pub thumbnail_url: String,
    pub requester:     String,
}

impl From<&QueueEntry> for PublicEntry {
    fn from(e: &QueueEntry) -> Self {
        Self {
            id:            e.id.clone(),
            canonical_url: e.canonical_url.clone(),
            title:         e.title.clone(),
            thumbnail_url: e.thumbnail_url.clone(),
            requester:     e.requester_name.clone(),
        }
    }
}

/* ------------ 播放狀態 ------------ */
/// The room's playback record. Absent ⇔ the room is Idle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub entry:      QueueEntry,
    pub started_at: DateTime<Utc>,
}

impl NowPlaying {
    pub fn start(entry: QueueEntry) -> Self {
        Self { entry, started_at: Utc::now() }
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds().max(0)
    }

    /// Zero duration means the resolver never told us, so the item is
    /// skipped on the next check instead of wedging the room.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        let len_ms = i64::try_from(self.entry.duration_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000);
        self.entry.duration_seconds == 0 || (now - self.started_at).num_milliseconds() >= len_ms
    }
}

/// Consistent view of one room: queue in position order plus the current item.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoomSnapshot {
    pub queue:       Vec<QueueEntry>,
    pub now_playing: Option<NowPlaying>,
}

#[cfg(test)]
pub(crate) fn entry(id: &str, pos: u64, secs: u64) -> QueueEntry {
    QueueEntry {
        id:               id.into(),
        room_id:          "r1".into(),
        canonical_url:    format!("https://www.youtube.com/watch?v={id}"),
        title:            format!("video {id}"),
        thumbnail_url:    format!("https://img.youtube.com/vi/{id}/hqdefault.jpg"),
        duration_seconds: secs,
        requester_id:     "u1".into(),
        requester_name:   "alice".into(),
        position:         pos,
    }
}
