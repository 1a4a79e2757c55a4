use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    broadcast::{Broadcaster, RoomEvent},
    db::{self, ChatMessage},
    error::{bad, AppResult},
    utils::jwt,
};

pub const MAX_LEN: usize = 2_000;

/// Verify → stamp → persist → fan out.
///
/// The timestamp is ours, not the client's. A failed insert is logged and
/// the message still goes out live.
pub async fn submit(
    pool: &SqlitePool, bus: &Broadcaster, secret: &str,
    room: &str, token: &str, display_name: &str, content: &str,
) -> AppResult<ChatMessage> {
    let sender = jwt::verify(token, secret)?;
    let content = content.trim();
    if content.is_empty() {
        return Err(bad("empty message"));
    }
    if content.chars().count() > MAX_LEN {
        return Err(bad(format!("message longer than {MAX_LEN} characters")));
    }
    let display_name = match display_name.trim() {
        "" => sender.clone(),
        n  => n.to_owned(),
    };

    let msg = ChatMessage {
        room_id: room.to_owned(),
        sender_id: sender,
        display_name,
        content: content.to_owned(),
        created_at: Utc::now(),
    };
    if let Err(e) = db::insert_message(pool, &msg).await {
        tracing::warn!(room, error = %e, "chat not persisted, delivering anyway");
    }
    bus.publish(room, RoomEvent::Chat {
        room_id:      msg.room_id.clone(),
        sender_id:    msg.sender_id.clone(),
        display_name: msg.display_name.clone(),
        content:      msg.content.clone(),
        created_at:   msg.created_at,
    }).await;
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::{broadcast::{drain, outbox}, error::AppErr};

    const SECRET: &str = "chat-secret";

    fn token(uid: &str) -> String { jwt::sign(uid, SECRET, Duration::from_secs(60)).unwrap() }

    #[tokio::test]
    async fn persists_and_broadcasts_with_server_time() {
        let pool = db::memory_pool().await;
        let bus = Broadcaster::new();
        let (tx, mut rx) = outbox();
        bus.join("r1", 1, tx).await;
        drain(&mut rx);

        let before = Utc::now();
        let msg = submit(&pool, &bus, SECRET, "r1", &token("u1"), "Testing1", " hello ").await.unwrap();
        assert!(msg.created_at >= before);
        assert_eq!(msg.content, "hello");

        assert_eq!(drain(&mut rx), [RoomEvent::Chat {
            room_id: "r1".into(), sender_id: "u1".into(), display_name: "Testing1".into(),
            content: "hello".into(), created_at: msg.created_at,
        }]);
        let saved = db::recent_messages(&pool, "r1", 10).await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!((saved[0].sender_id.as_str(), saved[0].content.as_str()), ("u1", "hello"));
    }

    #[tokio::test]
    async fn bad_token_fails_fast_and_sends_nothing() {
        let pool = db::memory_pool().await;
        let bus = Broadcaster::new();
        let (tx, mut rx) = outbox();
        bus.join("r1", 1, tx).await;
        drain(&mut rx);

        let err = submit(&pool, &bus, SECRET, "r1", "nope", "x", "hi").await.unwrap_err();
        assert!(matches!(err, AppErr::Unauthorized(_)));
        assert!(drain(&mut rx).is_empty());
        assert!(db::recent_messages(&pool, "r1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_rejected() {
        let pool = db::memory_pool().await;
        let bus = Broadcaster::new();
        let err = submit(&pool, &bus, SECRET, "r1", &token("u1"), "x", "   ").await.unwrap_err();
        assert!(matches!(err, AppErr::Bad(_)));
    }

    #[tokio::test]
    async fn store_failure_still_delivers() {
        let pool = db::memory_pool().await;
        sqlx::query("DROP TABLE messages").execute(&pool).await.unwrap();
        let bus = Broadcaster::new();
        let (tx, mut rx) = outbox();
        bus.join("r1", 1, tx).await;
        drain(&mut rx);

        let msg = submit(&pool, &bus, SECRET, "r1", &token("u1"), "", "still live").await.unwrap();
        assert_eq!(msg.display_name, "u1");
        assert_eq!(drain(&mut rx).len(), 1);
    }
}
