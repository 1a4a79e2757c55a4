use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use crate::error::AppResult;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id        TEXT PRIMARY KEY,
        email     TEXT NOT NULL UNIQUE,
        username  TEXT NOT NULL,
        password  TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS rooms (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        description   TEXT NOT NULL DEFAULT '',
        thumbnail_url TEXT NOT NULL DEFAULT '',
        creator_id    TEXT,
        created_at    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id      TEXT NOT NULL,
        sender_id    TEXT NOT NULL,
        display_name TEXT NOT NULL,
        content      TEXT NOT NULL,
        created_at   TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS messages_by_room ON messages (room_id, id)",
];

pub async fn init(pool: &SqlitePool) -> AppResult<()> {
    for stmt in SCHEMA {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id:            String,
    pub name:          String,
    pub description:   String,
    pub thumbnail_url: String,
    pub creator_id:    Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id:      String,
    pub sender_id:    String,
    pub display_name: String,
    pub content:      String,
    pub created_at:   DateTime<Utc>,
}

/// 播放換片時順便換房間縮圖
pub async fn set_room_thumbnail(pool: &SqlitePool, room: &str, url: &str) -> AppResult<()> {
    sqlx::query("UPDATE rooms SET thumbnail_url = ? WHERE id = ?")
        .bind(url)
        .bind(room)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn insert_message(pool: &SqlitePool, m: &ChatMessage) -> AppResult<()> {
    sqlx::query("INSERT INTO messages (room_id, sender_id, display_name, content, created_at)
                 VALUES (?,?,?,?,?)")
        .bind(&m.room_id)
        .bind(&m.sender_id)
        .bind(&m.display_name)
        .bind(&m.content)
        .bind(m.created_at)
        .execute(pool)
        .await?;
    Ok(())
}

/// Last `limit` messages of a room, oldest first.
pub async fn recent_messages(pool: &SqlitePool, room: &str, limit: i64) -> AppResult<Vec<ChatMessage>> {
    let mut rows: Vec<ChatMessage> = sqlx::query_as(
        "SELECT room_id, sender_id, display_name, content, created_at
           FROM messages WHERE room_id = ? ORDER BY id DESC LIMIT ?")
        .bind(room)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.reverse();
    Ok(rows)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    // 單一連線：每條 sqlite::memory: 連線都是一個獨立資料庫
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init(&pool).await.unwrap();
    pool
}

#[cfg(test)]
pub(crate) async fn insert_room(pool: &SqlitePool, id: &str, name: &str) {
    sqlx::query("INSERT INTO rooms (id, name, created_at) VALUES (?,?,?)")
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
}
