use std::sync::Arc;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    broadcast::Broadcaster,
    config::Config,
    db::{self, ChatMessage, Room},
    error::{bad, AppErr, AppResult},
    room::Rooms,
    state::PublicEntry,
    utils::jwt,
};

pub fn router() -> Router {
    Router::new()
        .route("/browse", get(browse))
        .route("/rooms/create", post(create))
        .route("/rooms/:id", get(info).delete(remove))
        .route("/rooms/:id/messages", get(history))
        .route("/rooms/:id/playback", get(playback))
}

/// 404 unless the room exists in the durable store.
pub async fn ensure_room(pool: &SqlitePool, id: &str) -> AppResult<Room> {
    sqlx::query_as("SELECT id, name, description, thumbnail_url, creator_id FROM rooms WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppErr::NotFound(format!("Room {id} doesn't exist")))
}

async fn browse(Extension(pool): Extension<SqlitePool>) -> AppResult<Json<Vec<Room>>> {
    let rooms = sqlx::query_as(
        "SELECT id, name, description, thumbnail_url, creator_id FROM rooms ORDER BY created_at DESC")
        .fetch_all(&pool)
        .await?;
    Ok(Json(rooms))
}

#[derive(Deserialize)]
struct CreateInput {
    #[serde(default)] name:        String,
    #[serde(default)] description: String,
}

async fn create(
    Extension(pool): Extension<SqlitePool>,
    Extension(cfg): Extension<Arc<Config>>,
    headers: HeaderMap,
    Json(p): Json<CreateInput>,
) -> AppResult<impl IntoResponse> {
    let uid = jwt::bearer(&headers, &cfg.jwt_secret)?;
    let name = p.name.trim();
    if name.is_empty() {
        return Err(bad("Room name is required"));
    }
    let room = Room {
        id:            nanoid::nanoid!(10),
        name:          name.to_owned(),
        description:   p.description.trim().to_owned(),
        thumbnail_url: String::new(),
        creator_id:    Some(uid),
    };
    sqlx::query("INSERT INTO rooms (id, name, description, thumbnail_url, creator_id, created_at)
                 VALUES (?,?,?,?,?,?)")
        .bind(&room.id)
        .bind(&room.name)
        .bind(&room.description)
        .bind(&room.thumbnail_url)
        .bind(&room.creator_id)
        .bind(Utc::now())
        .execute(&pool)
        .await?;
    tracing::info!(room = %room.id, name = %room.name, "room created");
    Ok((StatusCode::CREATED, Json(room)))
}

async fn info(
    Extension(pool): Extension<SqlitePool>,
    Path(id): Path<String>,
) -> AppResult<Json<Room>> {
    Ok(Json(ensure_room(&pool, &id).await?))
}

async fn remove(
    Extension(pool): Extension<SqlitePool>,
    Extension(cfg): Extension<Arc<Config>>,
    Extension(rooms): Extension<Rooms>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    jwt::bearer(&headers, &cfg.jwt_secret)?;
    ensure_room(&pool, &id).await?;
    sqlx::query("DELETE FROM messages WHERE room_id = ?").bind(&id).execute(&pool).await?;
    sqlx::query("DELETE FROM rooms WHERE id = ?").bind(&id).execute(&pool).await?;
    rooms.close(&id).await;
    tracing::info!(room = %id, "room deleted");
    Ok(Json(json!({ "message": "Room deleted" })))
}

#[derive(Deserialize)]
struct HistoryQuery { limit: Option<i64> }

async fn history(
    Extension(pool): Extension<SqlitePool>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    ensure_room(&pool, &id).await?;
    let limit = q.limit.unwrap_or(50).clamp(1, 200);
    Ok(Json(db::recent_messages(&pool, &id, limit).await?))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaybackJson {
    now_playing:     Option<PublicEntry>,
    started_at:      Option<chrono::DateTime<Utc>>,
    elapsed_seconds: Option<i64>,
    members:         usize,
}

async fn playback(
    Extension(pool): Extension<SqlitePool>,
    Extension(rooms): Extension<Rooms>,
    Extension(bus): Extension<Broadcaster>,
    Path(id): Path<String>,
) -> AppResult<Json<PlaybackJson>> {
    ensure_room(&pool, &id).await?;
    let snap = rooms.get(&id).await?.snapshot().await?;
    let members = bus.members(&id).await;
    let now = Utc::now();
    Ok(Json(match snap.now_playing {
        Some(np) => PlaybackJson {
            now_playing:     Some(PublicEntry::from(&np.entry)),
            started_at:      Some(np.started_at),
            elapsed_seconds: Some(np.elapsed_secs(now)),
            members,
        },
        None => PlaybackJson { now_playing: None, started_at: None, elapsed_seconds: None, members },
    }))
}
