use std::sync::Arc;
use axum::{
    extract::{Extension, Json, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    config::Config,
    error::AppResult,
    resolver::{self, Resolver},
    room::Rooms,
    routes::rooms::ensure_room,
    state::{NewEntry, PublicEntry},
    utils::jwt,
};

pub fn router() -> Router {
    Router::new().route("/rooms/:id/queue", get(list).post(add).delete(drop_entry))
}

async fn list(
    Extension(pool): Extension<SqlitePool>,
    Extension(rooms): Extension<Rooms>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<PublicEntry>>> {
    ensure_room(&pool, &id).await?;
    let snap = rooms.get(&id).await?.snapshot().await?;
    Ok(Json(snap.queue.iter().map(PublicEntry::from).collect()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddInput {
    #[serde(default)] video_url: String,
    #[serde(default)] requester: String,
}

async fn add(
    Extension(pool): Extension<SqlitePool>,
    Extension(cfg): Extension<Arc<Config>>,
    Extension(rooms): Extension<Rooms>,
    Extension(resolver): Extension<Arc<dyn Resolver>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(p): Json<AddInput>,
) -> AppResult<impl IntoResponse> {
    let uid = jwt::bearer(&headers, &cfg.jwt_secret)?;
    ensure_room(&pool, &id).await?;

    // 先查 metadata，再進房間排隊：慢的 resolver 不能卡住整間房
    let meta = resolver::resolve(resolver.as_ref(), &p.video_url, cfg.resolver_timeout).await?;
    let requester = match p.requester.trim() {
        "" => uid.clone(),
        r  => r.to_owned(),
    };
    let entry = rooms.get(&id).await?.enqueue(NewEntry {
        canonical_url:    meta.canonical_url,
        title:            meta.title,
        thumbnail_url:    meta.thumbnail_url,
        duration_seconds: meta.duration_seconds,
        requester_id:     uid,
        requester_name:   requester,
    }).await?;

    Ok((StatusCode::CREATED, Json(json!({
        "message": "Video added to queue",
        "entry":   PublicEntry::from(&entry),
    }))))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DropInput {
    #[serde(default)] video_id: String,
}

/// 200 whether or not the id was queued.
async fn drop_entry(
    Extension(pool): Extension<SqlitePool>,
    Extension(cfg): Extension<Arc<Config>>,
    Extension(rooms): Extension<Rooms>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(p): Json<DropInput>,
) -> AppResult<impl IntoResponse> {
    jwt::bearer(&headers, &cfg.jwt_secret)?;
    ensure_room(&pool, &id).await?;
    let removed = rooms.get(&id).await?.remove(&p.video_id).await?;
    Ok(Json(json!({ "removed": removed })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, routes::testing::{call, harness}};
    use axum::http::Method;

    const RICK: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    #[tokio::test]
    async fn add_list_remove() {
        let h = harness().await;
        db::insert_room(&h.pool, "r1", "one").await;
        let tok = h.token("u1");

        let add = |url: &str| json!({"videoUrl": url, "requester": "Testing1"});
        let (code, v) = call(&h.app, Method::POST, "/api/rooms/r1/queue", Some(&tok),
                             Some(add("https://youtu.be/dQw4w9WgXcQ"))).await;
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(v["entry"]["canonicalUrl"], RICK);

        // resolver is off: every entry has zero duration, so each
        // observation skips past the current one
        call(&h.app, Method::POST, "/api/rooms/r1/queue", Some(&tok),
             Some(add("https://vimeo.com/76979871"))).await;
        let (_, pb) = call(&h.app, Method::GET, "/api/rooms/r1/playback", None, None).await;
        assert_eq!(pb["nowPlaying"]["canonicalUrl"], "https://vimeo.com/76979871");
        assert_eq!(pb["nowPlaying"]["requester"], "Testing1");
        let (code, list) = call(&h.app, Method::GET, "/api/rooms/r1/queue", None, None).await;
        assert_eq!(code, StatusCode::OK);
        assert!(list.as_array().unwrap().is_empty());
        let (_, pb) = call(&h.app, Method::GET, "/api/rooms/r1/playback", None, None).await;
        assert!(pb["nowPlaying"].is_null());

        let (code, v) = call(&h.app, Method::DELETE, "/api/rooms/r1/queue", Some(&tok),
                             Some(json!({"videoId": "not-there"}))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(v["removed"], false);
    }

    #[tokio::test]
    async fn queued_entries_are_listed_in_order() {
        let h = harness().await;
        db::insert_room(&h.pool, "r1", "one").await;
        let hd = h.rooms.get("r1").await.unwrap();
        for url in ["https://v/a", "https://v/b", "https://v/c"] {
            hd.enqueue(crate::queue::new_entry(url, 300)).await.unwrap();
        }
        let (_, list) = call(&h.app, Method::GET, "/api/rooms/r1/queue", None, None).await;
        let urls: Vec<_> = list.as_array().unwrap().iter()
            .map(|e| e["canonicalUrl"].as_str().unwrap().to_owned()).collect();
        assert_eq!(urls, ["https://v/b", "https://v/c"]);

        let id = list[0]["id"].as_str().unwrap().to_owned();
        let (_, v) = call(&h.app, Method::DELETE, "/api/rooms/r1/queue", Some(&h.token("u2")),
                          Some(json!({"videoId": id}))).await;
        assert_eq!(v["removed"], true);
        let (_, list) = call(&h.app, Method::GET, "/api/rooms/r1/queue", None, None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rejections() {
        let h = harness().await;
        db::insert_room(&h.pool, "r1", "one").await;
        let body = json!({"videoUrl": RICK});

        let (code, _) = call(&h.app, Method::POST, "/api/rooms/r1/queue", None, Some(body.clone())).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        let (code, _) = call(&h.app, Method::POST, "/api/rooms/r1/queue", Some("garbage"), Some(body.clone())).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        let (code, _) = call(&h.app, Method::POST, "/api/rooms/r1/queue", Some(&h.token("u1")),
                             Some(json!({"videoUrl": "not a url"}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        let (code, _) = call(&h.app, Method::POST, "/api/rooms/zz/queue", Some(&h.token("u1")), Some(body)).await;
        assert_eq!(code, StatusCode::NOT_FOUND);

        let snap = h.rooms.get("r1").await.unwrap().snapshot().await.unwrap();
        assert!(snap.queue.is_empty() && snap.now_playing.is_none());
    }
}
