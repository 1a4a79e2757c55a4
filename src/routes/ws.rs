use std::sync::{atomic::{AtomicU64, Ordering}, Arc};
use axum::{
    Router, routing::get, response::IntoResponse,
    extract::{ws::{WebSocketUpgrade, WebSocket, Message}, Extension},
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::SqlitePool;

use crate::{
    broadcast::{outbox, Broadcaster, ConnId, Outbox, RoomEvent},
    chat,
    config::Config,
    error::AppResult,
    playback::Expect,
    room::Rooms,
    routes::rooms::ensure_room,
};

static NEXT_CONN: AtomicU64 = AtomicU64::new(1);

/* ------------ client → server frames ------------ */
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMsg {
    #[serde(rename_all = "camelCase")]
    Join { room_id: String },
    #[serde(rename_all = "camelCase")]
    Leave { room_id: String },
    #[serde(rename_all = "camelCase")]
    Message {
        room_id: String,
        token: String,
        content: String,
        #[serde(default)]
        display_name: String,
    },
    /// "the current item finished"; `video_id` names the item the client saw end.
    #[serde(rename_all = "camelCase")]
    AdvanceRequest {
        room_id: String,
        #[serde(default)]
        video_id: Option<String>,
    },
}

#[derive(Clone)]
struct Ctx {
    pool:  SqlitePool,
    cfg:   Arc<Config>,
    rooms: Rooms,
    bus:   Broadcaster,
}

pub fn router() -> Router {
    Router::new().route("/room", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Extension(pool): Extension<SqlitePool>,
    Extension(cfg): Extension<Arc<Config>>,
    Extension(rooms): Extension<Rooms>,
    Extension(bus): Extension<Broadcaster>,
) -> impl IntoResponse {
    let ctx = Ctx { pool, cfg, rooms, bus };
    ws.on_upgrade(move |s| user_ws(s, ctx))
}

/* ---------------- per connection ---------------- */
async fn user_ws(sock: WebSocket, ctx: Ctx) {
    let conn = NEXT_CONN.fetch_add(1, Ordering::Relaxed);
    let (mut sink, mut stream) = sock.split();
    let (tx, mut rx) = outbox();
    tracing::debug!(conn, "socket open");

    let writer = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&*ev) else { continue };
            if sink.send(Message::Text(text)).await.is_err() { break; }
        }
    });

    while let Some(Ok(msg)) = stream.next().await {
        match msg {
            Message::Text(raw) => {
                if let Err(e) = handle(&ctx, conn, &tx, &raw).await {
                    reject(&tx, e.to_string());
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    /* 斷線：退出所有房間 */
    let left = ctx.bus.disconnect(conn).await;
    tracing::debug!(conn, rooms = ?left, "socket closed");
    writer.abort();
}

async fn handle(ctx: &Ctx, conn: ConnId, tx: &Outbox, raw: &str) -> AppResult<()> {
    let msg: ClientMsg = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(e) => {
            reject(tx, format!("malformed frame: {e}"));
            return Ok(());
        }
    };
    match msg {
        ClientMsg::Join { room_id } => {
            ensure_room(&ctx.pool, &room_id).await?;
            // late joiners need to know what is on right now
            ctx.rooms.get(&room_id).await?.welcome(conn, tx.clone()).await?;
        }
        ClientMsg::Leave { room_id } => {
            ctx.bus.leave(&room_id, conn).await;
        }
        ClientMsg::Message { room_id, token, content, display_name } => {
            chat::submit(&ctx.pool, &ctx.bus, &ctx.cfg.jwt_secret,
                         &room_id, &token, &display_name, &content).await?;
        }
        ClientMsg::AdvanceRequest { room_id, video_id } => {
            ensure_room(&ctx.pool, &room_id).await?;
            let expect = video_id.map(Expect::Finished).unwrap_or(Expect::Any);
            ctx.rooms.get(&room_id).await?.advance(expect).await?;
        }
    }
    Ok(())
}

fn reject(tx: &Outbox, reason: String) {
    if tx.try_send(Arc::new(RoomEvent::Error { reason })).is_err() {
        tracing::debug!("error frame dropped, outbox full");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{broadcast::drain, db, error::AppErr, queue::new_entry, routes::testing::harness};

    async fn ctx() -> (Ctx, crate::routes::testing::Harness) {
        let h = harness().await;
        db::insert_room(&h.pool, "A", "room a").await;
        db::insert_room(&h.pool, "B", "room b").await;
        let ctx = Ctx { pool: h.pool.clone(), cfg: h.cfg.clone(), rooms: h.rooms.clone(), bus: h.bus.clone() };
        (ctx, h)
    }

    #[test]
    fn parses_client_frames() {
        let m: ClientMsg = serde_json::from_str(
            r#"{"type":"message","roomId":"A","token":"t","content":"hi","displayName":"Testing1"}"#).unwrap();
        assert!(matches!(m, ClientMsg::Message { ref display_name, .. } if display_name == "Testing1"));
        let m: ClientMsg = serde_json::from_str(r#"{"type":"advance-request","roomId":"A"}"#).unwrap();
        assert!(matches!(m, ClientMsg::AdvanceRequest { video_id: None, .. }));
        assert!(serde_json::from_str::<ClientMsg>(r#"{"type":"dance"}"#).is_err());
    }

    #[tokio::test]
    async fn chat_reaches_only_room_members() {
        let (ctx, h) = ctx().await;
        let (ta, mut ra) = outbox();
        let (tb, mut rb) = outbox();
        handle(&ctx, 1, &ta, r#"{"type":"join","roomId":"A"}"#).await.unwrap();
        handle(&ctx, 2, &tb, r#"{"type":"join","roomId":"B"}"#).await.unwrap();
        drain(&mut ra);
        drain(&mut rb);

        let frame = serde_json::json!({
            "type": "message", "roomId": "A", "token": h.token("u1"),
            "content": "Hello, this is a test message!", "displayName": "Testing1",
        }).to_string();
        handle(&ctx, 2, &tb, &frame).await.unwrap();

        assert!(matches!(drain(&mut ra).as_slice(),
            [RoomEvent::Chat { display_name, .. }] if display_name == "Testing1"));
        assert!(drain(&mut rb).is_empty());
    }

    #[tokio::test]
    async fn join_sends_current_state() {
        let (ctx, _h) = ctx().await;
        ctx.rooms.get("A").await.unwrap().enqueue(new_entry("https://v/a", 300)).await.unwrap();
        let (tx, mut rx) = outbox();
        handle(&ctx, 1, &tx, r#"{"type":"join","roomId":"A"}"#).await.unwrap();
        let evs = drain(&mut rx);
        assert!(evs.iter().any(|e| matches!(e, RoomEvent::MemberJoined { .. })));
        assert!(evs.iter().any(|e| matches!(e, RoomEvent::QueueChanged { now_playing: Some(_), .. })));
        assert!(evs.iter().any(|e| matches!(e, RoomEvent::PlayVideo { canonical_url, .. } if canonical_url == "https://v/a")));
    }

    #[tokio::test]
    async fn advance_request_is_guarded_by_video_id() {
        let (ctx, _h) = ctx().await;
        let room = ctx.rooms.get("A").await.unwrap();
        let a = room.enqueue(new_entry("https://v/a", 300)).await.unwrap();
        let b = room.enqueue(new_entry("https://v/b", 300)).await.unwrap();
        room.enqueue(new_entry("https://v/c", 300)).await.unwrap();
        let (tx, _rx) = outbox();

        let finished = format!(r#"{{"type":"advance-request","roomId":"A","videoId":"{}"}}"#, a.id);
        handle(&ctx, 1, &tx, &finished).await.unwrap();
        handle(&ctx, 2, &tx, &finished).await.unwrap();
        assert_eq!(room.snapshot().await.unwrap().now_playing.unwrap().entry.id, b.id);
    }

    #[tokio::test]
    async fn bad_token_and_bad_frames_are_errors() {
        let (ctx, _h) = ctx().await;
        let (tx, mut rx) = outbox();
        let err = handle(&ctx, 1, &tx,
            r#"{"type":"message","roomId":"A","token":"nope","content":"x"}"#).await.unwrap_err();
        assert!(matches!(err, AppErr::Unauthorized(_)));

        handle(&ctx, 1, &tx, "{not json").await.unwrap();
        assert!(matches!(drain(&mut rx).as_slice(), [RoomEvent::Error { .. }]));

        let err = handle(&ctx, 1, &tx, r#"{"type":"join","roomId":"missing"}"#).await.unwrap_err();
        assert!(matches!(err, AppErr::NotFound(_)));
    }
}
