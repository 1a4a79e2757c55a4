mod broadcast;
mod chat;
mod config;
mod db;
mod error;
mod playback;
mod queue;
mod resolver;
mod room;
mod routes;
mod state;
mod store;
mod utils {
    pub mod drift;
    pub mod jwt;
}

use std::sync::Arc;
use anyhow::Context;
use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::EnvFilter;

use crate::{
    broadcast::Broadcaster,
    config::Config,
    playback::Playback,
    resolver::HttpResolver,
    room::Rooms,
    routes::Services,
    store::MemoryStore,
    utils::drift,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = Arc::new(Config::from_env()?);
    let pool = SqlitePoolOptions::new()
        .connect(&cfg.database_url)
        .await
        .with_context(|| format!("cannot open {}", cfg.database_url))?;
    db::init(&pool).await.context("schema setup failed")?;

    let bus   = Broadcaster::new();
    let store = Arc::new(MemoryStore::new());
    let rooms = Rooms::new(Playback::new(store, bus.clone(), pool.clone()));
    if cfg.resolver_url.is_none() {
        tracing::warn!("RESOLVER_URL not set, videos get placeholder metadata");
    }
    let resolver = Arc::new(HttpResolver::new(cfg.resolver_url.clone()));

    tokio::spawn(drift::task(rooms.clone(), cfg.drift_interval));  // 啟動巡房

    let app = routes::app(Services { pool, cfg: cfg.clone(), rooms, bus, resolver });

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("cannot bind {}", cfg.bind_addr))?;
    tracing::info!(addr = %cfg.bind_addr, "listening");
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
