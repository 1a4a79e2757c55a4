use std::sync::Arc;
use axum::{extract::DefaultBodyLimit, Extension, Router};
use sqlx::SqlitePool;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, services::ServeDir};

use crate::{broadcast::Broadcaster, config::Config, resolver::Resolver, room::Rooms};

pub mod auth;
pub mod queue;
pub mod rooms;
pub mod ws;

const BODY_LIMIT: usize = 64 * 1024;

pub fn router() -> Router {
    Router::new()
        .nest("/api", auth::router().merge(rooms::router()).merge(queue::router()))
        .nest("/ws",  ws::router())
}

/// Everything the handlers pull out of `Extension`s.
#[derive(Clone)]
pub struct Services {
    pub pool:     SqlitePool,
    pub cfg:      Arc<Config>,
    pub rooms:    Rooms,
    pub bus:      Broadcaster,
    pub resolver: Arc<dyn Resolver>,
}

pub fn app(s: Services) -> Router {
    router()
        .fallback_service(ServeDir::new("static"))
        .layer(Extension(s.pool))
        .layer(Extension(s.cfg))
        .layer(Extension(s.rooms))
        .layer(Extension(s.bus))
        .layer(Extension(s.resolver))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
}
