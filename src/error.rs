use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::fmt::Display;

pub type AppResult<T> = Result<T, AppErr>;

#[derive(thiserror::Error, Debug)]
pub enum AppErr {
    #[error("Bad request: {0}")]
    Bad(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /* 與 Unauthorized 分開：前端要重新登入 */
    #[error("token expired")]
    Expired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("room {0} is shutting down")]
    RoomGone(String),

    #[error("config: {0}")]
    Config(String),

    #[error("DB: {0}")]
    Db(#[from] sqlx::Error),
}

impl AppErr {
    pub fn status(&self) -> StatusCode {
        match self {
            AppErr::Bad(_)          => StatusCode::BAD_REQUEST,
            AppErr::Unauthorized(_) |
            AppErr::Expired         => StatusCode::UNAUTHORIZED,
            AppErr::NotFound(_)     => StatusCode::NOT_FOUND,
            AppErr::Conflict(_)     => StatusCode::CONFLICT,
            AppErr::RoomGone(_)     => StatusCode::SERVICE_UNAVAILABLE,
            _                       => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppErr {
    fn into_response(self) -> axum::response::Response {
        let code = self.status();
        if code.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (code, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/* ── 小助手：把任何 error 轉成 Bad / Unauthorized ── */
pub fn bad<E: Display>(e: E) -> AppErr { AppErr::Bad(e.to_string()) }
pub fn unauthorized<E: Display>(e: E) -> AppErr { AppErr::Unauthorized(e.to_string()) }
