//! routes/auth.rs
use std::sync::Arc;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    routing::post,
    response::IntoResponse,
    extract::{Extension, Json},
    http::StatusCode,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;

use crate::{
    config::Config,
    error::{bad, unauthorized, AppErr, AppResult},
    utils::jwt,
};

#[derive(Deserialize)]
struct RegisterInput {
    #[serde(default)] email:    String,
    #[serde(default)] password: String,
    #[serde(default)] username: String,
}

#[derive(Deserialize)]
struct LoginInput {
    #[serde(default)] email:    String,
    #[serde(default)] password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenJson {
    token:    String,
    user_id:  String,
    username: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/* ---------------- Register ---------------- */
async fn register(
    Extension(pool): Extension<SqlitePool>,
    Json(p): Json<RegisterInput>,
) -> AppResult<impl IntoResponse> {
    let (email, username) = (p.email.trim(), p.username.trim());
    if email.is_empty() || p.password.is_empty() || username.is_empty() {
        return Err(bad("Missing fields"));
    }

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(p.password.as_bytes(), &salt)
        .map_err(|e| AppErr::Config(format!("password hashing failed: {e}")))?
        .to_string();
    let uid = uuid::Uuid::new_v4().to_string();

    sqlx::query("INSERT INTO users (id, email, username, password) VALUES (?,?,?,?)")
        .bind(&uid)
        .bind(email)
        .bind(username)
        .bind(&hash)
        .execute(&pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(d) if d.is_unique_violation() =>
                AppErr::Conflict("email already registered".into()),
            other => AppErr::Db(other),
        })?;

    tracing::info!(user = %uid, "registered");
    Ok((StatusCode::CREATED, Json(json!({ "message": "User registered", "userId": uid }))))
}

/* ---------------- Login ---------------- */
async fn login(
    Extension(pool): Extension<SqlitePool>,
    Extension(cfg): Extension<Arc<Config>>,
    Json(p): Json<LoginInput>,
) -> AppResult<Json<TokenJson>> {
    if p.email.trim().is_empty() || p.password.is_empty() {
        return Err(bad("Missing fields"));
    }
    let (id, username, pwd): (String, String, String) =
        sqlx::query_as("SELECT id, username, password FROM users WHERE email = ?")
            .bind(p.email.trim())
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| unauthorized("wrong email or password"))?;

    let parsed = PasswordHash::new(&pwd).map_err(|_| unauthorized("wrong email or password"))?;
    Argon2::default()
        .verify_password(p.password.as_bytes(), &parsed)
        .map_err(|_| unauthorized("wrong email or password"))?;

    let token = jwt::sign(&id, &cfg.jwt_secret, cfg.token_ttl)?;
    Ok(Json(TokenJson { token, user_id: id, username }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::testing::{call, harness};
    use axum::http::Method;

    #[tokio::test]
    async fn register_then_login() {
        let h = harness().await;
        let body = json!({"email": "testing1@gmail.com", "password": "pw123456", "username": "Testing1"});
        let (code, _) = call(&h.app, Method::POST, "/api/register", None, Some(body.clone())).await;
        assert_eq!(code, StatusCode::CREATED);

        let (code, _) = call(&h.app, Method::POST, "/api/register", None, Some(body)).await;
        assert_eq!(code, StatusCode::CONFLICT);

        let login = json!({"email": "testing1@gmail.com", "password": "pw123456"});
        let (code, v) = call(&h.app, Method::POST, "/api/login", None, Some(login)).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(v["username"], "Testing1");
        let uid = jwt::verify(v["token"].as_str().unwrap(), &h.cfg.jwt_secret).unwrap();
        assert_eq!(v["userId"], uid);
    }

    #[tokio::test]
    async fn wrong_password_and_missing_fields() {
        let h = harness().await;
        let body = json!({"email": "a@b.c", "password": "right", "username": "a"});
        call(&h.app, Method::POST, "/api/register", None, Some(body)).await;

        let (code, _) = call(&h.app, Method::POST, "/api/login", None,
                             Some(json!({"email": "a@b.c", "password": "wrong"}))).await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        let (code, v) = call(&h.app, Method::POST, "/api/register", None,
                             Some(json!({"email": "x@y.z"}))).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert!(v["error"].as_str().unwrap().contains("Missing fields"));
    }
}
