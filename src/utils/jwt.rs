use std::time::Duration;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey,
                   EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use crate::error::{unauthorized, AppErr, AppResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims { pub sub:String, pub exp:i64 }

pub fn sign(uid:&str, secret:&str, ttl:Duration) -> AppResult<String> {
    let c = Claims { sub: uid.into(), exp: Utc::now().timestamp() + ttl.as_secs() as i64 };
    encode(&Header::default(), &c, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| AppErr::Config(format!("cannot sign token: {e}")))
}

/// token → user id. 過期與無效分開回報，不重試。
pub fn verify(token:&str, secret:&str) -> AppResult<String> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()),
                     &Validation::new(Algorithm::HS256))
        .map(|d| d.claims.sub)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AppErr::Expired,
            _                           => unauthorized("invalid token"),
        })
}

/// `Authorization: Bearer <token>` → user id
pub fn bearer(headers:&HeaderMap, secret:&str) -> AppResult<String> {
    let raw = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| unauthorized("missing bearer token"))?;
    let token = raw
        .strip_prefix("Bearer ")
        .or_else(|| raw.strip_prefix("bearer "))
        .ok_or_else(|| unauthorized("malformed authorization header"))?;
    verify(token.trim(), secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "s3cret";

    #[test]
    fn round_trips_subject() {
        let t = sign("user-1", SECRET, Duration::from_secs(60)).unwrap();
        assert_eq!(verify(&t, SECRET).unwrap(), "user-1");
    }

    #[test]
    fn expired_token_is_distinct_from_invalid() {
        let old = Claims { sub: "user-1".into(), exp: Utc::now().timestamp() - 3_600 };
        let t = encode(&Header::default(), &old, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        assert!(matches!(verify(&t, SECRET), Err(AppErr::Expired)));
        assert!(matches!(verify("garbage", SECRET), Err(AppErr::Unauthorized(_))));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let t = sign("user-1", SECRET, Duration::from_secs(60)).unwrap();
        assert!(matches!(verify(&t, "other"), Err(AppErr::Unauthorized(_))));
    }

    #[test]
    fn bearer_header_parsing() {
        let t = sign("u", SECRET, Duration::from_secs(60)).unwrap();
        let mut h = HeaderMap::new();
        assert!(matches!(bearer(&h, SECRET), Err(AppErr::Unauthorized(_))));
        h.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {t}")).unwrap());
        assert_eq!(bearer(&h, SECRET).unwrap(), "u");
        h.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(matches!(bearer(&h, SECRET), Err(AppErr::Unauthorized(_))));
    }
}
