//! Video metadata resolution.
//!
//! URL normalization is local and strict (bad input is the caller's fault).
//! The lookup is remote and allowed to fail: any failure, including a
//! timeout, degrades to placeholder metadata with a zero duration, which the
//! drift check treats as already finished.

use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::error::{bad, AppResult};

pub const PLACEHOLDER_TITLE: &str = "Untitled video";
/// Longest duration taken from a resolver; anything above is capped.
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMeta {
    pub canonical_url:    String,
    pub title:            String,
    pub thumbnail_url:    String,
    pub duration_seconds: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveErr {
    #[error("no resolver configured")]
    Disabled,
    #[error("resolver unreachable: {0}")]
    Http(#[from] reqwest::Error),
    #[error("resolver answered {0}")]
    Status(u16),
    #[error("resolver timed out after {0:?}")]
    Timeout(Duration),
}

/// Raw answer of the metadata service; every field may be missing.
#[derive(Debug, Default, Deserialize)]
pub struct Lookup {
    pub title:       Option<String>,
    pub thumbnail:   Option<String>,
    pub duration:    Option<f64>,
    pub webpage_url: Option<String>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    async fn lookup(&self, canonical_url: &str) -> Result<Lookup, ResolveErr>;
}

/// `GET {base}?url=<canonical>` → [`Lookup`] JSON.
pub struct HttpResolver {
    client: Client,
    base:   Option<String>,
}

impl HttpResolver {
    pub fn new(base: Option<String>) -> Self {
        Self { client: Client::new(), base }
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn lookup(&self, canonical_url: &str) -> Result<Lookup, ResolveErr> {
        let base = self.base.as_deref().ok_or(ResolveErr::Disabled)?;
        let resp = self.client
            .get(base)
            .query(&[("url", canonical_url)])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ResolveErr::Status(resp.status().as_u16()));
        }
        Ok(resp.json().await?)
    }
}

/* ---------------- normalize ---------------- */
#[derive(Clone, Debug, PartialEq)]
pub struct Canonical {
    pub url:        String,
    pub youtube_id: Option<String>,
}

pub fn normalize(raw: &str) -> AppResult<Canonical> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(bad("videoUrl is required"));
    }
    let url = Url::parse(raw).map_err(|_| bad(format!("not a valid URL: {raw}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(bad("only http(s) video URLs are supported"));
    }
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let host = host.trim_start_matches("www.");

    let id = match host {
        "youtu.be" => url.path_segments().and_then(|mut s| s.next()).map(str::to_owned),
        "youtube.com" | "m.youtube.com" | "music.youtube.com" => {
            let mut segs = url.path_segments().map(|s| s.collect::<Vec<_>>()).unwrap_or_default();
            segs.retain(|s| !s.is_empty());
            match segs.as_slice() {
                ["watch"] => url.query_pairs().find(|(k, _)| k == "v").map(|(_, v)| v.into_owned()),
                ["shorts" | "embed" | "live" | "v", id, ..] => Some((*id).to_owned()),
                _ => None,
            }
        }
        _ => return Ok(Canonical { url: url.to_string(), youtube_id: None }),
    };

    match id.filter(|id| is_youtube_id(id)) {
        Some(id) => Ok(Canonical {
            url: format!("https://www.youtube.com/watch?v={id}"),
            youtube_id: Some(id),
        }),
        None => Err(bad("YouTube link does not point at a video")),
    }
}

fn is_youtube_id(s: &str) -> bool {
    s.len() == 11 && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/* ---------------- resolve ---------------- */
/// Normalize, then look up with a deadline. Only normalization can fail.
pub async fn resolve(resolver: &dyn Resolver, raw: &str, timeout: Duration) -> AppResult<VideoMeta> {
    let canon = normalize(raw)?;
    let looked = match tokio::time::timeout(timeout, resolver.lookup(&canon.url)).await {
        Ok(r)  => r,
        Err(_) => Err(ResolveErr::Timeout(timeout)),
    };
    let lookup = looked.unwrap_or_else(|e| {
        tracing::warn!(url = %canon.url, error = %e, "metadata lookup failed, using placeholders");
        Lookup::default()
    });
    Ok(fill(canon, lookup))
}

fn fill(canon: Canonical, l: Lookup) -> VideoMeta {
    let fallback_thumb = canon.youtube_id.as_deref()
        .map(|id| format!("https://img.youtube.com/vi/{id}/hqdefault.jpg"))
        .unwrap_or_default();
    let canonical_url = l.webpage_url
        .filter(|u| Url::parse(u).map(|u| matches!(u.scheme(), "http" | "https")).unwrap_or(false))
        .unwrap_or(canon.url);
    VideoMeta {
        canonical_url,
        title: l.title.filter(|t| !t.trim().is_empty()).unwrap_or_else(|| PLACEHOLDER_TITLE.into()),
        thumbnail_url: l.thumbnail.filter(|t| !t.is_empty()).unwrap_or(fallback_thumb),
        duration_seconds: l.duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .map(|d| (d.ceil() as u64).min(MAX_DURATION_SECS))
            .unwrap_or(0),
    }
}

#[cfg(test)]
pub(crate) struct StubResolver {
    pub answer: Option<(String, f64)>,
    pub delay:  Duration,
}

#[cfg(test)]
#[async_trait]
impl Resolver for StubResolver {
    async fn lookup(&self, _canonical_url: &str) -> Result<Lookup, ResolveErr> {
        tokio::time::sleep(self.delay).await;
        match &self.answer {
            Some((title, secs)) => Ok(Lookup {
                title: Some(title.clone()),
                thumbnail: Some("https://img/stub.jpg".into()),
                duration: Some(*secs),
                webpage_url: None,
            }),
            None => Err(ResolveErr::Status(502)),
        }
    }
}
