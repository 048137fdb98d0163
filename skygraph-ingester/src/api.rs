use crate::batcher::Batcher;
use crate::coalesce::Coalescer;
use crate::config::{BATCH_MAX_SIZE, BATCH_MAX_TIME};
use crate::limiter::RateLimiter;
use crate::IngesterError;
use skygraph_lexicon::app::bsky::actor::{GetProfilesOutput, ProfileViewDetailed};
use skygraph_lexicon::app::bsky::feed::{GetPostsOutput, PostView};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("upstream status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        ratelimit_remaining: Option<String>,
        ratelimit_reset: Option<i64>,
    },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => *status == 429 || *status >= 500,
            ApiError::Decode(_) => false,
        }
    }

    /// Delay until the server-advertised window reset, for a 429 that
    /// exhausted the remaining quota.
    pub fn ratelimit_reset_delay(&self, now_ms: i64) -> Option<Duration> {
        let ApiError::Status {
            status: 429,
            ratelimit_remaining: Some(remaining),
            ratelimit_reset: Some(reset),
            ..
        } = self
        else {
            return None;
        };
        if remaining != "0" {
            return None;
        }
        let delta = reset * 1000 - now_ms;
        Some(Duration::from_millis(delta.max(0) as u64))
    }
}

pub(crate) fn is_profile_not_found(err: &ApiError) -> bool {
    matches!(err, ApiError::Status { message, .. } if message.contains("Profile not found"))
}

fn profiles_by_did(out: GetProfilesOutput) -> HashMap<String, ProfileViewDetailed> {
    out.profiles
        .into_iter()
        .map(|p| (p.did.clone(), p))
        .collect()
}

fn posts_by_uri(out: GetPostsOutput) -> HashMap<String, PostView> {
    out.posts.into_iter().map(|p| (p.uri.clone(), p)).collect()
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: reqwest::Client,
    url: String,
    query: Vec<(&'static str, String)>,
) -> Result<T, ApiError> {
    let resp = http
        .get(&url)
        .query(&query)
        .send()
        .await
        .map_err(|e| ApiError::Transport(e.to_string()))?;

    let status = resp.status();
    if !status.is_success() {
        let header = |name: &str| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        };
        let ratelimit_remaining = header("ratelimit-remaining");
        let ratelimit_reset = header("ratelimit-reset").and_then(|v| v.parse().ok());
        let message = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            message,
            ratelimit_remaining,
            ratelimit_reset,
        });
    }

    resp.json().await.map_err(|e| ApiError::Decode(e.to_string()))
}

/// Typed wrapper over app.bsky.actor.getProfiles and app.bsky.feed.getPosts,
/// layered over the keyed batcher, the in-flight coalescer, and the global
/// rate limiter. Missing referents surface as `Ok(None)`.
pub struct AppViewClient {
    profiles: Batcher<ProfileViewDetailed>,
    posts: Batcher<PostView>,
    profile_inflight: Coalescer<Result<Option<ProfileViewDetailed>, ApiError>>,
    post_inflight: Coalescer<Result<Option<PostView>, ApiError>>,
}

impl AppViewClient {
    pub fn new(host: &str, limiter: Arc<RateLimiter>) -> Result<Self, IngesterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let base = host.trim_end_matches('/').to_owned();

        let profiles = {
            let http = http.clone();
            let limiter = Arc::clone(&limiter);
            let url = format!("{base}/xrpc/app.bsky.actor.getProfiles");
            Batcher::new(BATCH_MAX_SIZE, BATCH_MAX_TIME, move |dids: Vec<String>| {
                let http = http.clone();
                let limiter = Arc::clone(&limiter);
                let url = url.clone();
                async move {
                    let out: GetProfilesOutput = limiter
                        .schedule("app.bsky.actor.getProfiles", || {
                            let query = dids.iter().map(|d| ("actors", d.clone())).collect();
                            get_json(http.clone(), url.clone(), query)
                        })
                        .await?;
                    Ok(profiles_by_did(out))
                }
            })
        };

        let posts = {
            let http = http.clone();
            let limiter = Arc::clone(&limiter);
            let url = format!("{base}/xrpc/app.bsky.feed.getPosts");
            Batcher::new(BATCH_MAX_SIZE, BATCH_MAX_TIME, move |uris: Vec<String>| {
                let http = http.clone();
                let limiter = Arc::clone(&limiter);
                let url = url.clone();
                async move {
                    let out: GetPostsOutput = limiter
                        .schedule("app.bsky.feed.getPosts", || {
                            let query = uris.iter().map(|u| ("uris", u.clone())).collect();
                            get_json(http.clone(), url.clone(), query)
                        })
                        .await?;
                    Ok(posts_by_uri(out))
                }
            })
        };

        Ok(Self {
            profiles,
            posts,
            profile_inflight: Coalescer::new(),
            post_inflight: Coalescer::new(),
        })
    }

    pub async fn get_profile(
        &self,
        did: &str,
    ) -> Result<Option<ProfileViewDetailed>, ApiError> {
        let batcher = self.profiles.clone();
        let key = did.to_owned();
        self.profile_inflight
            .run(did, async move {
                match batcher.add(&key).await {
                    Err(ref err) if is_profile_not_found(err) => Ok(None),
                    other => other,
                }
            })
            .await
    }

    pub async fn get_post(&self, uri: &str) -> Result<Option<PostView>, ApiError> {
        let batcher = self.posts.clone();
        let key = uri.to_owned();
        self.post_inflight
            .run(uri, async move { batcher.add(&key).await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn profiles_response_reduces_to_a_did_map() {
        let out: GetProfilesOutput = serde_json::from_value(json!({
            "profiles": [
                {"did": "did:plc:a", "handle": "a.test", "displayName": "A"},
                {"did": "did:plc:b", "handle": "b.test"}
            ]
        }))
        .unwrap();
        let map = profiles_by_did(out);
        assert_eq!(map.len(), 2);
        assert_eq!(map["did:plc:a"].handle, "a.test");
        assert!(map["did:plc:b"].display_name.is_none());
    }

    #[test]
    fn posts_response_reduces_to_a_uri_map() {
        let out: GetPostsOutput = serde_json::from_value(json!({
            "posts": [{
                "uri": "at://did:plc:a/app.bsky.feed.post/1",
                "cid": "bafy1",
                "author": {"did": "did:plc:a", "handle": "a.test", "displayName": null},
                "record": {"$type": "app.bsky.feed.post", "createdAt": "2024-05-01T12:00:00Z", "text": "hi"}
            }]
        }))
        .unwrap();
        let map = posts_by_uri(out);
        assert_eq!(map["at://did:plc:a/app.bsky.feed.post/1"].author.did, "did:plc:a");
    }

    #[test]
    fn transient_classification() {
        assert!(ApiError::Transport("reset by peer".into()).is_transient());
        let status = |code| ApiError::Status {
            status: code,
            message: String::new(),
            ratelimit_remaining: None,
            ratelimit_reset: None,
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!ApiError::Decode("bad json".into()).is_transient());
    }

    #[test]
    fn profile_not_found_is_a_soft_miss() {
        let err = ApiError::Status {
            status: 400,
            message: "{\"error\":\"InvalidRequest\",\"message\":\"Profile not found\"}".into(),
            ratelimit_remaining: None,
            ratelimit_reset: None,
        };
        assert!(is_profile_not_found(&err));
        assert!(!is_profile_not_found(&ApiError::Transport("x".into())));
    }

    #[test]
    fn reset_delay_requires_exhausted_quota() {
        let err = ApiError::Status {
            status: 429,
            message: String::new(),
            ratelimit_remaining: Some("5".into()),
            ratelimit_reset: Some(1_000),
        };
        assert!(err.ratelimit_reset_delay(0).is_none());

        let err = ApiError::Status {
            status: 429,
            message: String::new(),
            ratelimit_remaining: Some("0".into()),
            ratelimit_reset: Some(12),
        };
        assert_eq!(
            err.ratelimit_reset_delay(0),
            Some(Duration::from_secs(12))
        );
        // a reset in the past clamps to zero rather than underflowing
        assert_eq!(
            err.ratelimit_reset_delay(120_000),
            Some(Duration::from_millis(0))
        );
    }
}
