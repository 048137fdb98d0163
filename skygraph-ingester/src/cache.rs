use crate::config::PRESENCE_TTL;
use moka::sync::Cache;
use std::time::Duration;

/// TTL'd membership caches that let the resolver skip database existence
/// probes for users (by DID) and posts (by AT-URI).
pub struct PresenceCaches {
    users: Cache<String, ()>,
    posts: Cache<String, ()>,
}

impl PresenceCaches {
    pub fn new() -> Self {
        Self::with_ttl(PRESENCE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            users: Cache::builder().time_to_live(ttl).build(),
            posts: Cache::builder().time_to_live(ttl).build(),
        }
    }

    pub fn user_seen(&self, did: &str) -> bool {
        self.users.contains_key(did)
    }

    pub fn mark_user(&self, did: &str) {
        self.users.insert(did.to_owned(), ());
    }

    pub fn purge_user(&self, did: &str) {
        self.users.invalidate(did);
    }

    pub fn post_seen(&self, uri: &str) -> bool {
        self.posts.contains_key(uri)
    }

    pub fn mark_post(&self, uri: &str) {
        self.posts.insert(uri.to_owned(), ());
    }

    pub fn purge_post(&self, uri: &str) {
        self.posts.invalidate(uri);
    }
}

impl Default for PresenceCaches {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_and_purge() {
        let caches = PresenceCaches::new();
        assert!(!caches.user_seen("did:plc:alice"));

        caches.mark_user("did:plc:alice");
        assert!(caches.user_seen("did:plc:alice"));

        caches.purge_user("did:plc:alice");
        assert!(!caches.user_seen("did:plc:alice"));

        caches.mark_post("at://did:plc:alice/app.bsky.feed.post/3k");
        assert!(caches.post_seen("at://did:plc:alice/app.bsky.feed.post/3k"));
        assert!(!caches.user_seen("at://did:plc:alice/app.bsky.feed.post/3k"));
    }
}
