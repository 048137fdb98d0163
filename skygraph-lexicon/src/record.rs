use crate::app::bsky::actor::Profile;
use crate::app::bsky::feed::{Like, Post, Repost};
use crate::app::bsky::graph::Follow;
use serde::{Deserialize, Serialize};

pub const NSID_POST: &str = "app.bsky.feed.post";
pub const NSID_LIKE: &str = "app.bsky.feed.like";
pub const NSID_REPOST: &str = "app.bsky.feed.repost";
pub const NSID_FOLLOW: &str = "app.bsky.graph.follow";
pub const NSID_PROFILE: &str = "app.bsky.actor.profile";

/// Union of the record kinds the projection understands, discriminated by
/// the record's `$type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum KnownRecord {
    #[serde(rename = "app.bsky.feed.post")]
    Post(Post),
    #[serde(rename = "app.bsky.feed.like")]
    Like(Like),
    #[serde(rename = "app.bsky.feed.repost")]
    Repost(Repost),
    #[serde(rename = "app.bsky.graph.follow")]
    Follow(Follow),
    #[serde(rename = "app.bsky.actor.profile")]
    Profile(Profile),
}

impl KnownRecord {
    pub fn collection(&self) -> &'static str {
        match self {
            KnownRecord::Post(_) => NSID_POST,
            KnownRecord::Like(_) => NSID_LIKE,
            KnownRecord::Repost(_) => NSID_REPOST,
            KnownRecord::Follow(_) => NSID_FOLLOW,
            KnownRecord::Profile(_) => NSID_PROFILE,
        }
    }
}

pub fn is_known_collection(collection: &str) -> bool {
    matches!(
        collection,
        NSID_POST | NSID_LIKE | NSID_REPOST | NSID_FOLLOW | NSID_PROFILE
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dispatches_on_record_type() {
        let record: KnownRecord = serde_json::from_value(json!({
            "$type": "app.bsky.graph.follow",
            "createdAt": "2024-05-01T12:00:00Z",
            "subject": "did:plc:bob"
        }))
        .unwrap();
        assert!(matches!(record, KnownRecord::Follow(_)));
        assert_eq!(record.collection(), NSID_FOLLOW);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let result: Result<KnownRecord, _> = serde_json::from_value(json!({
            "$type": "app.bsky.feed.generator",
            "did": "did:web:feeds.example"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn known_collections() {
        assert!(is_known_collection(NSID_POST));
        assert!(is_known_collection(NSID_PROFILE));
        assert!(!is_known_collection("app.bsky.feed.generator"));
    }
}
