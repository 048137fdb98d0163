use crate::app::bsky::actor::ProfileViewBasic;
use crate::app::bsky::embed::Embeds;
use crate::com::atproto::label::SelfLabels;
use crate::com::atproto::repo::StrongRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.feed.post")]
#[serde(rename_all = "camelCase")]
pub struct Post {
    /// Client-declared timestamp when this post was originally created.
    pub created_at: DateTime<Utc>,
    /// The primary post content. Might be an empty string, if there are embeds.
    pub text: String,
    /// Indicates human language of post primary text content.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub langs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<PostLabels>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embeds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    /// Additional hashtags, in addition to any included in post text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum PostLabels {
    #[serde(rename = "com.atproto.label.defs#selfLabels")]
    SelfLabels(SelfLabels),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.feed.like")]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub created_at: String,
    pub subject: StrongRef,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
#[serde(rename = "app.bsky.feed.repost")]
#[serde(rename_all = "camelCase")]
pub struct Repost {
    pub created_at: String,
    pub subject: StrongRef,
}

/// Hydrated post as returned by app.bsky.feed.getPosts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub uri: String,
    pub cid: String,
    pub author: ProfileViewBasic,
    pub record: Value,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GetPostsOutput {
    pub posts: Vec<PostView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn post_record_parses_with_reply_and_labels() {
        let post: Post = serde_json::from_value(json!({
            "$type": "app.bsky.feed.post",
            "createdAt": "2024-05-01T12:00:00Z",
            "text": "hello",
            "langs": ["en"],
            "labels": {
                "$type": "com.atproto.label.defs#selfLabels",
                "values": [{"val": "porn"}]
            },
            "reply": {
                "root": {"uri": "at://did:plc:a/app.bsky.feed.post/1", "cid": "bafy1"},
                "parent": {"uri": "at://did:plc:a/app.bsky.feed.post/2", "cid": "bafy2"}
            },
            "facets": [{"ignored": true}]
        }))
        .unwrap();

        assert_eq!(post.text, "hello");
        assert_eq!(post.langs, Some(vec!["en".to_owned()]));
        let PostLabels::SelfLabels(labels) = post.labels.unwrap();
        assert_eq!(labels.values[0].val, "porn");
        let reply = post.reply.unwrap();
        assert_eq!(reply.parent.uri, "at://did:plc:a/app.bsky.feed.post/2");
    }

    #[test]
    fn like_subject_is_a_strong_ref() {
        let like: Like = serde_json::from_value(json!({
            "$type": "app.bsky.feed.like",
            "createdAt": "2024-05-01T12:00:00Z",
            "subject": {"uri": "at://did:plc:a/app.bsky.feed.post/1", "cid": "bafy1"}
        }))
        .unwrap();
        assert_eq!(like.subject.uri, "at://did:plc:a/app.bsky.feed.post/1");
    }
}
