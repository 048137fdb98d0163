use crate::com::atproto::repo::StrongRef;
use serde::{Deserialize, Serialize};

/// Embed union carried by a feed post. Blob payloads (image bytes, thumbs,
/// video streams) are not projected, so only the text-bearing fields are
/// modeled here; unknown fields are ignored on decode.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum Embeds {
    #[serde(rename = "app.bsky.embed.images")]
    Images(Images),

    #[serde(rename = "app.bsky.embed.video")]
    Video(Video),

    #[serde(
        alias = "app.bsky.embed.external",
        alias = "app.bsky.embed.external#main"
    )]
    External(External),

    #[serde(rename = "app.bsky.embed.record")]
    Record(Record),

    #[serde(rename = "app.bsky.embed.recordWithMedia")]
    RecordWithMedia(RecordWithMedia),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "$type")]
pub enum MediaUnion {
    #[serde(rename = "app.bsky.embed.images")]
    Images(Images),
    #[serde(rename = "app.bsky.embed.video")]
    Video(Video),
    #[serde(rename = "app.bsky.embed.external")]
    External(External),
}

/// A set of images embedded in a Bluesky record (eg, a post).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Images {
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Image {
    /// Alt text description of the image, for accessibility
    #[serde(default)]
    pub alt: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Video {
    /// Alt text description of the video, for accessibility
    #[serde(default)]
    pub alt: Option<String>,
}

/// A representation of some externally linked content (eg, a URL and 'card'),
/// embedded in a Bluesky record (eg, a post).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct External {
    pub external: ExternalObject,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ExternalObject {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
}

/// A representation of a record embedded in a Bluesky record (eg, a post).
/// For example, a quote-post.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Record {
    pub record: StrongRef,
}

/// A record embedded alongside other compatible media. For example, a quote
/// post and image, or a quote post and external URL card.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RecordWithMedia {
    pub record: Record,
    pub media: MediaUnion,
}
