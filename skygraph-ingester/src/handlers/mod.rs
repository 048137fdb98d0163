pub mod follow;
pub mod like;
pub mod post;
pub mod profile;
pub mod repost;

use crate::resolver::Resolver;
use crate::IngesterError;
use skygraph_lexicon::record::KnownRecord;

/// Split a record path `<collection>/<rkey>` into its two segments.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let (collection, rkey) = path.split_once('/')?;
    if collection.is_empty() || rkey.is_empty() {
        return None;
    }
    Some((collection, rkey))
}

/// Split an AT-URI `at://<did>/<collection>/<rkey>` into its segments.
pub fn parse_at_uri(uri: &str) -> Option<(&str, &str, &str)> {
    let rest = uri.strip_prefix("at://")?;
    let (did, path) = rest.split_once('/')?;
    let (collection, rkey) = split_path(path)?;
    if did.is_empty() {
        return None;
    }
    Some((did, collection, rkey))
}

/// Route one decoded create op to its handler.
pub async fn dispatch_create(
    resolver: &Resolver,
    repo: &str,
    uri: &str,
    cid: &str,
    record: &KnownRecord,
) -> Result<(), IngesterError> {
    match record {
        KnownRecord::Post(record) => post::create(resolver, repo, uri, cid, record).await,
        KnownRecord::Like(record) => like::create(resolver, repo, uri, record).await,
        KnownRecord::Repost(record) => repost::create(resolver, repo, uri, record).await,
        KnownRecord::Follow(record) => follow::create(resolver, repo, uri, record).await,
        KnownRecord::Profile(_) => profile::create(resolver, repo).await,
    }
}

/// Route one delete op by its collection prefix. Unknown collections are
/// ignored.
pub async fn dispatch_delete(
    resolver: &Resolver,
    repo: &str,
    uri: &str,
    collection: &str,
    rkey: &str,
) -> Result<(), IngesterError> {
    match collection {
        skygraph_lexicon::record::NSID_POST => post::delete(resolver, uri).await,
        skygraph_lexicon::record::NSID_LIKE => like::delete(resolver, repo, rkey).await,
        skygraph_lexicon::record::NSID_REPOST => repost::delete(resolver, repo, rkey).await,
        skygraph_lexicon::record::NSID_FOLLOW => follow::delete(resolver, repo, rkey).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_record_paths() {
        assert_eq!(
            split_path("app.bsky.feed.post/3kabc"),
            Some(("app.bsky.feed.post", "3kabc"))
        );
        assert_eq!(split_path("app.bsky.feed.post/"), None);
        assert_eq!(split_path("no-slash"), None);
    }

    #[test]
    fn parses_at_uris() {
        assert_eq!(
            parse_at_uri("at://did:plc:alice/app.bsky.feed.like/7"),
            Some(("did:plc:alice", "app.bsky.feed.like", "7"))
        );
        assert_eq!(parse_at_uri("https://example.com"), None);
        assert_eq!(parse_at_uri("at://did:plc:alice"), None);
    }
}
