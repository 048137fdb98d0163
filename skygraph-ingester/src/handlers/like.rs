use crate::resolver::Resolver;
use crate::IngesterError;
use skygraph_lexicon::app::bsky::feed::Like;
use skygraph_lexicon::record::NSID_POST;
use tracing::{debug, warn};

/// Likes can target feed generators as well as posts; only post likes are
/// projected.
pub fn subject_is_post(subject_uri: &str) -> bool {
    subject_uri.contains(NSID_POST)
}

pub async fn create(
    resolver: &Resolver,
    repo: &str,
    uri: &str,
    record: &Like,
) -> Result<(), IngesterError> {
    if !subject_is_post(&record.subject.uri) {
        debug!("skipping like of non-post subject {}", record.subject.uri);
        return Ok(());
    }

    let Some(post_uri) = resolver.resolve_post(&record.subject.uri).await? else {
        warn!("skipping like {uri}: subject {} is gone", record.subject.uri);
        return Ok(());
    };
    let Some(did) = resolver.resolve_user(repo).await? else {
        warn!("skipping like {uri}: author {repo} is gone");
        return Ok(());
    };
    let Some((_, _, rkey)) = crate::handlers::parse_at_uri(uri) else {
        return Err(IngesterError::Serialization(format!(
            "like uri {uri} has no rkey"
        )));
    };

    resolver.store().add_like(&post_uri, &did, rkey).await
}

pub async fn delete(resolver: &Resolver, repo: &str, rkey: &str) -> Result<(), IngesterError> {
    resolver.store().remove_like(repo, rkey).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_generator_likes_are_skipped() {
        assert!(subject_is_post("at://did:plc:a/app.bsky.feed.post/3k"));
        assert!(!subject_is_post(
            "at://did:plc:a/app.bsky.feed.generator/whats-hot"
        ));
    }
}
