use crate::resolver::Resolver;
use crate::IngesterError;
use skygraph_lexicon::app::bsky::feed::Repost;
use tracing::warn;

pub async fn create(
    resolver: &Resolver,
    repo: &str,
    uri: &str,
    record: &Repost,
) -> Result<(), IngesterError> {
    let Some(post_uri) = resolver.resolve_post(&record.subject.uri).await? else {
        warn!(
            "skipping repost {uri}: subject {} is gone",
            record.subject.uri
        );
        return Ok(());
    };
    let Some(did) = resolver.resolve_user(repo).await? else {
        warn!("skipping repost {uri}: author {repo} is gone");
        return Ok(());
    };
    let Some((_, _, rkey)) = crate::handlers::parse_at_uri(uri) else {
        return Err(IngesterError::Serialization(format!(
            "repost uri {uri} has no rkey"
        )));
    };

    resolver.store().add_repost(&post_uri, &did, rkey).await
}

pub async fn delete(resolver: &Resolver, repo: &str, rkey: &str) -> Result<(), IngesterError> {
    resolver.store().remove_repost(repo, rkey).await
}
