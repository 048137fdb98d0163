use crate::resolver::Resolver;
use crate::IngesterError;
use skygraph_lexicon::app::bsky::graph::Follow;
use tracing::warn;

/// The followers edge lives on the *subject*: `subject.followers += author`.
pub async fn create(
    resolver: &Resolver,
    repo: &str,
    uri: &str,
    record: &Follow,
) -> Result<(), IngesterError> {
    let Some(subject) = resolver.resolve_user(&record.subject).await? else {
        warn!("skipping follow {uri}: subject {} is gone", record.subject);
        return Ok(());
    };
    let Some(did) = resolver.resolve_user(repo).await? else {
        warn!("skipping follow {uri}: author {repo} is gone");
        return Ok(());
    };
    let Some((_, _, rkey)) = crate::handlers::parse_at_uri(uri) else {
        return Err(IngesterError::Serialization(format!(
            "follow uri {uri} has no rkey"
        )));
    };

    resolver.store().add_follow(&subject, &did, rkey).await
}

pub async fn delete(resolver: &Resolver, repo: &str, rkey: &str) -> Result<(), IngesterError> {
    resolver.store().remove_follow(repo, rkey).await
}
