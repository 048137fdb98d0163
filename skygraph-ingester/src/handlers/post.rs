use crate::resolver::Resolver;
use crate::IngesterError;
use skygraph_lexicon::app::bsky::feed::Post;
use tracing::warn;

pub async fn create(
    resolver: &Resolver,
    repo: &str,
    uri: &str,
    cid: &str,
    record: &Post,
) -> Result<(), IngesterError> {
    match resolver.insert_post_record(record, repo, uri, cid).await? {
        Some(()) => Ok(()),
        None => {
            warn!("skipping post {uri}: author no longer exists upstream");
            Ok(())
        }
    }
}

/// Cascade policies on the edge tables take care of likes/reposts pointing
/// at the deleted row; reply/quote links on other posts are cleared.
pub async fn delete(resolver: &Resolver, uri: &str) -> Result<(), IngesterError> {
    resolver.store().delete_post(uri).await?;
    resolver.caches().purge_post(uri);
    Ok(())
}
