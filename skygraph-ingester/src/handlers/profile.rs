use crate::resolver::Resolver;
use crate::sanitize::clean_opt;
use crate::IngesterError;
use skygraph_lexicon::app::bsky::actor::Profile;
use tracing::warn;

/// The firehose profile record carries no handle, so creation goes through
/// the resolver's getProfiles fetch.
pub async fn create(resolver: &Resolver, repo: &str) -> Result<(), IngesterError> {
    if resolver.resolve_user(repo).await?.is_none() {
        warn!("skipping profile create: {repo} is gone upstream");
    }
    Ok(())
}

/// Profile update with null-coalescing assignment: absent fields keep their
/// stored value. An empty record amounts to a presence refresh, which is how
/// #identity messages are applied.
pub async fn update(resolver: &Resolver, repo: &str, record: &Profile) -> Result<(), IngesterError> {
    let Some(did) = resolver.resolve_user(repo).await? else {
        warn!("skipping profile update: {repo} is gone upstream");
        return Ok(());
    };
    resolver
        .store()
        .update_actor_profile(
            &did,
            clean_opt(record.display_name.as_deref()).as_deref(),
            clean_opt(record.description.as_deref()).as_deref(),
        )
        .await
}

pub async fn update_handle(
    resolver: &Resolver,
    did: &str,
    handle: &str,
) -> Result<(), IngesterError> {
    if resolver.resolve_user(did).await?.is_none() {
        warn!("skipping handle update: {did} is gone upstream");
        return Ok(());
    }
    resolver.set_handle(did, handle).await
}

/// Tombstone: the actor row goes away and their posts cascade with it.
pub async fn delete(resolver: &Resolver, did: &str) -> Result<(), IngesterError> {
    resolver.store().delete_actor(did).await?;
    resolver.caches().purge_user(did);
    Ok(())
}
