use crate::api::AppViewClient;
use crate::cache::PresenceCaches;
use crate::db::{ActorInsert, GraphStore, PostRow};
use crate::sanitize::{clean_opt, clean_text};
use crate::IngesterError;
use futures::future::BoxFuture;
use skygraph_lexicon::app::bsky::embed::{Embeds, Image, MediaUnion};
use skygraph_lexicon::app::bsky::feed::{Post, PostLabels};
use tokio_postgres::error::SqlState;
use tracing::{debug, warn};

fn is_handle_conflict(err: &IngesterError) -> bool {
    matches!(err, IngesterError::Postgres(e) if e.as_db_error().is_some_and(|db| {
        db.code() == &SqlState::UNIQUE_VIOLATION && db.constraint() == Some("actor_handle_key")
    }))
}

/// Text-bearing pieces extracted from a post embed. An external card with
/// every field empty collapses to nothing.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct EmbedParts {
    pub external: Option<(String, String, String)>,
    pub alt_text: Option<String>,
    pub quoted_uri: Option<String>,
}

fn joined_alts(images: &[Image]) -> Option<String> {
    let joined = images
        .iter()
        .map(|i| clean_text(&i.alt))
        .filter(|alt| !alt.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    (!joined.is_empty()).then_some(joined)
}

fn external_parts(uri: &str, title: &str, description: &str) -> Option<(String, String, String)> {
    let (uri, title, description) = (clean_text(uri), clean_text(title), clean_text(description));
    if uri.is_empty() && title.is_empty() && description.is_empty() {
        return None;
    }
    Some((title, description, uri))
}

pub(crate) fn embed_parts(embed: Option<&Embeds>) -> EmbedParts {
    let mut parts = EmbedParts::default();
    match embed {
        Some(Embeds::Images(images)) => parts.alt_text = joined_alts(&images.images),
        Some(Embeds::Video(video)) => {
            parts.alt_text = video
                .alt
                .as_deref()
                .map(clean_text)
                .filter(|alt| !alt.is_empty());
        }
        Some(Embeds::External(external)) => {
            let e = &external.external;
            parts.external = external_parts(&e.uri, &e.title, &e.description);
        }
        Some(Embeds::Record(record)) => parts.quoted_uri = Some(record.record.uri.clone()),
        Some(Embeds::RecordWithMedia(rwm)) => {
            parts.quoted_uri = Some(rwm.record.record.uri.clone());
            match &rwm.media {
                MediaUnion::Images(images) => parts.alt_text = joined_alts(&images.images),
                MediaUnion::Video(video) => {
                    parts.alt_text = video
                        .alt
                        .as_deref()
                        .map(clean_text)
                        .filter(|alt| !alt.is_empty());
                }
                MediaUnion::External(external) => {
                    let e = &external.external;
                    parts.external = external_parts(&e.uri, &e.title, &e.description);
                }
            }
        }
        None => {}
    }
    parts
}

fn self_label_values(labels: Option<&PostLabels>) -> Vec<String> {
    match labels {
        Some(PostLabels::SelfLabels(labels)) => labels
            .values
            .iter()
            .map(|label| clean_text(&label.val))
            .collect(),
        None => Vec::new(),
    }
}

/// Idempotent materialization of users and posts. A soft miss (referent gone
/// upstream) is `Ok(None)`; callers treat the referent as nonexistent.
pub struct Resolver {
    store: GraphStore,
    api: AppViewClient,
    caches: PresenceCaches,
}

impl Resolver {
    pub fn new(store: GraphStore, api: AppViewClient, caches: PresenceCaches) -> Self {
        Self { store, api, caches }
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn caches(&self) -> &PresenceCaches {
        &self.caches
    }

    /// Ensure a User row exists for `did`, lazily fetching the profile when
    /// needed. Handles held by another DID are reconciled against the
    /// upstream's current view: the previous owner is refreshed to their
    /// current handle, or deleted if gone.
    pub async fn resolve_user(&self, did: &str) -> Result<Option<String>, IngesterError> {
        if self.caches.user_seen(did) {
            return Ok(Some(did.to_owned()));
        }
        if self.store.get_actor(did).await?.is_some() {
            self.caches.mark_user(did);
            return Ok(Some(did.to_owned()));
        }

        let Some(profile) = self.api.get_profile(did).await? else {
            return Ok(None);
        };
        let handle = clean_text(&profile.handle);
        let display_name = clean_text(profile.display_name.as_deref().unwrap_or(&profile.handle));
        let bio = clean_text(profile.description.as_deref().unwrap_or(""));

        match self
            .store
            .insert_actor(did, &handle, &display_name, &bio)
            .await?
        {
            ActorInsert::Inserted => {}
            ActorInsert::DidHeld => {
                // a concurrent resolver for the same DID won the race
                debug!("actor {did} inserted concurrently");
            }
            ActorInsert::HandleHeld => {
                let holder = self.store.get_actor_by_handle(&handle).await?;
                match holder {
                    Some(holder) if holder.did != did => {
                        self.refresh_or_evict(&holder.did).await?;
                        match self
                            .store
                            .insert_actor(did, &handle, &display_name, &bio)
                            .await?
                        {
                            ActorInsert::Inserted => {}
                            ActorInsert::DidHeld | ActorInsert::HandleHeld => {
                                self.store.update_actor_handle(did, &handle).await?;
                            }
                        }
                    }
                    // the conflicting row is already us, or vanished meanwhile
                    _ => {}
                }
            }
        }

        self.caches.mark_user(did);
        Ok(Some(did.to_owned()))
    }

    /// The previous owner of a moved handle either has a new handle by now
    /// or no longer exists; make the row agree with upstream.
    async fn refresh_or_evict(&self, did: &str) -> Result<(), IngesterError> {
        match self.api.get_profile(did).await? {
            None => {
                warn!("previous handle owner {did} is gone, deleting");
                self.store.delete_actor(did).await?;
                self.caches.purge_user(did);
            }
            Some(profile) => {
                self.store
                    .update_actor_handle(did, &clean_text(&profile.handle))
                    .await?;
            }
        }
        Ok(())
    }

    /// Point `did` at a new handle, reconciling first if some other actor
    /// still holds it.
    pub async fn set_handle(&self, did: &str, handle: &str) -> Result<(), IngesterError> {
        let handle = clean_text(handle);
        match self.store.update_actor_handle(did, &handle).await {
            Err(e) if is_handle_conflict(&e) => {
                if let Some(holder) = self.store.get_actor_by_handle(&handle).await? {
                    if holder.did != did {
                        self.refresh_or_evict(&holder.did).await?;
                    }
                }
                self.store.update_actor_handle(did, &handle).await
            }
            other => other,
        }
    }

    /// Ensure a Post row exists for `uri`, lazily fetching and materializing
    /// it (and its reference chain) when needed.
    pub fn resolve_post<'a>(
        &'a self,
        uri: &'a str,
    ) -> BoxFuture<'a, Result<Option<String>, IngesterError>> {
        Box::pin(async move {
            if self.caches.post_seen(uri) {
                return Ok(Some(uri.to_owned()));
            }
            if self.store.post_exists(uri).await? {
                self.caches.mark_post(uri);
                return Ok(Some(uri.to_owned()));
            }

            let Some(view) = self.api.get_post(uri).await? else {
                return Ok(None);
            };
            if view.author.did.is_empty() {
                return Err(IngesterError::Serialization(format!(
                    "post view for {uri} carries no author did"
                )));
            }
            let record: Post = serde_json::from_value(view.record.clone()).map_err(|e| {
                IngesterError::Serialization(format!("post view for {uri} is not a feed post: {e}"))
            })?;

            match self
                .insert_post_record(&record, &view.author.did, &view.uri, &view.cid)
                .await?
            {
                Some(()) => {
                    self.caches.mark_post(uri);
                    Ok(Some(view.uri))
                }
                None => Ok(None),
            }
        })
    }

    /// Materialize one post row, resolving author and parent/root/quoted
    /// references first. Soft-missed references are left unset; a soft-missed
    /// author skips the post entirely.
    pub async fn insert_post_record(
        &self,
        record: &Post,
        repo: &str,
        uri: &str,
        cid: &str,
    ) -> Result<Option<()>, IngesterError> {
        let Some(creator) = self.resolve_user(repo).await? else {
            return Ok(None);
        };

        let labels = self_label_values(record.labels.as_ref());
        let parts = embed_parts(record.embed.as_ref());

        let (parent_uri, root_uri) = match &record.reply {
            Some(reply) => (Some(reply.parent.uri.clone()), Some(reply.root.uri.clone())),
            None => (None, None),
        };

        let parent = match &parent_uri {
            Some(parent_uri) => self.resolve_post(parent_uri).await.map_err(|e| {
                IngesterError::Other(format!("resolving parent {parent_uri} of {uri}: {e}"))
            })?,
            None => None,
        };
        let root = match &root_uri {
            Some(root_uri) if Some(root_uri.as_str()) == parent_uri.as_deref() => parent.clone(),
            Some(root_uri) => self.resolve_post(root_uri).await.map_err(|e| {
                IngesterError::Other(format!("resolving root {root_uri} of {uri}: {e}"))
            })?,
            None => None,
        };
        let quoted = match &parts.quoted_uri {
            Some(quoted_uri) => self.resolve_post(quoted_uri).await.map_err(|e| {
                IngesterError::Other(format!("resolving quote {quoted_uri} of {uri}: {e}"))
            })?,
            None => None,
        };

        let (embed_title, embed_description, embed_uri) = match parts.external {
            Some((title, description, uri)) => (Some(title), Some(description), Some(uri)),
            None => (None, None, None),
        };

        let row = PostRow {
            uri: uri.to_owned(),
            cid: cid.to_owned(),
            creator,
            text: clean_text(&record.text),
            created_at: record.created_at,
            embed_title,
            embed_description,
            embed_uri,
            alt_text: parts.alt_text,
            reply_parent: parent,
            reply_root: root,
            quoted,
            langs: record
                .langs
                .iter()
                .flatten()
                .map(|lang| clean_text(lang))
                .collect(),
            tags: record
                .tags
                .iter()
                .flatten()
                .map(|tag| clean_text(tag))
                .collect(),
            labels,
        };

        self.store.insert_post(&row).await?;
        self.caches.mark_post(uri);
        Ok(Some(()))
    }
}
