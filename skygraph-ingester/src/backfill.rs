use crate::handlers;
use crate::resolver::Resolver;
use crate::IngesterError;
use skygraph_firehose::{car, ipld, repo};
use skygraph_lexicon::com::atproto::sync::ListReposOutput;
use skygraph_lexicon::record::{is_known_collection, KnownRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const LIST_REPOS_PAGE_SIZE: u32 = 500;

/// One-shot historical backfill: paginate listRepos, fetch each repo CAR,
/// and feed every known record through the same create handlers the live
/// stream uses. Idempotent upserts make overlap with the stream harmless.
pub struct BackfillDriver {
    http: reqwest::Client,
    relay_host: String,
    resolver: Arc<Resolver>,
}

impl BackfillDriver {
    pub fn new(relay_host: &str, resolver: Arc<Resolver>) -> Result<Self, IngesterError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        let clean_host = relay_host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');
        Ok(Self {
            http,
            relay_host: clean_host.to_owned(),
            resolver,
        })
    }

    pub async fn run(&self) -> Result<(), IngesterError> {
        let mut cursor: Option<String> = None;
        let mut repos_seen = 0u64;

        loop {
            let page = self.list_repos(cursor.as_deref()).await?;
            for repo_ref in &page.repos {
                if !repo_ref.active.unwrap_or(true) {
                    debug!("skipping inactive repo {}", repo_ref.did);
                    continue;
                }
                repos_seen += 1;
                if let Err(e) = self.backfill_repo(&repo_ref.did).await {
                    warn!("backfill of {} failed: {e}", repo_ref.did);
                }
            }

            match page.cursor {
                Some(next) if !page.repos.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!("backfill complete, {repos_seen} repos processed");
        Ok(())
    }

    async fn list_repos(&self, cursor: Option<&str>) -> Result<ListReposOutput, IngesterError> {
        let url = format!(
            "https://{}/xrpc/com.atproto.sync.listRepos",
            self.relay_host
        );
        let mut query = vec![("limit", LIST_REPOS_PAGE_SIZE.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_owned()));
        }

        let resp = self.http.get(&url).query(&query).send().await?;
        if !resp.status().is_success() {
            return Err(IngesterError::Other(format!(
                "listRepos failed: {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn backfill_repo(&self, did: &str) -> Result<(), IngesterError> {
        let url = format!(
            "https://{}/xrpc/com.atproto.sync.getRepo?did={did}",
            self.relay_host
        );
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(IngesterError::Other(format!(
                "getRepo {did} failed: {}",
                resp.status()
            )));
        }
        let car_bytes = resp.bytes().await?;

        let car = car::read_car(&car_bytes).await?;
        let Some(root) = car.roots.first() else {
            return Err(IngesterError::Other(format!("repo {did} CAR has no root")));
        };
        let (commit, entries) = repo::walk(&car.blocks, root)?;
        if commit.did != did {
            return Err(IngesterError::Other(format!(
                "repo CAR did mismatch: expected {did}, got {}",
                commit.did
            )));
        }

        let mut records = 0u64;
        for entry in &entries {
            let Some((collection, _rkey)) = handlers::split_path(&entry.key) else {
                continue;
            };
            if !is_known_collection(collection) {
                continue;
            }
            let Some(block) = car.blocks.get(&entry.cid) else {
                debug!("leaf {} of {did} missing from CAR, skipping", entry.key);
                continue;
            };

            let json = ipld::json_from_block(block)
                .map_err(|e| IngesterError::Serialization(e.to_string()))?;
            let record: KnownRecord = match serde_json::from_value(json) {
                Ok(record) => record,
                Err(e) => {
                    debug!("undecodable record {} in {did}: {e}", entry.key);
                    continue;
                }
            };

            let uri = format!("at://{did}/{}", entry.key);
            if let Err(e) = handlers::dispatch_create(
                &self.resolver,
                did,
                &uri,
                &entry.cid.to_string(),
                &record,
            )
            .await
            {
                warn!("backfill of {uri} failed: {e}");
                continue;
            }
            records += 1;
        }

        debug!("backfilled {records} records from {did}");
        Ok(())
    }
}
