use crate::config::{
    EPS_HOT, EPS_WARM, FAILED_MAX_ATTEMPTS, FIREHOSE_PING_INTERVAL, INLINE_CONCURRENCY,
    MIN_TIME_HOT, MIN_TIME_WARM, RECONNECT_DELAY, THROTTLE_SAMPLE_INTERVAL,
};
use crate::handlers;
use crate::limiter::RateLimiter;
use crate::metrics;
use crate::resolver::Resolver;
use crate::storage::{CursorStore, Storage};
use crate::IngesterError;
use futures_util::{SinkExt, StreamExt};
use skygraph_firehose::{car, firehose, ipld};
use skygraph_lexicon::com::atproto::sync::{SubscribeRepos, SubscribeReposCommit};
use skygraph_lexicon::record::{is_known_collection, KnownRecord, NSID_PROFILE};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub relay_host: String,
    pub verbose: bool,
}

/// Outbound min-time override for the observed event rate, or `None` for the
/// baseline. Expensive resolver fan-out is throttled while the firehose runs
/// hot.
pub fn throttle_for(eps: u64) -> Option<Duration> {
    if eps >= EPS_HOT {
        Some(MIN_TIME_HOT)
    } else if eps >= EPS_WARM {
        Some(MIN_TIME_WARM)
    } else {
        None
    }
}

/// Failed-message queue key for a message: `<repo>::<rev>` for commits,
/// `<did>::<kind>` otherwise.
pub fn failure_key(body: &SubscribeRepos) -> Option<String> {
    match body {
        SubscribeRepos::Commit(c) => Some(format!("{}::{}", c.repo, c.rev)),
        SubscribeRepos::Handle(h) => Some(format!("{}::handle", h.did)),
        SubscribeRepos::Identity(i) => Some(format!("{}::identity", i.did)),
        SubscribeRepos::Account(a) => Some(format!("{}::account", a.did)),
        SubscribeRepos::Tombstone(t) => Some(format!("{}::tombstone", t.did)),
        SubscribeRepos::Info(_) => None,
    }
}

/// Subscribes to the relay's subscribeRepos stream and projects every
/// message into the graph store, advancing the durable cursor as it goes.
#[derive(Clone)]
pub struct FirehoseConsumer {
    config: ConsumerConfig,
    resolver: Arc<Resolver>,
    storage: Arc<Storage>,
    cursor: Arc<CursorStore>,
    limiter: Arc<RateLimiter>,
    semaphore: Arc<Semaphore>,
    events_seen: Arc<AtomicU64>,
}

impl FirehoseConsumer {
    pub fn new(
        config: ConsumerConfig,
        resolver: Arc<Resolver>,
        storage: Arc<Storage>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        let cursor = Arc::new(CursorStore::new(Arc::clone(&storage), &config.relay_host));
        Self {
            config,
            resolver,
            storage,
            cursor,
            limiter,
            semaphore: Arc::new(Semaphore::new(*INLINE_CONCURRENCY)),
            events_seen: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replay captured failures, then subscribe and keep reconnecting. Only
    /// an explicit relay error frame ends the pipeline.
    pub async fn run(&self) -> Result<(), IngesterError> {
        if self.config.verbose {
            info!("starting firehose consumer for {}", self.config.relay_host);
        }

        self.replay_failed().await?;

        let _flusher = self.cursor.spawn_flusher();
        let _throttle = self.spawn_throttle_task();

        loop {
            match self.connect_and_stream().await {
                Ok(()) => {
                    warn!("connection closed, reconnecting in {RECONNECT_DELAY:?}");
                }
                Err(e) if e.is_terminal() => {
                    error!("relay ended the subscription: {e}");
                    self.cursor.flush()?;
                    return Err(e);
                }
                Err(e) => {
                    error!("connection error: {e}, reconnecting in {RECONNECT_DELAY:?}");
                }
            }
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    async fn connect_and_stream(&self) -> Result<(), IngesterError> {
        let clean_host = self
            .config
            .relay_host
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/');

        let mut url = url::Url::parse(&format!(
            "wss://{clean_host}/xrpc/com.atproto.sync.subscribeRepos"
        ))
        .map_err(|e| IngesterError::Other(format!("invalid relay url: {e}")))?;

        let cursor = self.cursor.load()?;
        if let Some(cursor) = cursor {
            url.query_pairs_mut()
                .append_pair("cursor", &cursor.to_string());
        }

        info!("connecting to {url} (cursor {cursor:?})");

        let (ws_stream, _) = connect_async(url.as_str()).await?;
        metrics::WEBSOCKET_CONNECTIONS.inc();
        let (mut write, mut read) = ws_stream.split();

        let ping_task = tokio::spawn(async move {
            let mut ping_interval = interval(FIREHOSE_PING_INTERVAL);
            loop {
                ping_interval.tick().await;
                if write.send(Message::Ping(vec![])).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            let Some(msg_result) = read.next().await else {
                break Ok(());
            };
            match msg_result {
                Ok(Message::Binary(data)) => {
                    metrics::FIREHOSE_EVENTS_TOTAL.inc();
                    self.events_seen.fetch_add(1, Ordering::Relaxed);

                    // Decode inline so an error frame can end the pipeline;
                    // handler work runs on bounded tasks.
                    let body = match firehose::read(&data) {
                        Ok((_header, body)) => body,
                        Err(e @ firehose::FrameError::ErrorFrame { .. }) => {
                            break Err(IngesterError::Frame(e));
                        }
                        Err(e) => {
                            warn!("dropping undecodable frame: {e}");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&self.semaphore).acquire_owned().await else {
                        break Ok(());
                    };
                    let consumer = self.clone();
                    tokio::spawn(async move {
                        consumer.handle_event(body, data).await;
                        drop(permit);
                    });
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    info!("websocket closed: {frame:?}");
                    break Ok(());
                }
                Ok(msg) => {
                    debug!("unexpected message type: {msg:?}");
                }
                Err(e) => break Err(e.into()),
            }
        };

        metrics::WEBSOCKET_CONNECTIONS.dec();
        ping_task.abort();
        result
    }

    /// Apply one message, capturing failures into the durable queue. The
    /// cursor advances either way; the failed message is durably held for
    /// replay.
    async fn handle_event(&self, body: SubscribeRepos, raw: Vec<u8>) {
        let seq = body.seq();

        if let Err(e) = self.apply_message(&body).await {
            metrics::HANDLER_FAILURES_TOTAL.inc();
            if let Some(key) = failure_key(&body) {
                warn!("processing {key} failed: {e}, capturing for replay");
                if let Err(push_err) = self.storage.push_failed(&key, &raw, 0) {
                    error!("failed to capture {key}: {push_err}");
                }
            } else {
                warn!("processing failed: {e}");
            }
        }

        if let Some(seq) = seq {
            self.cursor.advance(seq);
        }
    }

    async fn apply_message(&self, body: &SubscribeRepos) -> Result<(), IngesterError> {
        match body {
            SubscribeRepos::Commit(commit) => {
                metrics::COMMITS_TOTAL.inc();
                self.apply_commit(commit).await
            }
            SubscribeRepos::Handle(handle) => {
                handlers::profile::update_handle(&self.resolver, &handle.did, &handle.handle).await
            }
            SubscribeRepos::Identity(identity) => {
                // treated as "refresh profile by DID"
                handlers::profile::update(&self.resolver, &identity.did, &Default::default()).await
            }
            SubscribeRepos::Account(account) => {
                use skygraph_lexicon::com::atproto::sync::AccountStatus;
                if !account.active && account.status == Some(AccountStatus::Deleted) {
                    handlers::profile::delete(&self.resolver, &account.did).await
                } else {
                    debug!(
                        "account {} active={} status={:?}",
                        account.did, account.active, account.status
                    );
                    Ok(())
                }
            }
            SubscribeRepos::Tombstone(tombstone) => {
                handlers::profile::delete(&self.resolver, &tombstone.did).await
            }
            SubscribeRepos::Info(info) => {
                info!("info frame from relay: {} {:?}", info.name, info.message);
                Ok(())
            }
        }
    }

    async fn apply_commit(&self, commit: &SubscribeReposCommit) -> Result<(), IngesterError> {
        if commit.blocks.is_empty() {
            return Ok(());
        }

        let car = car::read_car(&commit.blocks).await?;

        for op in &commit.ops {
            let uri = format!("at://{}/{}", commit.repo, op.path);

            match op.action.as_str() {
                "create" | "update" => {
                    let Some(cid) = op.cid else { continue };
                    let Some(block) = car.blocks.get(&cid) else {
                        debug!("op {uri} references cid {cid} absent from block map, skipping");
                        continue;
                    };

                    let json = ipld::json_from_block(block)
                        .map_err(|e| IngesterError::Serialization(e.to_string()))?;
                    let record_type = json
                        .get("$type")
                        .and_then(|t| t.as_str())
                        .unwrap_or("")
                        .to_string();
                    if !is_known_collection(&record_type) {
                        continue;
                    }
                    let record: KnownRecord = serde_json::from_value(json).map_err(|e| {
                        IngesterError::Serialization(format!("invalid {record_type} record: {e}"))
                    })?;

                    metrics::RECORD_OPS_TOTAL.inc();
                    if op.action == "create" {
                        handlers::dispatch_create(
                            &self.resolver,
                            &commit.repo,
                            &uri,
                            &cid.to_string(),
                            &record,
                        )
                        .await?;
                    } else if let KnownRecord::Profile(profile) = &record {
                        handlers::profile::update(&self.resolver, &commit.repo, profile).await?;
                    }
                }
                "delete" => {
                    let Some((collection, rkey)) = handlers::split_path(&op.path) else {
                        debug!("delete op with malformed path {:?}", op.path);
                        continue;
                    };
                    if !is_known_collection(collection) || collection == NSID_PROFILE {
                        continue;
                    }
                    metrics::RECORD_OPS_TOTAL.inc();
                    handlers::dispatch_delete(&self.resolver, &commit.repo, &uri, collection, rkey)
                        .await?;
                }
                other => {
                    debug!("unknown op action {other:?} for {uri}");
                }
            }
        }

        Ok(())
    }

    /// Drain the failed-message queue: re-run each entry, remove it on
    /// success, bump its counter on failure, and discard it after three
    /// attempts.
    pub async fn replay_failed(&self) -> Result<(), IngesterError> {
        let entries = self.storage.iter_failed()?;
        if entries.is_empty() {
            return Ok(());
        }
        info!("replaying {} captured messages", entries.len());

        for (key, failed) in entries {
            match self.process_raw(&failed.message).await {
                Ok(()) => {
                    metrics::FAILED_REPLAYED_TOTAL.inc();
                    self.storage.remove_failed(&key)?;
                    info!("replayed {key}");
                }
                Err(e) => {
                    let retries = failed.retries + 1;
                    if retries >= FAILED_MAX_ATTEMPTS {
                        metrics::FAILED_DROPPED_TOTAL.inc();
                        self.storage.remove_failed(&key)?;
                        warn!("dropping {key} after {retries} attempts: {e}");
                    } else {
                        self.storage.push_failed(&key, &failed.message, retries)?;
                        warn!("replay of {key} failed (attempt {retries}): {e}");
                    }
                }
            }
        }

        metrics::FAILED_QUEUE_LENGTH.set(self.storage.failed_len()? as i64);
        Ok(())
    }

    async fn process_raw(&self, data: &[u8]) -> Result<(), IngesterError> {
        let (_header, body) = firehose::read(data)?;
        self.apply_message(&body).await
    }

    /// Sample events per wall-clock second and throttle the outbound rate
    /// limiter while the firehose runs hot.
    fn spawn_throttle_task(&self) -> tokio::task::JoinHandle<()> {
        let events_seen = Arc::clone(&self.events_seen);
        let limiter = Arc::clone(&self.limiter);
        let verbose = self.config.verbose;

        tokio::spawn(async move {
            let mut tick = interval(THROTTLE_SAMPLE_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            let mut last_seen = events_seen.load(Ordering::Relaxed);

            loop {
                tick.tick().await;
                let seen = events_seen.load(Ordering::Relaxed);
                let eps = (seen - last_seen) / THROTTLE_SAMPLE_INTERVAL.as_secs();
                last_seen = seen;

                metrics::EVENTS_PER_SECOND.set(eps as i64);
                match throttle_for(eps) {
                    Some(min_time) => limiter.set_min_time(min_time),
                    None => limiter.reset_min_time(),
                }
                if verbose {
                    info!("{eps} events/s (min_time {:?})", limiter.min_time());
                }
            }
        })
    }
}
