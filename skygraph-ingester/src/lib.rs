pub mod api;
pub mod backfill;
pub mod batcher;
pub mod cache;
pub mod coalesce;
pub mod config;
pub mod db;
pub mod firehose;
pub mod handlers;
pub mod limiter;
pub mod metrics;
pub mod resolver;
pub mod sanitize;
pub mod storage;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngesterError {
    #[error("storage error: {0}")]
    Storage(#[from] fjall::Error),
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error: {0}")]
    Api(#[from] api::ApiError),
    #[error("frame error: {0}")]
    Frame(#[from] skygraph_firehose::firehose::FrameError),
    #[error("car error: {0}")]
    Car(#[from] skygraph_firehose::car::CarError),
    #[error("repo error: {0}")]
    Repo(#[from] skygraph_firehose::repo::RepoError),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("{0}")]
    Other(String),
}

impl IngesterError {
    /// True when this error came from an explicit relay error frame, which
    /// ends the subscription for good.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngesterError::Frame(skygraph_firehose::firehose::FrameError::ErrorFrame { .. })
        )
    }
}
