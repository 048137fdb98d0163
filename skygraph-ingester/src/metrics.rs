use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_gauge, Encoder, IntCounter, IntGauge, TextEncoder,
};

lazy_static! {
    /// Total events received from the firehose
    pub static ref FIREHOSE_EVENTS_TOTAL: IntCounter = register_int_counter!(
        "skygraph_firehose_events_total",
        "Total events received from the firehose"
    )
    .unwrap();

    /// Total commit messages processed
    pub static ref COMMITS_TOTAL: IntCounter = register_int_counter!(
        "skygraph_commits_total",
        "Total commit messages processed"
    )
    .unwrap();

    /// Total record operations dispatched to handlers
    pub static ref RECORD_OPS_TOTAL: IntCounter = register_int_counter!(
        "skygraph_record_ops_total",
        "Total record operations dispatched to handlers"
    )
    .unwrap();

    /// Messages whose processing threw and were captured for replay
    pub static ref HANDLER_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "skygraph_handler_failures_total",
        "Messages whose processing failed and were captured for replay"
    )
    .unwrap();

    /// Captured messages replayed successfully at startup
    pub static ref FAILED_REPLAYED_TOTAL: IntCounter = register_int_counter!(
        "skygraph_failed_replayed_total",
        "Captured messages replayed successfully at startup"
    )
    .unwrap();

    /// Captured messages dropped after exhausting their retries
    pub static ref FAILED_DROPPED_TOTAL: IntCounter = register_int_counter!(
        "skygraph_failed_dropped_total",
        "Captured messages dropped after exhausting their retries"
    )
    .unwrap();

    /// Outbound API calls started by the rate limiter
    pub static ref API_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "skygraph_api_requests_total",
        "Outbound API calls started by the rate limiter"
    )
    .unwrap();

    /// Outbound API calls retried after a transient failure
    pub static ref API_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "skygraph_api_retries_total",
        "Outbound API calls retried after a transient failure"
    )
    .unwrap();

    /// Firehose events per second over the last sample window
    pub static ref EVENTS_PER_SECOND: IntGauge = register_int_gauge!(
        "skygraph_events_per_second",
        "Firehose events per second over the last sample window"
    )
    .unwrap();

    /// Active WebSocket connections
    pub static ref WEBSOCKET_CONNECTIONS: IntGauge = register_int_gauge!(
        "skygraph_websocket_connections",
        "Active WebSocket connections"
    )
    .unwrap();

    /// Length of the failed-message queue
    pub static ref FAILED_QUEUE_LENGTH: IntGauge = register_int_gauge!(
        "skygraph_failed_queue_length",
        "Length of the failed-message queue"
    )
    .unwrap();
}

/// Touch every metric so it is registered before the first scrape.
pub fn initialize_metrics() {
    FIREHOSE_EVENTS_TOTAL.reset();
    COMMITS_TOTAL.reset();
    RECORD_OPS_TOTAL.reset();
    HANDLER_FAILURES_TOTAL.reset();
    FAILED_REPLAYED_TOTAL.reset();
    FAILED_DROPPED_TOTAL.reset();
    API_REQUESTS_TOTAL.reset();
    API_RETRIES_TOTAL.reset();
    EVENTS_PER_SECOND.set(0);
    WEBSOCKET_CONNECTIONS.set(0);
    FAILED_QUEUE_LENGTH.set(0);
}

/// Encode metrics for Prometheus scraping
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
