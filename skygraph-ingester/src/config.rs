use std::sync::LazyLock;
use std::time::Duration;

// Outbound rate limiting. The upstream contract is 3000 requests per 5
// minutes; the reservoir keeps a 100-token safety margin.
pub const MIN_TIME_BASELINE: Duration = Duration::from_millis(110);
pub const RESERVOIR_CAPACITY: u32 = 2_900;
pub const RESERVOIR_REFILL_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const BACKOFF_SEED_MS: f64 = 250.0;
pub const MAX_RETRIES: u32 = 5;

// getProfiles / getPosts accept at most 25 keys per call.
pub const BATCH_MAX_SIZE: usize = 25;
pub const BATCH_MAX_TIME: Duration = Duration::from_millis(1_000);

// Adaptive throttling of resolver fan-out when the firehose runs hot.
pub const THROTTLE_SAMPLE_INTERVAL: Duration = Duration::from_secs(15);
pub const EPS_HOT: u64 = 350;
pub const EPS_WARM: u64 = 280;
pub const MIN_TIME_HOT: Duration = Duration::from_millis(750);
pub const MIN_TIME_WARM: Duration = Duration::from_millis(300);

pub const PRESENCE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const CURSOR_TTL: Duration = Duration::from_secs(72 * 60 * 60);

pub const FIREHOSE_PING_INTERVAL: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

// Failed messages are replayed at startup and dropped after this many
// attempts.
pub const FAILED_MAX_ATTEMPTS: u32 = 3;

// Cursor writes are coalesced; losing the last few seconds on a crash is
// fine because every handler is idempotent.
pub static CURSOR_SAVE_INTERVAL: LazyLock<Duration> = LazyLock::new(|| {
    let secs = std::env::var("CURSOR_SAVE_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(15);
    Duration::from_secs(secs)
});

pub static INLINE_CONCURRENCY: LazyLock<usize> = LazyLock::new(|| {
    std::env::var("INLINE_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(32)
});

pub static DB_POOL_SIZE: LazyLock<usize> = LazyLock::new(|| {
    std::env::var("DB_POOL_SIZE")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(20)
});
