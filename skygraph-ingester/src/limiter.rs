use crate::api::ApiError;
use crate::config::{
    BACKOFF_SEED_MS, MAX_RETRIES, MIN_TIME_BASELINE, RESERVOIR_CAPACITY,
    RESERVOIR_REFILL_INTERVAL,
};
use crate::metrics;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Capped exponential backoff for one job id, seeded at 250 ms:
/// 250, 707, 3674, 29393, 328633 ms, then the job is dropped.
#[derive(Debug)]
struct BackoffState {
    retries: u32,
    current_ms: f64,
}

impl Default for BackoffState {
    fn default() -> Self {
        Self {
            retries: 0,
            current_ms: BACKOFF_SEED_MS,
        }
    }
}

impl BackoffState {
    fn next_delay(&mut self) -> Option<Duration> {
        self.retries += 1;
        if self.retries > MAX_RETRIES {
            return None;
        }
        let delay = Duration::from_millis(self.current_ms as u64);
        self.current_ms *= f64::from(self.retries + 1).powf(1.5);
        Some(delay)
    }
}

struct ReservoirState {
    next_start: Option<Instant>,
    tokens: u32,
    refill_at: Option<Instant>,
}

/// Global token-reservoir scheduler for outbound API calls. Enforces a
/// minimum gap between job starts and the upstream request ceiling, retries
/// transient failures with capped backoff, and honors server-advertised
/// rate-limit reset headers.
pub struct RateLimiter {
    state: Mutex<ReservoirState>,
    backoff: Mutex<HashMap<String, BackoffState>>,
    min_time_ms: AtomicU64,
    baseline_min_time: Duration,
    capacity: u32,
    refill_interval: Duration,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_settings(
            MIN_TIME_BASELINE,
            RESERVOIR_CAPACITY,
            RESERVOIR_REFILL_INTERVAL,
        )
    }

    pub fn with_settings(min_time: Duration, capacity: u32, refill_interval: Duration) -> Self {
        Self {
            state: Mutex::new(ReservoirState {
                next_start: None,
                tokens: capacity,
                refill_at: None,
            }),
            backoff: Mutex::new(HashMap::new()),
            min_time_ms: AtomicU64::new(min_time.as_millis() as u64),
            baseline_min_time: min_time,
            capacity,
            refill_interval,
        }
    }

    pub fn min_time(&self) -> Duration {
        Duration::from_millis(self.min_time_ms.load(Ordering::Relaxed))
    }

    pub fn set_min_time(&self, min_time: Duration) {
        self.min_time_ms
            .store(min_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn reset_min_time(&self) {
        self.set_min_time(self.baseline_min_time);
    }

    /// Run `call` under the reservoir, retrying per the failure policy. The
    /// error of the final attempt is returned once retries are exhausted.
    pub async fn schedule<T, F, Fut>(&self, id: &str, mut call: F) -> Result<T, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        loop {
            self.acquire().await;
            metrics::API_REQUESTS_TOTAL.inc();

            match call().await {
                Ok(value) => {
                    self.backoff.lock().await.remove(id);
                    return Ok(value);
                }
                Err(err) => match self.failure_delay(id, &err).await {
                    Some(delay) => {
                        metrics::API_RETRIES_TOTAL.inc();
                        tracing::warn!("job {id} failed ({err}), retrying in {delay:?}");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        self.backoff.lock().await.remove(id);
                        tracing::warn!("job {id} dropped: {err}");
                        return Err(err);
                    }
                },
            }
        }
    }

    async fn acquire(&self) {
        loop {
            let now = Instant::now();
            let mut state = self.state.lock().await;

            let refill_at = *state.refill_at.get_or_insert(now + self.refill_interval);
            if now >= refill_at {
                state.tokens = self.capacity;
                state.refill_at = Some(now + self.refill_interval);
            }

            let next_start = *state.next_start.get_or_insert(now);
            if state.tokens > 0 && now >= next_start {
                state.tokens -= 1;
                state.next_start = Some(now + self.min_time());
                return;
            }

            let wait = if state.tokens == 0 {
                refill_at.saturating_duration_since(now)
            } else {
                next_start.saturating_duration_since(now)
            };
            drop(state);
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    async fn failure_delay(&self, id: &str, err: &ApiError) -> Option<Duration> {
        // A 429 carrying the reset header reschedules without escalation.
        if let Some(delay) = err.ratelimit_reset_delay(chrono::Utc::now().timestamp_millis()) {
            return Some(delay);
        }
        if !err.is_transient() {
            return None;
        }
        let mut backoff = self.backoff.lock().await;
        let delay = backoff.entry(id.to_owned()).or_default().next_delay();
        if delay.is_none() {
            backoff.remove(id);
        }
        delay
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    fn transient() -> ApiError {
        ApiError::Status {
            status: 502,
            message: "bad gateway".to_owned(),
            ratelimit_remaining: None,
            ratelimit_reset: None,
        }
    }

    #[test]
    fn backoff_sequence_matches_policy() {
        let mut state = BackoffState::default();
        let delays: Vec<u64> = std::iter::from_fn(|| state.next_delay())
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![250, 707, 3674, 29393, 328633]);
        assert!(state.next_delay().is_none());
    }

    #[tokio::test]
    async fn reset_header_delay_is_not_escalated() {
        let limiter = RateLimiter::new();
        let now_ms = chrono::Utc::now().timestamp_millis();
        let err = ApiError::Status {
            status: 429,
            message: "rate limited".to_owned(),
            ratelimit_remaining: Some("0".to_owned()),
            ratelimit_reset: Some(now_ms / 1000 + 12),
        };

        let delay = limiter.failure_delay("job", &err).await.unwrap();
        assert!(delay >= Duration::from_secs(10) && delay <= Duration::from_secs(12));
        // the reset path must not consume backoff retries
        assert!(limiter.backoff.lock().await.is_empty());
    }

    #[tokio::test]
    async fn non_transient_errors_are_dropped() {
        let limiter = RateLimiter::new();
        let err = ApiError::Status {
            status: 400,
            message: "invalid request".to_owned(),
            ratelimit_remaining: None,
            ratelimit_reset: None,
        };
        assert!(limiter.failure_delay("job", &err).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn min_time_paces_job_starts() {
        let limiter =
            RateLimiter::with_settings(Duration::from_millis(100), 100, Duration::from_secs(300));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reservoir_waits_for_refill() {
        let limiter =
            RateLimiter::with_settings(Duration::from_millis(1), 2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_retries_transient_failures() {
        let limiter =
            RateLimiter::with_settings(Duration::from_millis(1), 100, Duration::from_secs(300));
        let attempts = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&attempts);
        let result = limiter
            .schedule("job", move || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(transient())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_gives_up_after_five_retries() {
        let limiter =
            RateLimiter::with_settings(Duration::from_millis(1), 1000, Duration::from_secs(300));
        let attempts = Arc::new(AtomicU32::new(0));

        let calls = Arc::clone(&attempts);
        let result: Result<(), _> = limiter
            .schedule("job", move || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(transient())
                }
            })
            .await;

        assert!(result.is_err());
        // the initial attempt plus five retries
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
        assert!(limiter.backoff.lock().await.is_empty());
    }
}
