use crate::api::ApiError;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};

type Waiter<V> = oneshot::Sender<Result<Option<V>, ApiError>>;

/// Groups same-kind outbound calls inside a time/size window into one
/// multi-key request, fanning the keyed result back to per-key waiters.
/// Keys absent from the response resolve to `None`; a failed flush rejects
/// every waiter of that window.
pub struct Batcher<V> {
    tx: mpsc::UnboundedSender<(String, Waiter<V>)>,
}

impl<V> Clone for Batcher<V> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> Batcher<V> {
    pub fn new<P, Fut>(max_size: usize, max_time: Duration, process: P) -> Self
    where
        P: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HashMap<String, V>, ApiError>> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<(String, Waiter<V>)>();

        tokio::spawn(async move {
            let mut pending: HashMap<String, Vec<Waiter<V>>> = HashMap::new();
            let mut deadline: Option<Instant> = None;

            loop {
                let sleep_target =
                    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some((key, waiter)) => {
                            if pending.is_empty() {
                                deadline = Some(Instant::now() + max_time);
                            }
                            pending.entry(key).or_default().push(waiter);
                            if pending.len() >= max_size {
                                flush(&mut pending, &mut deadline, &process).await;
                            }
                        }
                        None => {
                            if !pending.is_empty() {
                                flush(&mut pending, &mut deadline, &process).await;
                            }
                            break;
                        }
                    },
                    () = sleep_until(sleep_target), if deadline.is_some() => {
                        flush(&mut pending, &mut deadline, &process).await;
                    }
                }
            }
        });

        Self { tx }
    }

    /// Enqueue a key into the current window and wait for its slice of the
    /// batched response.
    pub async fn add(&self, key: &str) -> Result<Option<V>, ApiError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send((key.to_owned(), tx))
            .map_err(|_| ApiError::Transport("batcher task is gone".to_owned()))?;
        rx.await
            .map_err(|_| ApiError::Transport("batch flush dropped the waiter".to_owned()))?
    }
}

async fn flush<V, P, Fut>(
    pending: &mut HashMap<String, Vec<Waiter<V>>>,
    deadline: &mut Option<Instant>,
    process: &P,
) where
    V: Clone,
    P: Fn(Vec<String>) -> Fut,
    Fut: Future<Output = Result<HashMap<String, V>, ApiError>>,
{
    *deadline = None;
    let batch = std::mem::take(pending);
    let keys: Vec<String> = batch.keys().cloned().collect();

    match process(keys).await {
        Ok(values) => {
            for (key, waiters) in batch {
                let value = values.get(&key).cloned();
                for waiter in waiters {
                    let _ = waiter.send(Ok(value.clone()));
                }
            }
        }
        Err(err) => {
            for waiters in batch.into_values() {
                for waiter in waiters {
                    let _ = waiter.send(Err(err.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn uppercase_batcher(
        max_size: usize,
        max_time: Duration,
        calls: Arc<AtomicU32>,
    ) -> Batcher<String> {
        Batcher::new(max_size, max_time, move |keys: Vec<String>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(keys
                    .into_iter()
                    .map(|k| (k.clone(), k.to_uppercase()))
                    .collect())
            }
        })
    }

    #[tokio::test]
    async fn full_window_flushes_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let batcher = uppercase_batcher(2, Duration::from_secs(600), Arc::clone(&calls));

        let (a, b) = tokio::join!(batcher.add("alpha"), batcher.add("beta"));
        assert_eq!(a.unwrap().as_deref(), Some("ALPHA"));
        assert_eq!(b.unwrap().as_deref(), Some("BETA"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_window_flushes_on_timer() {
        let calls = Arc::new(AtomicU32::new(0));
        let batcher = uppercase_batcher(25, Duration::from_millis(1_000), Arc::clone(&calls));

        let value = batcher.add("solo").await.unwrap();
        assert_eq!(value.as_deref(), Some("SOLO"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn absent_keys_resolve_to_none() {
        let batcher: Batcher<String> = Batcher::new(2, Duration::from_secs(600), |_keys| async {
            Ok(HashMap::new())
        });

        let (a, b) = tokio::join!(batcher.add("alpha"), batcher.add("beta"));
        assert_eq!(a.unwrap(), None);
        assert_eq!(b.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_flush_rejects_every_waiter() {
        let batcher: Batcher<String> = Batcher::new(2, Duration::from_secs(600), |_keys| async {
            Err(ApiError::Transport("connection refused".to_owned()))
        });

        let (a, b) = tokio::join!(batcher.add("alpha"), batcher.add("beta"));
        assert!(a.is_err());
        assert!(b.is_err());
    }

    #[tokio::test]
    async fn duplicate_keys_share_the_response() {
        let calls = Arc::new(AtomicU32::new(0));
        let batcher = uppercase_batcher(2, Duration::from_secs(600), Arc::clone(&calls));

        // same key twice does not fill the window; a second key triggers it
        let (a, b, c) = tokio::join!(batcher.add("dup"), batcher.add("dup"), batcher.add("other"));
        assert_eq!(a.unwrap().as_deref(), Some("DUP"));
        assert_eq!(b.unwrap().as_deref(), Some("DUP"));
        assert_eq!(c.unwrap().as_deref(), Some("OTHER"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
