use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::Mutex;

type SharedJob<T> = Shared<BoxFuture<'static, T>>;

/// Keyed in-flight request map: while a call for an id is running, later
/// callers with the same id attach to the shared future instead of issuing a
/// duplicate request.
pub struct Coalescer<T: Clone> {
    inflight: Mutex<HashMap<String, SharedJob<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Coalescer<T> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Run `fut` under `id`, or attach to the execution already in flight
    /// for that id. At most one `fut` per id runs concurrently.
    pub async fn run<F>(&self, id: &str, fut: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (job, owner) = {
            let mut inflight = self.inflight.lock().await;
            match inflight.get(id) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let job = fut.boxed().shared();
                    inflight.insert(id.to_owned(), job.clone());
                    (job, true)
                }
            }
        };

        let out = job.await;
        if owner {
            self.inflight.lock().await.remove(id);
        }
        out
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Coalescer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let coalescer = Arc::new(Coalescer::new());
        let executions = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let coalescer = Arc::clone(&coalescer);
            let executions = Arc::clone(&executions);
            tasks.push(tokio::spawn(async move {
                coalescer
                    .run("did:plc:alice", async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        42u32
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), 42);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_ids_run_independently() {
        let coalescer = Coalescer::new();
        let executions = Arc::new(AtomicU32::new(0));

        for id in ["a", "b"] {
            let executions = Arc::clone(&executions);
            let value = coalescer
                .run(id, async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                    id.len()
                })
                .await;
            assert_eq!(value, 1);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn id_is_reusable_after_completion() {
        let coalescer = Coalescer::new();
        let executions = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let executions = Arc::clone(&executions);
            coalescer
                .run("key", async move {
                    executions.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }
        assert_eq!(executions.load(Ordering::SeqCst), 2);
    }
}
