use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::node_task::{NodeOutcome, NodeTaskContext};

/// Splits a claimed batch into contiguous groups of at most `chunk_size` ids.
///
/// ```
/// use fleetmon_server::collection::partition_batch;
///
/// let ids: Vec<String> = (0..25).map(|i| format!("n{i}")).collect();
/// let sizes: Vec<usize> = partition_batch(&ids, 10).iter().map(|c| c.len()).collect();
/// assert_eq!(sizes, vec![10, 10, 5]);
/// ```
pub fn partition_batch(ids: &[String], chunk_size: usize) -> Vec<&[String]> {
    ids.chunks(chunk_size.max(1)).collect()
}

/// Number of node tasks currently running. Observability only.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<AtomicI64>);

impl InFlight {
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    fn enter(&self) -> InFlightGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        InFlightGuard(self.clone())
    }
}

/// Decrements the gauge when the task ends, including on panic.
struct InFlightGuard(InFlight);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        (self.0).0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Launches one task per claimed node, staggered.
#[derive(Clone)]
pub struct DispatchController {
    context: Arc<NodeTaskContext>,
    stagger: Duration,
    chunk_size: usize,
    limiter: Option<Arc<Semaphore>>,
    in_flight: InFlight,
}

impl DispatchController {
    /// `max_in_flight == 0` leaves concurrency bounded only by the batch
    /// size and the stagger.
    pub fn new(
        context: Arc<NodeTaskContext>,
        stagger: Duration,
        chunk_size: usize,
        max_in_flight: usize,
    ) -> Self {
        Self {
            context,
            stagger,
            chunk_size,
            limiter: (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight))),
            in_flight: InFlight::default(),
        }
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    /// Starts launching tasks for `ids` in the background and returns at once.
    pub fn dispatch(&self, ids: Vec<String>) -> DispatchHandle {
        let controller = self.clone();
        DispatchHandle {
            nodes: ids.len(),
            launcher: tokio::spawn(async move { controller.launch_all(ids).await }),
        }
    }

    async fn launch_all(&self, ids: Vec<String>) -> Vec<JoinHandle<NodeOutcome>> {
        let chunks = partition_batch(&ids, self.chunk_size);
        let total_chunks = chunks.len();
        let mut handles = Vec::with_capacity(ids.len());

        for (index, chunk) in chunks.into_iter().enumerate() {
            tracing::debug!(
                chunk = index + 1,
                total_chunks,
                size = chunk.len(),
                "Dispatching chunk"
            );
            for node_id in chunk {
                if !handles.is_empty() && !self.stagger.is_zero() {
                    tokio::time::sleep(self.stagger).await;
                }

                let permit = match &self.limiter {
                    Some(limiter) => match limiter.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(e) => {
                            tracing::error!(error = %e, "Dispatch limiter closed, abandoning batch");
                            return handles;
                        }
                    },
                    None => None,
                };

                let guard = self.in_flight.enter();
                let context = self.context.clone();
                let node_id = node_id.clone();
                handles.push(tokio::spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    context.collect_node(&node_id).await
                }));
            }
        }

        handles
    }
}

/// Handle on one tick's dispatch. Dropping it detaches the tasks.
pub struct DispatchHandle {
    nodes: usize,
    launcher: JoinHandle<Vec<JoinHandle<NodeOutcome>>>,
}

impl DispatchHandle {
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Waits for every launched node task. A panicked task is logged and
    /// left out of the result.
    pub async fn join(self) -> Vec<NodeOutcome> {
        let handles = match self.launcher.await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::error!(error = %e, "Dispatch launcher failed");
                return Vec::new();
            }
        };

        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!(error = %e, "Node task failed"),
            }
        }
        outcomes
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("nodes", &self.nodes)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("node-{i}")).collect()
    }

    #[test]
    fn partition_covers_every_id_once() {
        let ids = ids(25);
        let chunks = partition_batch(&ids, 10);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);

        let flattened: Vec<&String> = chunks.iter().flat_map(|c| c.iter()).collect();
        assert_eq!(flattened.len(), 25);
        let unique: HashSet<&String> = flattened.iter().copied().collect();
        assert_eq!(unique.len(), 25);
        assert_eq!(flattened, ids.iter().collect::<Vec<_>>());
    }

    #[test]
    fn partition_edge_cases() {
        assert!(partition_batch(&[], 10).is_empty());
        assert_eq!(partition_batch(&ids(3), 10).len(), 1);
        assert_eq!(partition_batch(&ids(20), 10).len(), 2);
        assert_eq!(partition_batch(&ids(2), 0).len(), 2);
    }

    #[test]
    fn in_flight_guard_restores_gauge() {
        let gauge = InFlight::default();
        let a = gauge.enter();
        let b = gauge.enter();
        assert_eq!(gauge.get(), 2);
        drop(a);
        assert_eq!(gauge.get(), 1);
        drop(b);
        assert_eq!(gauge.get(), 0);
    }
}
