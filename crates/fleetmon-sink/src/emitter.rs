use fleetmon_common::types::MetricBatch;
use std::sync::Arc;

use crate::MetricsSink;

/// What happened to one batch handed to the [`MetricEmitter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    /// The batch was empty; the sink was not called.
    Skipped,
    Written(usize),
    /// The sink failed and the points were discarded.
    Dropped(usize),
}

/// Forwards each node's batch to the sink in a single write.
///
/// Failed writes are logged and dropped. The node becomes stale again after
/// the staleness threshold, and its next collection produces fresh points.
#[derive(Clone)]
pub struct MetricEmitter {
    sink: Arc<dyn MetricsSink>,
}

impl MetricEmitter {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }

    pub async fn emit(&self, batch: &MetricBatch) -> EmitOutcome {
        if batch.is_empty() {
            return EmitOutcome::Skipped;
        }

        match self.sink.write_points(&batch.points).await {
            Ok(()) => {
                tracing::debug!(
                    node_id = %batch.node_id,
                    count = batch.len(),
                    "Metric batch written"
                );
                EmitOutcome::Written(batch.len())
            }
            Err(e) => {
                tracing::error!(
                    node_id = %batch.node_id,
                    tunnel = %batch.origin,
                    count = batch.len(),
                    error = %e,
                    "Failed to write metric batch"
                );
                EmitOutcome::Dropped(batch.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, SinkError};
    use async_trait::async_trait;
    use chrono::Utc;
    use fleetmon_common::types::MetricPoint;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl MetricsSink for CountingSink {
        async fn write_points(&self, _points: &[MetricPoint]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SinkError::Rejected {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            Ok(())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn batch(points: usize) -> MetricBatch {
        MetricBatch {
            node_id: "node-1".to_string(),
            origin: "http://relay:2000".to_string(),
            points: (0..points)
                .map(|_| MetricPoint::new("m", BTreeMap::new(), Utc::now()).field("v", 1u64))
                .collect(),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let sink = Arc::new(CountingSink::default());
        let emitter = MetricEmitter::new(sink.clone());

        assert_eq!(emitter.emit(&batch(0)).await, EmitOutcome::Skipped);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batch_is_written_in_one_call() {
        let sink = Arc::new(CountingSink::default());
        let emitter = MetricEmitter::new(sink.clone());

        assert_eq!(emitter.emit(&batch(6)).await, EmitOutcome::Written(6));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sink_failure_is_not_retried() {
        let sink = Arc::new(CountingSink {
            fail: true,
            ..Default::default()
        });
        let emitter = MetricEmitter::new(sink.clone());

        assert_eq!(emitter.emit(&batch(3)).await, EmitOutcome::Dropped(3));
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }
}
