use chrono::{DateTime, Utc};
use fleetmon_storage::error::Result;
use fleetmon_storage::NodeRegistry;
use std::sync::Arc;
use std::time::Duration;

/// Picks the most overdue reachable nodes for one tick.
pub struct EligibilityFilter {
    registry: Arc<dyn NodeRegistry>,
    staleness: Duration,
    batch_limit: usize,
}

impl EligibilityFilter {
    pub fn new(registry: Arc<dyn NodeRegistry>, staleness: Duration, batch_limit: usize) -> Self {
        Self {
            registry,
            staleness,
            batch_limit,
        }
    }

    /// Reachable ids never collected or last collected before
    /// `now - staleness`, oldest first, at most `batch_limit` of them.
    pub async fn select(&self, reachable: &[String], now: DateTime<Utc>) -> Result<Vec<String>> {
        if reachable.is_empty() {
            return Ok(Vec::new());
        }
        self.registry
            .list_stale_nodes(reachable, self.stale_before(now), self.batch_limit)
            .await
    }

    fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let staleness_ms = i64::try_from(self.staleness.as_millis()).unwrap_or(i64::MAX);
        now.checked_sub_signed(chrono::Duration::milliseconds(staleness_ms))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetmon_common::types::Tunnel;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingRegistry {
        calls: Mutex<Vec<(Vec<String>, DateTime<Utc>, usize)>>,
    }

    #[async_trait]
    impl NodeRegistry for RecordingRegistry {
        async fn list_reachable_nodes(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn list_stale_nodes(
            &self,
            ids: &[String],
            stale_before: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<String>> {
            self.calls
                .lock()
                .unwrap()
                .push((ids.to_vec(), stale_before, limit));
            Ok(ids.iter().take(limit).cloned().collect())
        }

        async fn claim_collected(&self, _ids: &[String], _now: DateTime<Utc>) -> Result<u64> {
            Ok(0)
        }

        async fn find_tunnel(&self, _node_id: &str, _local_addr: &str) -> Result<Option<Tunnel>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn empty_reachable_set_skips_registry() {
        let registry = Arc::new(RecordingRegistry::default());
        let filter = EligibilityFilter::new(registry.clone(), Duration::from_secs(120), 200);

        assert!(filter.select(&[], Utc::now()).await.unwrap().is_empty());
        assert!(registry.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn threshold_and_limit_are_forwarded() {
        let registry = Arc::new(RecordingRegistry::default());
        let filter = EligibilityFilter::new(registry.clone(), Duration::from_secs(120), 2);
        let now = Utc::now();
        let reachable: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();

        let selected = filter.select(&reachable, now).await.unwrap();
        assert_eq!(selected.len(), 2);

        let calls = registry.calls.lock().unwrap();
        let (ids, stale_before, limit) = &calls[0];
        assert_eq!(ids, &reachable);
        assert_eq!(*stale_before, now - chrono::Duration::seconds(120));
        assert_eq!(*limit, 2);
    }
}
