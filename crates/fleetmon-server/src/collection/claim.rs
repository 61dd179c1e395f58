use chrono::{DateTime, Utc};
use fleetmon_storage::error::Result;
use fleetmon_storage::NodeRegistry;
use std::sync::Arc;

/// Stamps nodes as collected before any remote work starts, so the next tick
/// cannot select them again.
pub struct ClaimManager {
    registry: Arc<dyn NodeRegistry>,
}

impl ClaimManager {
    pub fn new(registry: Arc<dyn NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Claims `ids` in one update and returns the number of rows stamped.
    pub async fn claim(&self, ids: &[String], now: DateTime<Utc>) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let claimed = self.registry.claim_collected(ids, now).await?;
        if claimed != ids.len() as u64 {
            tracing::debug!(
                requested = ids.len(),
                claimed,
                "Claim stamped fewer nodes than requested"
            );
        }
        Ok(claimed)
    }
}
