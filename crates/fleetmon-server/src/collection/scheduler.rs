use chrono::Utc;
use fleetmon_storage::error::Result;
use fleetmon_storage::NodeRegistry;
use std::sync::Arc;
use tokio::time::{interval, Duration, Interval, MissedTickBehavior};

use super::claim::ClaimManager;
use super::dispatch::{DispatchController, DispatchHandle};
use super::eligibility::EligibilityFilter;
use crate::status::SchedulerStats;

/// Result of one scheduler tick.
#[derive(Debug)]
pub enum TickOutcome {
    /// Refetching the reachable set failed; the cached set is kept.
    RefreshFailed,
    EligibilityFailed,
    /// No reachable node is due.
    Idle,
    /// Claiming failed; nothing was dispatched.
    ClaimFailed,
    Dispatched(DispatchHandle),
}

impl TickOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            TickOutcome::RefreshFailed => "refresh_failed",
            TickOutcome::EligibilityFailed => "eligibility_failed",
            TickOutcome::Idle => "idle",
            TickOutcome::ClaimFailed => "claim_failed",
            TickOutcome::Dispatched(_) => "dispatched",
        }
    }

    pub fn dispatched(&self) -> usize {
        match self {
            TickOutcome::Dispatched(handle) => handle.nodes(),
            _ => 0,
        }
    }
}

pub struct CollectionScheduler {
    registry: Arc<dyn NodeRegistry>,
    eligibility: EligibilityFilter,
    claims: ClaimManager,
    dispatcher: DispatchController,
    stats: Arc<SchedulerStats>,
    tick_interval: Duration,
    refresh_every: u64,
    reachable: Vec<String>,
    ticks_since_refresh: u64,
}

impl CollectionScheduler {
    pub fn new(
        registry: Arc<dyn NodeRegistry>,
        eligibility: EligibilityFilter,
        dispatcher: DispatchController,
        stats: Arc<SchedulerStats>,
        tick_interval: Duration,
        refresh_every: u64,
    ) -> Self {
        Self {
            claims: ClaimManager::new(registry.clone()),
            registry,
            eligibility,
            dispatcher,
            stats,
            tick_interval,
            refresh_every: refresh_every.max(1),
            reachable: Vec::new(),
            ticks_since_refresh: 0,
        }
    }

    pub fn reachable(&self) -> &[String] {
        &self.reachable
    }

    /// Loads the initial reachable set. A failure here must stop startup.
    pub async fn bootstrap(&mut self) -> Result<usize> {
        self.refresh_reachable().await?;
        Ok(self.reachable.len())
    }

    async fn refresh_reachable(&mut self) -> Result<()> {
        let reachable = self.registry.list_reachable_nodes().await?;
        tracing::info!(count = reachable.len(), "Refreshed reachable node set");
        self.stats.set_reachable(reachable.len());
        self.reachable = reachable;
        self.ticks_since_refresh = 0;
        Ok(())
    }

    /// Runs one tick: maybe refresh, select, claim, dispatch.
    pub async fn tick(&mut self) -> TickOutcome {
        self.ticks_since_refresh += 1;
        if self.ticks_since_refresh >= self.refresh_every {
            if let Err(e) = self.refresh_reachable().await {
                tracing::error!(
                    error = %e,
                    cached = self.reachable.len(),
                    "Failed to refresh reachable nodes, keeping cached set"
                );
                return TickOutcome::RefreshFailed;
            }
        }

        let now = Utc::now();
        let eligible = match self.eligibility.select(&self.reachable, now).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list stale nodes");
                return TickOutcome::EligibilityFailed;
            }
        };

        tracing::debug!(
            reachable = self.reachable.len(),
            eligible = eligible.len(),
            in_flight = self.dispatcher.in_flight().get(),
            "Tick"
        );

        if eligible.is_empty() {
            return TickOutcome::Idle;
        }

        match self.claims.claim(&eligible, now).await {
            Ok(claimed) => {
                tracing::info!(
                    eligible = eligible.len(),
                    claimed,
                    in_flight = self.dispatcher.in_flight().get(),
                    "Dispatching collection"
                );
            }
            Err(e) => {
                tracing::error!(error = %e, count = eligible.len(), "Failed to claim nodes");
                return TickOutcome::ClaimFailed;
            }
        }

        TickOutcome::Dispatched(self.dispatcher.dispatch(eligible))
    }

    pub async fn run(mut self) {
        tracing::info!(
            tick_secs = self.tick_interval.as_secs(),
            refresh_every = self.refresh_every,
            reachable = self.reachable.len(),
            "Collection scheduler started"
        );

        let mut tick = ticker(self.tick_interval);
        loop {
            tick.tick().await;
            let outcome = self.tick().await;
            self.stats
                .record_tick(Utc::now(), outcome.label(), outcome.dispatched());
        }
    }
}

/// A slow tick pushes the next one back instead of firing catch-up ticks.
fn ticker(period: Duration) -> Interval {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}
