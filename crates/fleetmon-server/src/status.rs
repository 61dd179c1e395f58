//! Read-only HTTP view of the scheduler's progress.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::collection::InFlight;

/// Counters updated by the scheduler loop after every tick.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    reachable_nodes: AtomicUsize,
    dispatched_total: AtomicU64,
    last_tick: Mutex<Option<TickSummary>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickSummary {
    pub at: DateTime<Utc>,
    pub outcome: &'static str,
    pub dispatched: usize,
}

impl SchedulerStats {
    pub fn record_tick(&self, at: DateTime<Utc>, outcome: &'static str, dispatched: usize) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.dispatched_total
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        *self.last_tick.lock().unwrap_or_else(PoisonError::into_inner) = Some(TickSummary {
            at,
            outcome,
            dispatched,
        });
    }

    pub fn set_reachable(&self, count: usize) {
        self.reachable_nodes.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self, in_flight: &InFlight) -> StatusSnapshot {
        StatusSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            reachable_nodes: self.reachable_nodes.load(Ordering::Relaxed),
            dispatched_total: self.dispatched_total.load(Ordering::Relaxed),
            in_flight: in_flight.get(),
            last_tick: self
                .last_tick
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ticks: u64,
    pub reachable_nodes: usize,
    pub dispatched_total: u64,
    pub in_flight: i64,
    pub last_tick: Option<TickSummary>,
}

#[derive(Clone)]
pub struct StatusState {
    pub stats: Arc<SchedulerStats>,
    pub in_flight: InFlight,
}

pub fn build_status_app(state: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn status(State(state): State<StatusState>) -> Json<StatusSnapshot> {
    Json(state.stats.snapshot(&state.in_flight))
}
