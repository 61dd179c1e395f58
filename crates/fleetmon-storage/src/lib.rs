//! Node registry and tunnel liveness stores.
//!
//! The scheduler only talks to the [`NodeRegistry`] and [`LivenessOracle`]
//! traits; [`registry::SqliteNodeRegistry`] and
//! [`liveness::SqliteLivenessOracle`] are the SQLite-backed implementations.

pub mod error;
pub mod liveness;
pub mod registry;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetmon_common::types::Tunnel;

use crate::error::Result;

pub use liveness::SqliteLivenessOracle;
pub use registry::SqliteNodeRegistry;

/// Persistent view of the fleet and its collection bookkeeping.
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Ids of nodes that are logged in and sent a heartbeat recently.
    async fn list_reachable_nodes(&self) -> Result<Vec<String>>;

    /// Ids among `ids` whose last collection is older than `stale_before` or
    /// that were never collected.
    ///
    /// Never-collected nodes come first, then the oldest collections. At most
    /// `limit` ids are returned, and an empty `ids` returns nothing without
    /// touching the store.
    async fn list_stale_nodes(
        &self,
        ids: &[String],
        stale_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<String>>;

    /// Sets `last_collected_at = now` on every node in `ids` as one atomic
    /// update and returns the number of rows changed.
    async fn claim_collected(&self, ids: &[String], now: DateTime<Utc>) -> Result<u64>;

    /// The most recently established tunnel of `node_id` that forwards to
    /// `local_addr`.
    async fn find_tunnel(&self, node_id: &str, local_addr: &str) -> Result<Option<Tunnel>>;
}

/// Answers whether a tunnel's relay still advertises its public URL.
#[async_trait]
pub trait LivenessOracle: Send + Sync {
    async fn is_tunnel_alive(&self, tunnel: &Tunnel) -> Result<bool>;
}
