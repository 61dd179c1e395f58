//! Delivery of metric points to the time-series database.

pub mod emitter;
pub mod error;
pub mod influx;
pub mod line_protocol;

use async_trait::async_trait;
use fleetmon_common::types::MetricPoint;

use crate::error::Result;

pub use emitter::{EmitOutcome, MetricEmitter};
pub use influx::{InfluxSettings, InfluxSink};

/// Destination for metric points.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Writes all `points` in a single request.
    async fn write_points(&self, points: &[MetricPoint]) -> Result<()>;

    /// Checks that the sink is reachable.
    async fn ping(&self) -> Result<()>;
}
