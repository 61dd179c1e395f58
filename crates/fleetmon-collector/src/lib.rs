//! Per-node container metric collection.
//!
//! A [`node::NodeCollector`] connects to one node's container runtime through
//! a [`RuntimeClient`], reads two samples per target container and turns each
//! pair into a [`fleetmon_common::types::RateMetric`] with [`delta::rate`].

pub mod delta;
pub mod docker;
pub mod error;
pub mod node;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use fleetmon_common::types::{ContainerTarget, CounterSample};
use futures::stream::BoxStream;
use std::time::Duration;

use crate::error::Result;

/// Lazy, finite sequence of raw samples for one container.
///
/// Callers pull only as many samples as they need and drop the stream to
/// close the underlying channel.
pub type SampleStream<'a> = BoxStream<'a, Result<CounterSample>>;

/// Factory for connections to a remote container runtime.
///
/// Implementations are shared by every concurrent node task, so they must be
/// `Send + Sync` and hold no per-node state.
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    /// Opens a connection to the runtime API at `url` and negotiates the API
    /// version.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime is unreachable or does not report a
    /// usable API version.
    async fn connect(&self, url: &str, timeout: Duration) -> Result<Box<dyn RuntimeConnection>>;
}

/// An open connection to one node's container runtime.
#[async_trait]
pub trait RuntimeConnection: Send + Sync {
    /// API version negotiated during [`RuntimeClient::connect`].
    fn api_version(&self) -> &str;

    /// Lists running containers that carry `label`.
    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerTarget>>;

    /// Opens a stats stream for one container.
    fn stream_stats<'a>(&'a self, container_id: &'a str) -> SampleStream<'a>;
}
