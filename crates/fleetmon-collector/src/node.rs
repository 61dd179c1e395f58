use fleetmon_common::types::{ContainerTarget, MetricPoint, RateMetric};
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::delta::rate;
use crate::error::{CollectError, Result};
use crate::{RuntimeClient, RuntimeConnection};

/// Tunables for one node collection.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    /// Label a container must carry to be collected; its value becomes the
    /// service-id tag.
    pub service_label: String,
    pub connect_timeout: Duration,
    /// Deadline for reading both samples of one container.
    pub stats_timeout: Duration,
    /// Containers of one node sampled at the same time.
    pub container_concurrency: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            service_label: "io.daocloud.sr.microservice-id".to_string(),
            connect_timeout: Duration::from_secs(20),
            stats_timeout: Duration::from_secs(10),
            container_concurrency: 4,
        }
    }
}

/// Result of collecting one node.
#[derive(Debug, Clone)]
pub struct NodeCollection {
    pub node_id: String,
    pub url: String,
    pub api_version: String,
    pub containers: usize,
    pub failed_containers: usize,
    pub points: Vec<MetricPoint>,
}

pub struct NodeCollector {
    runtime: Arc<dyn RuntimeClient>,
    settings: CollectorSettings,
}

impl NodeCollector {
    pub fn new(runtime: Arc<dyn RuntimeClient>, settings: CollectorSettings) -> Self {
        Self { runtime, settings }
    }

    /// Samples every labelled container on the runtime at `url`.
    ///
    /// A failing container is logged and skipped; its siblings still
    /// contribute points.
    ///
    /// # Errors
    ///
    /// Returns an error when the runtime cannot be connected to, reports no
    /// API version, or refuses to list containers.
    pub async fn collect(&self, node_id: &str, url: &str) -> Result<NodeCollection> {
        let connect_timeout = self.settings.connect_timeout;
        let conn = timeout(connect_timeout, self.runtime.connect(url, connect_timeout))
            .await
            .map_err(|_| CollectError::Timeout {
                operation: "runtime connect",
                timeout: connect_timeout,
            })??;

        let targets = timeout(
            connect_timeout,
            conn.list_containers(&self.settings.service_label),
        )
        .await
        .map_err(|_| CollectError::Timeout {
            operation: "list containers",
            timeout: connect_timeout,
        })??;

        tracing::debug!(
            node_id = %node_id,
            api_version = %conn.api_version(),
            containers = targets.len(),
            "Listed target containers"
        );

        let conn: &dyn RuntimeConnection = &*conn;
        let mut outcomes: Vec<(ContainerTarget, Result<RateMetric>)> =
            Vec::with_capacity(targets.len());
        for wave in targets.chunks(self.settings.container_concurrency.max(1)) {
            let results = join_all(
                wave.iter()
                    .map(|target| self.sample_container(conn, &target.container_id)),
            )
            .await;
            outcomes.extend(wave.iter().cloned().zip(results));
        }

        let mut collection = NodeCollection {
            node_id: node_id.to_string(),
            url: url.to_string(),
            api_version: conn.api_version().to_string(),
            containers: outcomes.len(),
            failed_containers: 0,
            points: Vec::new(),
        };

        for (target, outcome) in outcomes {
            match outcome {
                Ok(metric) => {
                    let tags = target.tags(&self.settings.service_label);
                    collection.points.extend(metric.to_points(&tags));
                }
                Err(e) => {
                    collection.failed_containers += 1;
                    tracing::warn!(
                        node_id = %node_id,
                        container_id = %target.container_id,
                        container_name = %target.name,
                        error = %e,
                        "Container sampling failed"
                    );
                }
            }
        }

        Ok(collection)
    }

    /// Reads two samples from one container's stats stream and pairs them.
    ///
    /// The first sample only seeds the previous counters; the stream is
    /// dropped as soon as the second one arrives.
    pub async fn sample_container(
        &self,
        conn: &dyn RuntimeConnection,
        container_id: &str,
    ) -> Result<RateMetric> {
        let stats_timeout = self.settings.stats_timeout;
        timeout(stats_timeout, read_pair(conn, container_id))
            .await
            .map_err(|_| CollectError::Timeout {
                operation: "stats stream",
                timeout: stats_timeout,
            })?
    }
}

async fn read_pair(conn: &dyn RuntimeConnection, container_id: &str) -> Result<RateMetric> {
    let mut samples = conn.stream_stats(container_id);
    let mut previous = None;

    while let Some(sample) = samples.next().await {
        let sample = sample?;
        match previous {
            None => previous = Some(sample),
            Some(prev) => return Ok(rate(&prev, &sample)),
        }
    }

    Err(CollectError::StreamEnded {
        container_id: container_id.to_string(),
        received: usize::from(previous.is_some()),
    })
}
