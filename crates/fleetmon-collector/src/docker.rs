//! Docker Engine API adapter reached over a node's tunnel.

use async_trait::async_trait;
use bollard::container::{ListContainersOptions, Stats, StatsOptions};
use bollard::{Docker, API_DEFAULT_VERSION};
use chrono::{DateTime, Utc};
use fleetmon_common::types::{
    ContainerTarget, CounterSample, CpuCounters, MemorySnapshot, NetworkCounters,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{CollectError, Result};
use crate::{RuntimeClient, RuntimeConnection, SampleStream};

/// Connects to Docker daemons exposed over HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct DockerRuntime;

impl DockerRuntime {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuntimeClient for DockerRuntime {
    async fn connect(&self, url: &str, timeout: Duration) -> Result<Box<dyn RuntimeConnection>> {
        let docker = Docker::connect_with_http(url, timeout.as_secs(), API_DEFAULT_VERSION)
            .map_err(|e| CollectError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let version = docker.version().await.map_err(|e| CollectError::Connect {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let api_version = version
            .api_version
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CollectError::MissingApiVersion(url.to_string()))?;

        // Speak the server's version rather than the client default.
        let docker = docker.negotiate_version().await?;

        Ok(Box::new(DockerConnection {
            docker,
            api_version,
        }))
    }
}

pub struct DockerConnection {
    docker: Docker,
    api_version: String,
}

#[async_trait]
impl RuntimeConnection for DockerConnection {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerTarget>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec![label.to_string()]);
        let options = ListContainersOptions {
            filters,
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| CollectError::ListContainers(e.to_string()))?;

        Ok(containers
            .into_iter()
            .filter_map(|c| {
                Some(ContainerTarget {
                    container_id: c.id?,
                    name: container_name(c.names.as_deref()),
                    labels: c.labels.unwrap_or_default(),
                })
            })
            .filter(|target| target.labels.contains_key(label))
            .collect())
    }

    fn stream_stats<'a>(&'a self, container_id: &'a str) -> SampleStream<'a> {
        let options = StatsOptions {
            stream: true,
            one_shot: false,
        };
        self.docker
            .stats(container_id, Some(options))
            .map(move |frame| match frame {
                Ok(stats) => Ok(sample_from_stats(&stats, Utc::now())),
                Err(e) => Err(CollectError::Stream {
                    container_id: container_id.to_string(),
                    message: e.to_string(),
                }),
            })
            .boxed()
    }
}

fn sample_from_stats(stats: &Stats, observed_at: DateTime<Utc>) -> CounterSample {
    let usage = &stats.cpu_stats.cpu_usage;
    let (rx_bytes, tx_bytes) = stats
        .networks
        .as_ref()
        .map(|networks| {
            networks.values().fold((0u64, 0u64), |(rx, tx), net| {
                (rx.saturating_add(net.rx_bytes), tx.saturating_add(net.tx_bytes))
            })
        })
        .unwrap_or((0, 0));

    CounterSample {
        observed_at,
        cpu: CpuCounters {
            total: usage.total_usage,
            user_mode: usage.usage_in_usermode,
            kernel_mode: usage.usage_in_kernelmode,
        },
        system_cpu: stats.cpu_stats.system_cpu_usage.unwrap_or(0),
        core_count: core_count(usage.percpu_usage.as_deref(), stats.cpu_stats.online_cpus),
        memory: MemorySnapshot {
            usage: stats.memory_stats.usage.unwrap_or(0),
            limit: stats.memory_stats.limit.unwrap_or(0),
            max_usage: stats.memory_stats.max_usage.unwrap_or(0),
        },
        network: NetworkCounters { rx_bytes, tx_bytes },
    }
}

/// Number of cores the CPU counters are spread over.
///
/// Per-core usage is absent under cgroup v2, where the online CPU count is
/// used instead.
pub fn core_count(percpu_usage: Option<&[u64]>, online_cpus: Option<u64>) -> u32 {
    match percpu_usage {
        Some(per_core) if !per_core.is_empty() => u32::try_from(per_core.len()).unwrap_or(u32::MAX),
        _ => online_cpus
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
            .unwrap_or(0),
    }
}

/// Display name of a container: its first name without the leading `/`.
pub fn container_name(names: Option<&[String]>) -> String {
    names
        .and_then(|names| names.first())
        .map(|name| name.strip_prefix('/').unwrap_or(name).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_count_prefers_per_core_entries() {
        assert_eq!(core_count(Some(&[1, 2, 3, 4]), Some(8)), 4);
    }

    #[test]
    fn core_count_falls_back_to_online_cpus() {
        assert_eq!(core_count(Some(&[]), Some(8)), 8);
        assert_eq!(core_count(None, Some(2)), 2);
        assert_eq!(core_count(None, None), 0);
    }

    #[test]
    fn container_name_strips_leading_slash() {
        let names = vec!["/orders-1".to_string(), "/alias".to_string()];
        assert_eq!(container_name(Some(&names)), "orders-1");

        let bare = vec!["billing".to_string()];
        assert_eq!(container_name(Some(&bare)), "billing");
    }

    #[test]
    fn container_name_empty_without_names() {
        assert_eq!(container_name(None), "");
        assert_eq!(container_name(Some(&[])), "");
    }
}
