use crate::error::{CollectError, Result};
use crate::node::{CollectorSettings, NodeCollector};
use crate::{RuntimeClient, RuntimeConnection, SampleStream};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use fleetmon_common::types::{
    ContainerTarget, CounterSample, CpuCounters, FieldValue, MemorySnapshot, NetworkCounters,
    MEASUREMENT_CPU, MEASUREMENT_NETWORK, TAG_CONTAINER_ID,
};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const LABEL: &str = "svc.id";

#[derive(Clone)]
enum Script {
    Samples(Vec<CounterSample>),
    FailAfter(Vec<CounterSample>),
    Hang,
}

#[derive(Clone, Default)]
struct ScriptedRuntime {
    containers: Vec<ContainerTarget>,
    scripts: HashMap<String, Script>,
    refuse_connect: bool,
    pulled: Arc<AtomicUsize>,
}

struct ScriptedConnection {
    runtime: ScriptedRuntime,
}

#[async_trait]
impl RuntimeClient for ScriptedRuntime {
    async fn connect(&self, url: &str, _timeout: Duration) -> Result<Box<dyn RuntimeConnection>> {
        if self.refuse_connect {
            return Err(CollectError::Connect {
                url: url.to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Box::new(ScriptedConnection {
            runtime: self.clone(),
        }))
    }
}

#[async_trait]
impl RuntimeConnection for ScriptedConnection {
    fn api_version(&self) -> &str {
        "1.41"
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<ContainerTarget>> {
        Ok(self
            .runtime
            .containers
            .iter()
            .filter(|c| c.labels.contains_key(label))
            .cloned()
            .collect())
    }

    fn stream_stats<'a>(&'a self, container_id: &'a str) -> SampleStream<'a> {
        let pulled = self.runtime.pulled.clone();
        match self.runtime.scripts.get(container_id).cloned() {
            Some(Script::Samples(samples)) => stream::iter(samples)
                .inspect(move |_| {
                    pulled.fetch_add(1, Ordering::SeqCst);
                })
                .map(Ok::<_, CollectError>)
                .boxed(),
            Some(Script::FailAfter(samples)) => stream::iter(samples.into_iter().map(Ok))
                .chain(stream::once(async move {
                    Err(CollectError::Stream {
                        container_id: container_id.to_string(),
                        message: "unexpected EOF while decoding stats".to_string(),
                    })
                }))
                .boxed(),
            Some(Script::Hang) => stream::pending::<Result<CounterSample>>().boxed(),
            None => stream::empty::<Result<CounterSample>>().boxed(),
        }
    }
}

fn target(id: &str, labelled: bool) -> ContainerTarget {
    let mut labels = HashMap::new();
    if labelled {
        labels.insert(LABEL.to_string(), format!("svc-{id}"));
    }
    ContainerTarget {
        container_id: id.to_string(),
        name: format!("{id}-name"),
        labels,
    }
}

fn sample(secs: i64, total: u64, system: u64, rx: u64) -> CounterSample {
    CounterSample {
        observed_at: Utc::now() + ChronoDuration::seconds(secs),
        cpu: CpuCounters {
            total,
            user_mode: total / 2,
            kernel_mode: total / 4,
        },
        system_cpu: system,
        core_count: 4,
        memory: MemorySnapshot {
            usage: 10,
            limit: 100,
            max_usage: 20,
        },
        network: NetworkCounters {
            rx_bytes: rx,
            tx_bytes: rx / 2,
        },
    }
}

fn settings() -> CollectorSettings {
    CollectorSettings {
        service_label: LABEL.to_string(),
        connect_timeout: Duration::from_secs(1),
        stats_timeout: Duration::from_millis(100),
        container_concurrency: 2,
    }
}

fn collector(runtime: ScriptedRuntime) -> NodeCollector {
    NodeCollector::new(Arc::new(runtime), settings())
}

#[tokio::test]
async fn two_samples_produce_three_points() {
    let mut runtime = ScriptedRuntime {
        containers: vec![target("c1", true)],
        ..Default::default()
    };
    runtime.scripts.insert(
        "c1".to_string(),
        Script::Samples(vec![sample(0, 100, 1000, 1000), sample(1, 150, 1100, 1600)]),
    );

    let result = collector(runtime).collect("node-1", "http://edge:1").await.unwrap();
    assert_eq!(result.containers, 1);
    assert_eq!(result.failed_containers, 0);
    assert_eq!(result.api_version, "1.41");
    assert_eq!(result.points.len(), 3);

    let cpu = &result.points[0];
    assert_eq!(cpu.measurement, MEASUREMENT_CPU);
    assert_eq!(cpu.fields.get("total_percent"), Some(&FieldValue::Float(2.0)));
    assert_eq!(cpu.tags.get(TAG_CONTAINER_ID).map(String::as_str), Some("c1"));

    let net = &result.points[2];
    assert_eq!(net.measurement, MEASUREMENT_NETWORK);
    assert_eq!(net.fields.get("rx_bandwidth"), Some(&FieldValue::Integer(600)));
}

#[tokio::test]
async fn single_sample_produces_no_points() {
    let mut runtime = ScriptedRuntime {
        containers: vec![target("c1", true)],
        ..Default::default()
    };
    runtime
        .scripts
        .insert("c1".to_string(), Script::Samples(vec![sample(0, 100, 1000, 0)]));

    let result = collector(runtime).collect("node-1", "http://edge:1").await.unwrap();
    assert!(result.points.is_empty());
    assert_eq!(result.failed_containers, 1);
}

#[tokio::test]
async fn only_two_samples_are_pulled() {
    let mut runtime = ScriptedRuntime {
        containers: vec![target("c1", true)],
        ..Default::default()
    };
    runtime.scripts.insert(
        "c1".to_string(),
        Script::Samples(
            (1..=5u64)
                .map(|i| sample(i as i64, 100 * i, 1000 * i, 0))
                .collect(),
        ),
    );
    let pulled = runtime.pulled.clone();

    let result = collector(runtime).collect("node-1", "http://edge:1").await.unwrap();
    assert_eq!(result.points.len(), 3);
    assert_eq!(pulled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn failing_container_does_not_block_siblings() {
    let mut runtime = ScriptedRuntime {
        containers: vec![target("bad", true), target("good", true), target("slow", true)],
        ..Default::default()
    };
    runtime
        .scripts
        .insert("bad".to_string(), Script::FailAfter(vec![sample(0, 1, 1, 0)]));
    runtime.scripts.insert(
        "good".to_string(),
        Script::Samples(vec![sample(0, 100, 1000, 0), sample(1, 200, 2000, 0)]),
    );
    runtime.scripts.insert("slow".to_string(), Script::Hang);

    let result = collector(runtime).collect("node-1", "http://edge:1").await.unwrap();
    assert_eq!(result.containers, 3);
    assert_eq!(result.failed_containers, 2);
    assert_eq!(result.points.len(), 3);
    assert!(result
        .points
        .iter()
        .all(|p| p.tags.get(TAG_CONTAINER_ID).map(String::as_str) == Some("good")));
}

#[tokio::test]
async fn unlabelled_containers_are_not_targets() {
    let mut runtime = ScriptedRuntime {
        containers: vec![target("plain", false)],
        ..Default::default()
    };
    runtime.scripts.insert(
        "plain".to_string(),
        Script::Samples(vec![sample(0, 100, 1000, 0), sample(1, 200, 2000, 0)]),
    );

    let result = collector(runtime).collect("node-1", "http://edge:1").await.unwrap();
    assert_eq!(result.containers, 0);
    assert!(result.points.is_empty());
}

#[tokio::test]
async fn refused_connection_is_node_error() {
    let runtime = ScriptedRuntime {
        refuse_connect: true,
        ..Default::default()
    };

    let err = collector(runtime)
        .collect("node-1", "http://edge:1")
        .await
        .unwrap_err();
    assert!(matches!(err, CollectError::Connect { .. }));
}

#[tokio::test]
async fn hanging_stream_times_out() {
    let runtime = ScriptedRuntime::default();
    let collector = collector(runtime.clone());
    let mut scripts = HashMap::new();
    scripts.insert("c1".to_string(), Script::Hang);
    let conn = ScriptedConnection {
        runtime: ScriptedRuntime { scripts, ..runtime },
    };

    let err = collector.sample_container(&conn, "c1").await.unwrap_err();
    assert!(matches!(err, CollectError::Timeout { operation: "stats stream", .. }));
}
