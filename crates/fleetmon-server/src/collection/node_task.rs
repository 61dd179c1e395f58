use fleetmon_collector::node::NodeCollector;
use fleetmon_common::types::MetricBatch;
use fleetmon_sink::{EmitOutcome, MetricEmitter};
use fleetmon_storage::{LivenessOracle, NodeRegistry};
use std::sync::Arc;

/// How one node's collection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// No established tunnel forwards to the runtime socket.
    NoTunnel,
    /// The relay no longer advertises the tunnel.
    TunnelDead,
    /// Tunnel lookup, liveness check or runtime connection failed.
    Failed,
    Collected {
        containers: usize,
        failed_containers: usize,
        emitted: EmitOutcome,
    },
}

/// Everything a spawned node task needs, shared by all of them.
pub struct NodeTaskContext {
    pub registry: Arc<dyn NodeRegistry>,
    pub liveness: Arc<dyn LivenessOracle>,
    pub collector: NodeCollector,
    pub emitter: MetricEmitter,
    /// Local endpoint a tunnel must forward to.
    pub runtime_socket: String,
}

impl NodeTaskContext {
    /// Resolves the node's tunnel, samples its containers and emits the
    /// resulting batch.
    ///
    /// Never fails: every error is logged here and folded into the outcome.
    pub async fn collect_node(&self, node_id: &str) -> NodeOutcome {
        let tunnel = match self.registry.find_tunnel(node_id, &self.runtime_socket).await {
            Ok(Some(tunnel)) => tunnel,
            Ok(None) => {
                tracing::debug!(node_id = %node_id, "No established tunnel to runtime, skipping");
                return NodeOutcome::NoTunnel;
            }
            Err(e) => {
                tracing::warn!(node_id = %node_id, error = %e, "Tunnel lookup failed");
                return NodeOutcome::Failed;
            }
        };

        match self.liveness.is_tunnel_alive(&tunnel).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(
                    node_id = %node_id,
                    server = %tunnel.server,
                    public_url = %tunnel.public_url,
                    "Tunnel is not live, skipping"
                );
                return NodeOutcome::TunnelDead;
            }
            Err(e) => {
                tracing::warn!(node_id = %node_id, error = %e, "Tunnel liveness check failed");
                return NodeOutcome::Failed;
            }
        }

        let url = tunnel.runtime_url();
        let collection = match self.collector.collect(node_id, &url).await {
            Ok(collection) => collection,
            Err(e) => {
                tracing::debug!(node_id = %node_id, tunnel = %url, error = %e, "Node collection failed");
                return NodeOutcome::Failed;
            }
        };

        let batch = MetricBatch {
            node_id: node_id.to_string(),
            origin: url,
            points: collection.points,
        };
        let emitted = self.emitter.emit(&batch).await;

        NodeOutcome::Collected {
            containers: collection.containers,
            failed_containers: collection.failed_containers,
            emitted,
        }
    }
}
