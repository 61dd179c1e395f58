use chrono::{DateTime, Utc};
use fleetmon_common::types::Tunnel;
use fleetmon_storage::error::Result;
use fleetmon_storage::{SqliteLivenessOracle, SqliteNodeRegistry};

use crate::config::NodesSeedFile;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedSummary {
    pub nodes: usize,
    pub tunnels: usize,
    pub live_tunnels: usize,
}

/// Registers the seeded nodes with a heartbeat at `now`, plus their tunnels.
///
/// Re-running with the same file is safe for nodes and live-tunnel entries;
/// tunnels are appended, and the newest one wins at lookup time.
pub fn apply_nodes_seed(
    registry: &SqliteNodeRegistry,
    liveness: &SqliteLivenessOracle,
    seed: &NodesSeedFile,
    runtime_socket: &str,
    now: DateTime<Utc>,
) -> Result<SeedSummary> {
    let mut summary = SeedSummary::default();

    for node in &seed.nodes {
        registry.upsert_node(&node.node_id)?;
        registry.record_heartbeat(&node.node_id, node.logged_in, now)?;
        summary.nodes += 1;

        let Some(seed_tunnel) = &node.tunnel else {
            continue;
        };
        registry.register_tunnel(&Tunnel {
            node_id: node.node_id.clone(),
            public_url: seed_tunnel.public_url.clone(),
            server: seed_tunnel.server.clone(),
            local_addr: seed_tunnel
                .local_addr
                .clone()
                .unwrap_or_else(|| runtime_socket.to_string()),
            established_at: now,
            is_established: true,
        })?;
        summary.tunnels += 1;

        if seed_tunnel.alive {
            liveness.mark_alive(&seed_tunnel.server, &seed_tunnel.public_url)?;
            summary.live_tunnels += 1;
        }
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetmon_storage::{LivenessOracle, NodeRegistry};
    use std::time::Duration;
    use tempfile::TempDir;

    const SOCK: &str = "unix:///var/run/docker.sock";

    #[tokio::test]
    async fn seeded_nodes_become_reachable_and_routable() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("fleet.db");
        let registry = SqliteNodeRegistry::open(&db, Duration::from_secs(25)).unwrap();
        let liveness = SqliteLivenessOracle::open(&db).unwrap();
        let seed: NodesSeedFile = serde_json::from_str(
            r#"{"nodes":[
                {"node_id":"n1","tunnel":{"public_url":"tcp://relay:1","server":"relay"}},
                {"node_id":"n2","tunnel":{"public_url":"tcp://relay:2","server":"relay","alive":false}},
                {"node_id":"n3","logged_in":false}
            ]}"#,
        )
        .unwrap();

        let summary = apply_nodes_seed(&registry, &liveness, &seed, SOCK, Utc::now()).unwrap();
        assert_eq!(
            summary,
            SeedSummary {
                nodes: 3,
                tunnels: 2,
                live_tunnels: 1
            }
        );

        let reachable = registry.list_reachable_nodes().await.unwrap();
        assert_eq!(reachable, vec!["n1".to_string(), "n2".to_string()]);

        let t1 = registry.find_tunnel("n1", SOCK).await.unwrap().unwrap();
        assert!(liveness.is_tunnel_alive(&t1).await.unwrap());
        let t2 = registry.find_tunnel("n2", SOCK).await.unwrap().unwrap();
        assert!(!liveness.is_tunnel_alive(&t2).await.unwrap());
    }
}
