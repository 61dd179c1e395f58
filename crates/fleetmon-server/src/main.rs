use anyhow::{Context, Result};
use chrono::Utc;
use fleetmon_collector::docker::DockerRuntime;
use fleetmon_collector::node::NodeCollector;
use fleetmon_sink::{InfluxSink, MetricEmitter, MetricsSink};
use fleetmon_storage::{NodeRegistry, SqliteLivenessOracle, SqliteNodeRegistry};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use fleetmon_server::collection::{
    CollectionScheduler, DispatchController, EligibilityFilter, NodeTaskContext,
};
use fleetmon_server::config::{FleetConfig, NodesSeedFile};
use fleetmon_server::seed;
use fleetmon_server::status::{build_status_app, SchedulerStats, StatusState};

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  fleetmon-server [config.toml]                          Start the collector");
    eprintln!("  fleetmon-server init-nodes <config.toml> <seed.json>   Register nodes and tunnels from seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fleetmon=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("init-nodes") => {
            let config_path = args.get(2).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-nodes requires <config.toml> and <seed.json> arguments")
            })?;
            let seed_path = args.get(3).ok_or_else(|| {
                print_usage();
                anyhow::anyhow!("init-nodes requires <seed.json> argument")
            })?;
            run_init_nodes(config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/fleetmon.toml");
            run_server(config_path).await
        }
    }
}

fn load_config(config_path: &str) -> Result<FleetConfig> {
    let mut config = FleetConfig::load(config_path)?;
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Register nodes, heartbeats and tunnels from a JSON seed file.
fn run_init_nodes(config_path: &str, seed_path: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let db_path = Path::new(&config.registry.db_path);
    let registry = SqliteNodeRegistry::open(db_path, config.heartbeat_window())?;
    let liveness = SqliteLivenessOracle::open(db_path)?;

    let seed_content = std::fs::read_to_string(seed_path)
        .with_context(|| format!("Failed to read seed file '{seed_path}'"))?;
    let seed: NodesSeedFile = serde_json::from_str(&seed_content)
        .with_context(|| format!("Failed to parse seed file '{seed_path}'"))?;

    let summary = seed::apply_nodes_seed(
        &registry,
        &liveness,
        &seed,
        &config.collector.runtime_socket,
        Utc::now(),
    )?;

    tracing::info!(
        nodes = summary.nodes,
        tunnels = summary.tunnels,
        live_tunnels = summary.live_tunnels,
        db = %db_path.display(),
        "Node seed applied"
    );
    Ok(())
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = load_config(config_path)?;

    tracing::info!(
        db = %config.registry.db_path,
        sink = %config.sink.url,
        tick_secs = config.scheduler.tick_secs,
        staleness_secs = config.scheduler.staleness_secs,
        batch_limit = config.scheduler.batch_limit,
        "fleetmon-server starting"
    );

    // Collaborators; any failure here stops the process before the first tick.
    let db_path = Path::new(&config.registry.db_path);
    let registry: Arc<dyn NodeRegistry> = Arc::new(
        SqliteNodeRegistry::open(db_path, config.heartbeat_window())
            .context("Failed to open node registry")?,
    );
    let liveness = Arc::new(
        SqliteLivenessOracle::open(db_path).context("Failed to open liveness store")?,
    );

    let sink: Arc<dyn MetricsSink> =
        Arc::new(InfluxSink::new(config.sink.settings()).context("Invalid sink configuration")?);
    sink.ping()
        .await
        .with_context(|| format!("Metrics sink at {} is unreachable", config.sink.url))?;

    let context = Arc::new(NodeTaskContext {
        registry: registry.clone(),
        liveness,
        collector: NodeCollector::new(Arc::new(DockerRuntime::new()), config.collector.settings()),
        emitter: MetricEmitter::new(sink),
        runtime_socket: config.collector.runtime_socket.clone(),
    });

    let dispatcher = DispatchController::new(
        context,
        Duration::from_millis(config.scheduler.stagger_ms),
        config.scheduler.dispatch_chunk_size,
        config.scheduler.max_in_flight,
    );
    let in_flight = dispatcher.in_flight();
    let stats = Arc::new(SchedulerStats::default());

    let mut scheduler = CollectionScheduler::new(
        registry.clone(),
        EligibilityFilter::new(
            registry,
            config.staleness(),
            config.scheduler.batch_limit,
        ),
        dispatcher,
        stats.clone(),
        Duration::from_secs(config.scheduler.tick_secs),
        config.scheduler.refresh_every_ticks,
    );
    let reachable = scheduler
        .bootstrap()
        .await
        .context("Failed to load reachable nodes")?;
    tracing::info!(reachable, "Initial reachable node set loaded");

    let scheduler_handle = tokio::spawn(scheduler.run());

    let status_server = if config.status.enabled {
        let addr: SocketAddr = format!("0.0.0.0:{}", config.status.http_port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind status endpoint on {addr}"))?;
        tracing::info!(http = %addr, "Status endpoint listening");
        let app = build_status_app(StatusState { stats, in_flight });
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "Status server error");
            }
        }))
    } else {
        tracing::info!("Status endpoint disabled");
        None
    };

    signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    scheduler_handle.abort();
    if let Some(h) = status_server {
        h.abort();
    }
    Ok(())
}
