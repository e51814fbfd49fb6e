mod aggregator;
mod collectors;
mod config;
mod format;
mod http;
mod metrics;
mod scheduler;
mod state;

use aggregator::{now_unix, Aggregator, Sources};
use axum::serve;
use clap::Parser;
use collectors::sensors::HostSensorTree;
use collectors::system::{SysinfoCpu, SysinfoMemory, SysinfoNetwork};
use config::Config;
use metrics::Metrics;
use scheduler::Scheduler;
use state::State;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const COMMAND_QUEUE: usize = 32;

#[derive(Parser, Debug)]
#[command(name = "vitalsd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_or_default(&cli.config) {
        Ok((cfg, true)) => cfg,
        Ok((cfg, false)) => {
            info!(path = %cli.config, "config file not found, using defaults");
            cfg
        }
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let sensors = match HostSensorTree::open(cfg.gpu.external_refresh()) {
        Ok(tree) => tree,
        Err(err) => {
            error!(error = %err, "failed to open hardware sensor tree");
            std::process::exit(1);
        }
    };

    let sources = Sources {
        cpu: Box::new(SysinfoCpu::new()),
        memory: Box::new(SysinfoMemory::new()),
        network: Box::new(SysinfoNetwork::new()),
        sensors: Box::new(sensors),
    };
    let mut aggregator = Aggregator::new(sources, &cfg);
    tokio::task::block_in_place(|| aggregator.start());
    info!(
        interface = aggregator.interface().unwrap_or("<none>"),
        "network interface selected"
    );

    if cli.once {
        run_once(aggregator, &cfg).await;
        return;
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        idle_after_secs = cfg.idle_after_secs,
        "starting vitalsd"
    );

    let shared_state = Arc::new(RwLock::new(State::new(now_unix())));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);

    let http_task = {
        let listen = cfg.listen.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, command_tx);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    let scheduler_task = {
        let scheduler = Scheduler {
            aggregator,
            interval: cfg.interval(),
            idle_after: cfg.idle_after(),
            state: shared_state.clone(),
            metrics: metrics.clone(),
        };
        tokio::spawn(scheduler.run(command_rx, shutdown_rx.clone()))
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("Ctrl+C received, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = scheduler_task.await;
    let _ = http_task.await;
}

async fn run_once(mut aggregator: Aggregator, cfg: &Config) {
    // The first tick only primes the rate counters.
    tokio::task::block_in_place(|| aggregator.tick());
    tokio::time::sleep(cfg.interval()).await;
    let (snapshot, report) = tokio::task::block_in_place(|| aggregator.tick());
    for key in &report.failed {
        info!(metric = key.as_str(), "no sample for metric");
    }

    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{json}"),
        Err(err) => {
            error!(error = %err, "failed to serialize snapshot");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
