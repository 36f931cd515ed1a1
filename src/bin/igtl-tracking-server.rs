//! Tracking server binary
//!
//! # Usage
//!
//! ```bash
//! # Serve the tools of a device set
//! igtl-tracking-server config/device_set.toml
//!
//! # Same, with simulated poses instead of tracking hardware
//! igtl-tracking-server config/device_set.toml --simulate
//!
//! # More detail for the network side only
//! RUST_LOG=igtl_tracking_server::io=debug igtl-tracking-server config/device_set.toml
//! ```

use igtl_tracking_server::acquisition::{self, run_acquisition, AcquisitionSender, AcquisitionStats, SimulatedTracker};
use igtl_tracking_server::config::{Connection, DeviceSet};
use igtl_tracking_server::error::Result;
use igtl_tracking_server::io::TrackingServer;
use igtl_tracking_server::tracking::ToolSourceRegistry;
use std::env;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const ACQUISITION_QUEUE_CAPACITY: usize = 256;
const SIMULATION_RATE_HZ: f64 = 60.0;

struct Args {
    config_path: String,
    simulate: bool,
}

fn parse_args() -> Option<Args> {
    let mut config_path = None;
    let mut simulate = false;
    for arg in env::args().skip(1) {
        match arg.as_str() {
            "--simulate" => simulate = true,
            _ if config_path.is_none() && !arg.starts_with("--") => config_path = Some(arg),
            _ => return None,
        }
    }
    Some(Args {
        config_path: config_path?,
        simulate,
    })
}

#[tokio::main]
async fn main() {
    let Some(args) = parse_args() else {
        let program = env::args().next().unwrap_or_else(|| "igtl-tracking-server".to_string());
        eprintln!("Usage: {} <config.toml> [--simulate]", program);
        std::process::exit(2);
    };

    let device_set = match DeviceSet::from_file(&args.config_path) {
        Ok(device_set) => device_set,
        Err(e) => {
            eprintln!("[ERROR] Failed to load {}: {}", args.config_path, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&device_set.logging.level)),
        )
        .with_target(true)
        .init();

    if let Err(e) = run(device_set, args.simulate).await {
        error!(error = %e, "Tracking server failed");
        std::process::exit(1);
    }
}

async fn run(device_set: DeviceSet, simulate: bool) -> Result<()> {
    let device_set = Arc::new(device_set);
    info!(
        device = %device_set.device.id,
        tools = device_set.tools.len(),
        channels = device_set.channels.len(),
        "Device set loaded"
    );
    match &device_set.device.connection {
        Connection::Serial { port, baud_rate } => info!(port = %port, baud_rate, "Tracker on serial port"),
        Connection::Network { host, port } => info!(host = %host, port, "Tracker on network"),
    }

    let registry = Arc::new(ToolSourceRegistry::new(&device_set));
    let server = TrackingServer::bind(device_set.clone(), registry.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let pipeline = Pipeline::start(&device_set, registry, simulate, shutdown_rx.clone());

    let ctrl_c_tx = shutdown_tx.clone();
    let ctrl_c = tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
        }
        let _ = ctrl_c_tx.send(true);
    });

    let result = server.run(shutdown_rx).await;

    // The server may have stopped on its own; the pose source must follow either way
    ctrl_c.abort();
    pipeline.stop(&shutdown_tx).await;
    result
}

/// Pose acquisition running next to the server
struct Pipeline {
    sender: AcquisitionSender,
    pump: JoinHandle<AcquisitionStats>,
    simulator: Option<JoinHandle<()>>,
}

impl Pipeline {
    fn start(
        device_set: &DeviceSet,
        registry: Arc<ToolSourceRegistry>,
        simulate: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (sender, receiver) = acquisition::channel(ACQUISITION_QUEUE_CAPACITY);
        let pump = tokio::spawn(run_acquisition(receiver, registry));

        let simulator = if simulate {
            let tracker = SimulatedTracker::new(device_set, SIMULATION_RATE_HZ);
            Some(tokio::spawn(tracker.run(sender.clone(), shutdown)))
        } else {
            info!("No pose source attached; tools stay invalid until a driver submits samples");
            None
        };

        Pipeline { sender, pump, simulator }
    }

    /// Signal shutdown, then wait for the pose source and the pump to finish
    async fn stop(self, shutdown: &watch::Sender<bool>) -> Option<AcquisitionStats> {
        let _ = shutdown.send(true);
        if let Some(simulator) = self.simulator {
            if let Err(e) = simulator.await {
                warn!(error = %e, "Simulated tracker task failed");
            }
        }
        drop(self.sender);
        match self.pump.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, "Acquisition task failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn device_set() -> DeviceSet {
        DeviceSet::from_toml_str(
            "[device]\nid = \"Sim\"\nhost = \"localhost\"\nport = 1\n\n[[tools]]\nid = \"A\"\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pipeline_stops_without_ctrl_c() {
        let device_set = device_set();
        let registry = Arc::new(ToolSourceRegistry::new(&device_set));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = Pipeline::start(&device_set, registry.clone(), true, shutdown_rx.clone());

        // Server gone with an error: its receiver is dropped, nothing else signals
        drop(shutdown_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stats = tokio::time::timeout(Duration::from_secs(2), pipeline.stop(&shutdown_tx))
            .await
            .expect("pipeline did not stop")
            .unwrap();
        assert!(stats.accepted > 0);
        assert!(registry.latest("A").is_some());
    }

    #[tokio::test]
    async fn test_pipeline_stops_without_simulator() {
        let device_set = device_set();
        let registry = Arc::new(ToolSourceRegistry::new(&device_set));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = Pipeline::start(&device_set, registry, false, shutdown_rx);

        let stats = tokio::time::timeout(Duration::from_secs(2), pipeline.stop(&shutdown_tx))
            .await
            .expect("pipeline did not stop")
            .unwrap();
        assert_eq!(stats, AcquisitionStats::default());
    }
}
