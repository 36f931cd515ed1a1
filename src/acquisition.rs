//! Acquisition boundary
//!
//! The tracking device driver pushes pose samples into a bounded queue and
//! never waits on anything downstream. A pump task drains the queue into the
//! [`ToolSourceRegistry`].

use crate::config::DeviceSet;
use crate::error::TrackingError;
use crate::tracking::matrix::Matrix4;
use crate::tracking::registry::{SampleUpdate, ToolSourceRegistry};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// One tracker-reported pose, as handed over by the acquisition layer
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUpdate {
    pub tool_id: String,
    /// Tool-to-device transform
    pub pose: Matrix4,
    pub valid: bool,
    /// Monotonic timestamp in seconds
    pub timestamp: f64,
}

/// Producer half of the acquisition queue
///
/// Cloneable; one clone per acquisition source.
#[derive(Debug, Clone)]
pub struct AcquisitionSender {
    tx: mpsc::Sender<ToolUpdate>,
    dropped: Arc<AtomicU64>,
}

impl AcquisitionSender {
    /// Queue an update without blocking
    ///
    /// Returns `false` if the queue is full or the pump has stopped. A
    /// dropped update is superseded by the next sample of the same tool.
    pub fn submit(&self, update: ToolUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(update)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(tool = %update.tool_id, dropped, "Acquisition queue full, update dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Number of updates dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer half of the acquisition queue
#[derive(Debug)]
pub struct AcquisitionReceiver {
    rx: mpsc::Receiver<ToolUpdate>,
}

/// Create a bounded acquisition queue
pub fn channel(capacity: usize) -> (AcquisitionSender, AcquisitionReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        AcquisitionSender {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        AcquisitionReceiver { rx },
    )
}

/// Counters reported by [`run_acquisition`] when the queue closes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub accepted: u64,
    pub stale: u64,
    pub unknown: u64,
}

/// Apply queued updates to the registry until every sender is dropped
pub async fn run_acquisition(mut receiver: AcquisitionReceiver, registry: Arc<ToolSourceRegistry>) -> AcquisitionStats {
    let mut stats = AcquisitionStats::default();

    while let Some(update) = receiver.rx.recv().await {
        match registry.update(&update.tool_id, update.pose, update.valid, update.timestamp) {
            Ok(SampleUpdate::Accepted) => stats.accepted += 1,
            Ok(SampleUpdate::StaleIgnored) => stats.stale += 1,
            Err(TrackingError::UnknownTool(id)) => {
                stats.unknown += 1;
                warn!(tool = %id, "Pose sample for unknown tool discarded");
            }
            Err(e) => warn!(error = %e, "Pose sample rejected"),
        }
    }

    info!(
        accepted = stats.accepted,
        stale = stats.stale,
        unknown = stats.unknown,
        "Acquisition queue closed"
    );
    stats
}

/// Development pose source
///
/// Moves every configured tool on its own circle in the device frame, so a
/// server can be exercised without tracking hardware.
#[derive(Debug, Clone)]
pub struct SimulatedTracker {
    tool_ids: Vec<String>,
    rate_hz: f64,
    radius: f64,
    period: Duration,
}

impl SimulatedTracker {
    /// Simulate every tool of `device_set` at `rate_hz`
    pub fn new(device_set: &DeviceSet, rate_hz: f64) -> Self {
        Self {
            tool_ids: device_set.tools.iter().map(|t| t.id.clone()).collect(),
            rate_hz: rate_hz.max(1.0),
            radius: 50.0,
            period: Duration::from_secs(4),
        }
    }

    /// Circle radius in millimeters (default 50)
    pub fn with_radius(mut self, radius: f64) -> Self {
        self.radius = radius;
        self
    }

    /// Time for one revolution (default 4 s)
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Pose of tool number `index` at `elapsed` seconds
    pub fn pose_at(&self, index: usize, elapsed: f64) -> Matrix4 {
        let period = self.period.as_secs_f64().max(f64::EPSILON);
        let phase = index as f64 * std::f64::consts::FRAC_PI_2;
        let angle = phase + std::f64::consts::TAU * elapsed / period;
        let radius = self.radius * (1.0 + index as f64 * 0.5);
        Matrix4::rotation_z(angle, radius * angle.cos(), radius * angle.sin(), index as f64 * 10.0)
    }

    /// Submit samples until `shutdown` flips to `true` or the queue closes
    pub async fn run(self, sender: AcquisitionSender, mut shutdown: watch::Receiver<bool>) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / self.rate_hz));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(tools = self.tool_ids.len(), rate_hz = self.rate_hz, "Simulated tracker started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let elapsed = started.elapsed().as_secs_f64();
                    for (index, tool_id) in self.tool_ids.iter().enumerate() {
                        let update = ToolUpdate {
                            tool_id: tool_id.clone(),
                            pose: self.pose_at(index, elapsed),
                            valid: true,
                            timestamp: elapsed,
                        };
                        if !sender.submit(update) && sender.tx.is_closed() {
                            info!("Acquisition queue closed, simulated tracker stopping");
                            return;
                        }
                    }
                    trace!(elapsed, "Simulated samples submitted");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Simulated tracker stopped");
                        return;
                    }
                }
            }
        }
    }
}
