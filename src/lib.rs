//! Tool tracking router over OpenIGTLink
//!
//! Poses of tracked tools (probes, pointers, reference markers) arrive from a
//! tracking device, are chained with static calibration transforms into the
//! frames clients care about, and are streamed as TDATA messages to any
//! number of navigation clients.
//!
//! # Pipeline
//!
//! ```text
//! tracker --> acquisition --> ToolSourceRegistry --> TransformEngine
//!                                                        |
//!               clients <-- TrackingServer <-- ChannelMultiplexer
//! ```
//!
//! - [`config`] - Device-set TOML, resolved and validated into a [`config::DeviceSet`]
//! - [`tracking`] - Latest pose per tool, frame graph, per-channel snapshots
//! - [`acquisition`] - Bounded queue from the tracker into the registry, plus a simulator
//! - [`protocol`] - OpenIGTLink v2 framing and the message types the server speaks
//! - [`io`] - Client sessions, delivery with retries, the streaming server
//!
//! # Quick Start
//!
//! ```no_run
//! use igtl_tracking_server::config::DeviceSet;
//! use igtl_tracking_server::io::TrackingServer;
//! use igtl_tracking_server::tracking::ToolSourceRegistry;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> igtl_tracking_server::Result<()> {
//!     let device_set = Arc::new(DeviceSet::from_file("config/device_set.toml")?);
//!     let registry = Arc::new(ToolSourceRegistry::new(&device_set));
//!
//!     // The tracker driver feeds poses in
//!     registry.update("Stylus", Default::default(), true, 0.0)?;
//!
//!     let server = TrackingServer::bind(device_set, registry).await?;
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     server.run(shutdown_rx).await
//! }
//! ```
//!
//! # Logging
//!
//! All components log through `tracing`. The binary honours `RUST_LOG`, e.g.
//! `RUST_LOG=igtl_tracking_server::io=debug`.

pub mod acquisition;
pub mod config;
pub mod error;
pub mod io;
pub mod protocol;
pub mod tracking;

// Re-export commonly used types
pub use config::DeviceSet;
pub use error::{Result, TrackingError};
pub use io::TrackingServer;
pub use tracking::{ChannelMultiplexer, Matrix4, ToolSourceRegistry, TransformEngine, TransformResult};
