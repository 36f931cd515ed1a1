//! Output channel multiplexer
//!
//! A snapshot always has one entry per configured tool, in configured order.
//! Tools without a usable pose show up as invalid entries.

use crate::config::DeviceSet;
use crate::error::{Result, TrackingError};
use crate::tracking::engine::{TransformEngine, TransformResult};
use std::sync::Arc;

/// Groups tool results into per-channel snapshots
#[derive(Debug, Clone)]
pub struct ChannelMultiplexer {
    engine: Arc<TransformEngine>,
}

impl ChannelMultiplexer {
    pub fn new(engine: Arc<TransformEngine>) -> Self {
        Self { engine }
    }

    fn device_set(&self) -> &DeviceSet {
        self.engine.device_set()
    }

    /// Current results for every tool of `channel_id`
    ///
    /// # Errors
    ///
    /// [`TrackingError::UnknownChannel`] if no such channel is configured.
    pub fn snapshot(&self, channel_id: &str) -> Result<Vec<TransformResult>> {
        let channel = self
            .device_set()
            .channel(channel_id)
            .ok_or_else(|| TrackingError::UnknownChannel(channel_id.to_string()))?;
        Ok(channel
            .tools
            .iter()
            .map(|&tool| self.engine.compute_index(tool))
            .collect())
    }

    /// Ids of the streamed channels, in configuration order
    pub fn channel_ids(&self) -> Vec<String> {
        let set = self.device_set();
        set.server
            .channels
            .iter()
            .map(|&i| set.channels[i].id.clone())
            .collect()
    }

    /// Transform engine backing this multiplexer
    pub fn engine(&self) -> &Arc<TransformEngine> {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::matrix::Matrix4;
    use crate::tracking::registry::ToolSourceRegistry;

    fn multiplexer() -> (ChannelMultiplexer, Arc<ToolSourceRegistry>) {
        let set = Arc::new(
            DeviceSet::from_toml_str(
                r#"
[device]
id = "Tracker"
serial_port = "COM1"
baud_rate = 9600

[[tools]]
id = "A"

[[tools]]
id = "B"

[[tools]]
id = "C"

[[channels]]
id = "Main"
tools = ["C", "A", "B"]

[[channels]]
id = "Pointer"
tools = ["A"]

[server]
channels = ["Pointer", "Main"]
"#,
            )
            .unwrap(),
        );
        let registry = Arc::new(ToolSourceRegistry::new(&set));
        let engine = Arc::new(TransformEngine::new(set, registry.clone()));
        (ChannelMultiplexer::new(engine), registry)
    }

    #[test]
    fn test_snapshot_keeps_shape() {
        let (mux, registry) = multiplexer();

        let names = |results: &[TransformResult]| -> Vec<String> {
            results.iter().map(|r| r.name.clone()).collect()
        };

        let empty = mux.snapshot("Main").unwrap();
        assert_eq!(names(&empty), ["CToTracker", "AToTracker", "BToTracker"]);
        assert!(empty.iter().all(|r| !r.valid));

        registry.update("A", Matrix4::identity(), true, 1.0).unwrap();
        let partial = mux.snapshot("Main").unwrap();
        assert_eq!(names(&partial), ["CToTracker", "AToTracker", "BToTracker"]);
        assert_eq!(
            partial.iter().map(|r| r.valid).collect::<Vec<_>>(),
            [false, true, false]
        );
    }

    #[test]
    fn test_unknown_channel() {
        let (mux, _) = multiplexer();
        assert!(matches!(
            mux.snapshot("Nope"),
            Err(TrackingError::UnknownChannel(id)) if id == "Nope"
        ));
    }

    #[test]
    fn test_channel_ids_follow_server_order() {
        let (mux, _) = multiplexer();
        assert_eq!(mux.channel_ids(), ["Pointer", "Main"]);
    }
}
