//! Per-tool storage of the latest pose sample
//!
//! Writers replace a tool's sample wholesale behind an `Arc`; readers clone
//! the `Arc` out of the slot. A reader therefore sees either the old or the
//! new sample, never a mix of both.

use crate::config::{DeviceSet, ToolIndex};
use crate::error::{Result, TrackingError};
use crate::tracking::matrix::Matrix4;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{trace, warn};

/// One tracker-reported pose of a tool, relative to the device frame
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSample {
    /// Tool-to-device transform
    pub pose: Matrix4,
    /// Whether the tracker considered the tool visible and the pose usable
    pub valid: bool,
    /// Monotonic acquisition timestamp in seconds
    pub timestamp: f64,
}

/// Outcome of [`ToolSourceRegistry::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleUpdate {
    /// Sample stored
    Accepted,
    /// Sample older than the stored one, or without a finite timestamp; nothing changed
    StaleIgnored,
}

type Slot = RwLock<Option<Arc<PoseSample>>>;

/// Latest pose sample per configured tool
///
/// Created from a [`DeviceSet`] and shared by reference (`Arc`) between the
/// acquisition pump and the transform engine.
#[derive(Debug)]
pub struct ToolSourceRegistry {
    index: HashMap<String, ToolIndex>,
    slots: Vec<Slot>,
}

impl ToolSourceRegistry {
    /// Allocate one empty slot per configured tool
    pub fn new(device_set: &DeviceSet) -> Self {
        let index = device_set
            .tools
            .iter()
            .enumerate()
            .map(|(i, tool)| (tool.id.clone(), i))
            .collect();
        let slots = device_set.tools.iter().map(|_| RwLock::new(None)).collect();
        Self { index, slots }
    }

    /// Store a new sample for `tool_id`
    ///
    /// A timestamp strictly older than the stored one is discarded and
    /// reported as [`SampleUpdate::StaleIgnored`]. Equal timestamps replace
    /// the stored sample.
    ///
    /// # Errors
    ///
    /// [`TrackingError::UnknownTool`] if no tool with that id is configured.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use igtl_tracking_server::config::DeviceSet;
    /// # use igtl_tracking_server::tracking::{Matrix4, SampleUpdate, ToolSourceRegistry};
    /// # let device_set = DeviceSet::from_file("config/device_set.toml")?;
    /// let registry = ToolSourceRegistry::new(&device_set);
    ///
    /// let outcome = registry.update("Stylus", Matrix4::identity(), true, 2.0)?;
    /// assert_eq!(outcome, SampleUpdate::Accepted);
    ///
    /// let outcome = registry.update("Stylus", Matrix4::identity(), true, 1.0)?;
    /// assert_eq!(outcome, SampleUpdate::StaleIgnored);
    /// # Ok::<(), igtl_tracking_server::error::TrackingError>(())
    /// ```
    pub fn update(&self, tool_id: &str, pose: Matrix4, valid: bool, timestamp: f64) -> Result<SampleUpdate> {
        let index = self
            .index
            .get(tool_id)
            .copied()
            .ok_or_else(|| TrackingError::UnknownTool(tool_id.to_string()))?;
        Ok(self.update_index(index, tool_id, pose, valid, timestamp))
    }

    fn update_index(&self, index: ToolIndex, tool_id: &str, pose: Matrix4, valid: bool, timestamp: f64) -> SampleUpdate {
        // A NaN or infinite timestamp would defeat every later ordering check
        if !timestamp.is_finite() {
            warn!(tool = tool_id, received = timestamp, "Pose sample with non-finite timestamp ignored");
            return SampleUpdate::StaleIgnored;
        }

        let mut slot = self.slots[index]
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(stored) = slot.as_ref() {
            if timestamp < stored.timestamp {
                warn!(
                    tool = tool_id,
                    stored = stored.timestamp,
                    received = timestamp,
                    "Stale pose sample ignored"
                );
                return SampleUpdate::StaleIgnored;
            }
        }

        *slot = Some(Arc::new(PoseSample {
            pose,
            valid,
            timestamp,
        }));
        trace!(tool = tool_id, timestamp, valid, "Pose sample stored");
        SampleUpdate::Accepted
    }

    /// Latest sample of `tool_id`, if any was stored
    pub fn latest(&self, tool_id: &str) -> Option<PoseSample> {
        let index = self.index.get(tool_id).copied()?;
        self.sample_at(index).map(|s| (*s).clone())
    }

    /// Shared handle on the latest sample of the tool at `index`
    pub(crate) fn sample_at(&self, index: ToolIndex) -> Option<Arc<PoseSample>> {
        self.slots
            .get(index)?
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of tool slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the registry has no tools
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
