//! Tracking pipeline: pose registry, frame composition and channel snapshots

pub mod channel;
pub mod engine;
pub mod matrix;
pub mod registry;

pub use channel::ChannelMultiplexer;
pub use engine::{TransformEngine, TransformResult};
pub use matrix::Matrix4;
pub use registry::{PoseSample, SampleUpdate, ToolSourceRegistry};
