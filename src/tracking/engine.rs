//! Coordinate transform engine
//!
//! Every live pose arrives as `ToolToDevice`. To express a tool in its
//! reference frame the engine walks a frame graph from the device frame to
//! that reference frame, multiplying one edge per hop:
//!
//! ```text
//! ToolToRef = E_n * ... * E_1 * ToolToDevice
//! ```
//!
//! Edges are the configured static transforms (usable in both directions
//! through their rigid inverse) and the live poses of the other tools, so a
//! tool can be expressed relative to another tracked tool. Paths are
//! resolved once, when the engine is built.
//!
//! Rotation blocks are never re-orthonormalized. Accumulated drift is
//! reported in [`TransformResult::drift`].

use crate::config::{DeviceSet, ToolIndex};
use crate::tracking::matrix::Matrix4;
use crate::tracking::registry::ToolSourceRegistry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Named transform produced for one tool
#[derive(Debug, Clone, PartialEq)]
pub struct TransformResult {
    /// `<Tool>To<ReferenceFrame>`
    pub name: String,
    /// Composed matrix; identity contributions stand in for missing poses
    pub matrix: Matrix4,
    /// True only if every composed pose and static transform is valid
    pub valid: bool,
    /// Timestamp of the tool's own sample, if one was ever stored
    pub timestamp: Option<f64>,
    /// Sum of the error estimates of the composed static transforms
    pub error: f64,
    /// Largest deviation of the rotation block from orthonormality
    pub drift: f64,
}

/// One hop of a frame path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// Configured static transform, by index
    Static { transform: usize, inverse: bool },
    /// Live pose of a tool (`ToolToDevice`), by index
    Pose { tool: ToolIndex, inverse: bool },
}

#[derive(Debug)]
struct ToolPlan {
    name: String,
    /// `None` when the reference frame cannot be reached from the device frame
    path: Option<Vec<Edge>>,
}

/// Computes [`TransformResult`]s from the registry and the device set
#[derive(Debug)]
pub struct TransformEngine {
    device_set: Arc<DeviceSet>,
    registry: Arc<ToolSourceRegistry>,
    plans: Vec<ToolPlan>,
}

impl TransformEngine {
    /// Build the engine and resolve one frame path per tool
    ///
    /// Unreachable reference frames are logged; their tools always produce
    /// invalid results.
    pub fn new(device_set: Arc<DeviceSet>, registry: Arc<ToolSourceRegistry>) -> Self {
        let graph = FrameGraph::build(&device_set);

        let plans = device_set
            .tools
            .iter()
            .map(|tool| {
                let name = tool.transform_name();
                let path = graph.path(&device_set.device.frame, &tool.reference_frame);
                match &path {
                    Some(edges) => debug!(transform = %name, hops = edges.len(), "Frame path resolved"),
                    None => warn!(
                        transform = %name,
                        from = %device_set.device.frame,
                        to = %tool.reference_frame,
                        "Reference frame unreachable, transform will always be invalid"
                    ),
                }
                ToolPlan { name, path }
            })
            .collect();

        Self {
            device_set,
            registry,
            plans,
        }
    }

    /// Compute the transform of `tool_id` in its reference frame
    ///
    /// Never fails: an unknown tool yields an invalid result named
    /// `<tool_id>To<DeviceFrame>`.
    pub fn compute(&self, tool_id: &str) -> TransformResult {
        match self.device_set.tool_index(tool_id) {
            Some(index) => self.compute_index(index),
            None => TransformResult {
                name: format!("{}To{}", tool_id, self.device_set.device.frame),
                matrix: Matrix4::identity(),
                valid: false,
                timestamp: None,
                error: 0.0,
                drift: 0.0,
            },
        }
    }

    /// Compute the transform of the tool at `index`
    pub(crate) fn compute_index(&self, index: ToolIndex) -> TransformResult {
        let plan = &self.plans[index];
        let own = self.registry.sample_at(index);

        let mut matrix = own.as_ref().map(|s| s.pose).unwrap_or_default();
        let mut valid = own.as_ref().map(|s| s.valid).unwrap_or(false);
        let timestamp = own.as_ref().map(|s| s.timestamp);
        let mut error = 0.0;

        match &plan.path {
            Some(path) => {
                for edge in path {
                    let (hop, hop_valid) = self.edge_matrix(*edge, &mut error);
                    matrix = hop * matrix;
                    valid &= hop_valid;
                }
            }
            None => valid = false,
        }

        TransformResult {
            name: plan.name.clone(),
            drift: matrix.orthonormality_error(),
            matrix,
            valid,
            timestamp,
            error,
        }
    }

    fn edge_matrix(&self, edge: Edge, error: &mut f64) -> (Matrix4, bool) {
        let (matrix, valid, inverse) = match edge {
            Edge::Static { transform, inverse } => {
                let t = &self.device_set.transforms[transform];
                *error += t.error;
                (t.matrix, t.valid, inverse)
            }
            Edge::Pose { tool, inverse } => match self.registry.sample_at(tool) {
                Some(sample) => (sample.pose, sample.valid, inverse),
                None => (Matrix4::identity(), false, false),
            },
        };
        if inverse {
            (matrix.rigid_inverse(), valid)
        } else {
            (matrix, valid)
        }
    }

    /// Device set this engine was built from
    pub fn device_set(&self) -> &Arc<DeviceSet> {
        &self.device_set
    }
}

/// Adjacency list over frame names, in configuration order
struct FrameGraph<'a> {
    adjacency: HashMap<&'a str, Vec<(&'a str, Edge)>>,
}

impl<'a> FrameGraph<'a> {
    fn build(device_set: &'a DeviceSet) -> Self {
        let mut adjacency: HashMap<&str, Vec<(&str, Edge)>> = HashMap::new();
        let mut link = |a: &'a str, b: &'a str, forward: Edge, backward: Edge| {
            adjacency.entry(a).or_default().push((b, forward));
            adjacency.entry(b).or_default().push((a, backward));
        };

        for (i, t) in device_set.transforms.iter().enumerate() {
            link(
                &t.from,
                &t.to,
                Edge::Static { transform: i, inverse: false },
                Edge::Static { transform: i, inverse: true },
            );
        }
        let device_frame = device_set.device.frame.as_str();
        for (i, tool) in device_set.tools.iter().enumerate() {
            link(
                &tool.id,
                device_frame,
                Edge::Pose { tool: i, inverse: false },
                Edge::Pose { tool: i, inverse: true },
            );
        }

        Self { adjacency }
    }

    /// Shortest edge list leading from `start` to `goal`
    fn path(&self, start: &'a str, goal: &str) -> Option<Vec<Edge>> {
        if start == goal {
            return Some(Vec::new());
        }

        let mut came_from: HashMap<&str, (&str, Edge)> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(frame) = queue.pop_front() {
            for &(next, edge) in self.adjacency.get(frame).into_iter().flatten() {
                if !visited.insert(next) {
                    continue;
                }
                came_from.insert(next, (frame, edge));
                if next == goal {
                    let mut edges = Vec::new();
                    let mut cursor = next;
                    while let Some(&(prev, edge)) = came_from.get(cursor) {
                        edges.push(edge);
                        cursor = prev;
                    }
                    edges.reverse();
                    return Some(edges);
                }
                queue.push_back(next);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = "[1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]";

    fn engine(toml: &str) -> (TransformEngine, Arc<ToolSourceRegistry>) {
        let device_set = Arc::new(DeviceSet::from_toml_str(toml).unwrap());
        let registry = Arc::new(ToolSourceRegistry::new(&device_set));
        (TransformEngine::new(device_set, registry.clone()), registry)
    }

    fn header() -> String {
        "[device]\nid = \"Tracker\"\nhost = \"localhost\"\nport = 8765\nframes = [\"Ref\", \"Table\"]\n".to_string()
    }

    #[test]
    fn test_device_frame_passthrough() {
        let (engine, registry) = engine(&format!("{}\n[[tools]]\nid = \"A\"\n", header()));
        let pose = Matrix4::rotation_z(0.4, 1.0, 2.0, 3.0);
        registry.update("A", pose, true, 1.0).unwrap();

        let result = engine.compute("A");
        assert_eq!(result.name, "AToTracker");
        assert_eq!(result.matrix, pose);
        assert!(result.valid);
        assert_eq!(result.timestamp, Some(1.0));
        assert_eq!(result.error, 0.0);
    }

    #[test]
    fn test_static_chain_order() {
        // TrackerToRef then RefToTable: result = RefToTable * TrackerToRef * pose
        let toml = format!(
            "{}\n[[tools]]\nid = \"A\"\nreference_frame = \"Table\"\n\n[[transforms]]\nfrom = \"Tracker\"\nto = \"Ref\"\nmatrix = [0,-1,0,0, 1,0,0,0, 0,0,1,0, 0,0,0,1]\nerror = 0.5\n\n[[transforms]]\nfrom = \"Ref\"\nto = \"Table\"\nmatrix = [1,0,0,10, 0,1,0,0, 0,0,1,0, 0,0,0,1]\nerror = 0.25\n",
            header()
        );
        let (engine, registry) = engine(&toml);
        let pose = Matrix4::translation(1.0, 0.0, 0.0);
        registry.update("A", pose, true, 1.0).unwrap();

        let set = engine.device_set().clone();
        let expected = set.transforms[1].matrix * set.transforms[0].matrix * pose;

        let result = engine.compute("A");
        assert_eq!(result.name, "AToTable");
        assert!(result.matrix.approx_eq(&expected, 1e-12));
        let [x, y, _] = result.matrix.translation_part();
        assert!((x - 10.0).abs() < 1e-12);
        assert!((y - 1.0).abs() < 1e-12);
        assert_eq!(result.error, 0.75);
        assert!(result.valid);
    }

    #[test]
    fn test_static_edge_traversed_backwards() {
        let toml = format!(
            "{}\n[[tools]]\nid = \"A\"\nreference_frame = \"Ref\"\n\n[[transforms]]\nfrom = \"Ref\"\nto = \"Tracker\"\nmatrix = [1,0,0,5, 0,1,0,0, 0,0,1,0, 0,0,0,1]\n",
            header()
        );
        let (engine, registry) = engine(&toml);
        registry.update("A", Matrix4::identity(), true, 1.0).unwrap();

        let result = engine.compute("A");
        assert_eq!(result.matrix.translation_part(), [-5.0, 0.0, 0.0]);
        assert!(result.valid);
    }

    #[test]
    fn test_relative_to_other_tool() {
        let toml = format!(
            "{}\n[[tools]]\nid = \"Stylus\"\nreference_frame = \"Reference\"\n\n[[tools]]\nid = \"Reference\"\n",
            header()
        );
        let (engine, registry) = engine(&toml);
        let stylus = Matrix4::translation(10.0, 5.0, 0.0);
        let reference = Matrix4::rotation_z(0.3, 2.0, 1.0, 0.0);
        registry.update("Stylus", stylus, true, 1.0).unwrap();
        registry.update("Reference", reference, true, 1.0).unwrap();

        let result = engine.compute("Stylus");
        assert_eq!(result.name, "StylusToReference");
        assert!(result.matrix.approx_eq(&(reference.rigid_inverse() * stylus), 1e-12));
        assert!(result.valid);

        // Reference tool disappears: stylus result becomes invalid
        registry.update("Reference", reference, false, 2.0).unwrap();
        assert!(!engine.compute("Stylus").valid);
    }

    #[test]
    fn test_missing_reference_pose_invalid() {
        let toml = format!(
            "{}\n[[tools]]\nid = \"Stylus\"\nreference_frame = \"Reference\"\n\n[[tools]]\nid = \"Reference\"\n",
            header()
        );
        let (engine, registry) = engine(&toml);
        registry.update("Stylus", Matrix4::translation(1.0, 0.0, 0.0), true, 1.0).unwrap();

        let result = engine.compute("Stylus");
        assert!(!result.valid);
        assert_eq!(result.matrix.translation_part(), [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_invalid_static_transform_propagates() {
        let toml = format!(
            "{}\n[[tools]]\nid = \"A\"\nreference_frame = \"Table\"\n\n[[transforms]]\nfrom = \"Tracker\"\nto = \"Ref\"\nmatrix = {}\n\n[[transforms]]\nfrom = \"Ref\"\nto = \"Table\"\nmatrix = {}\nvalid = false\n",
            header(),
            IDENTITY,
            IDENTITY
        );
        let (engine, registry) = engine(&toml);
        registry.update("A", Matrix4::identity(), true, 1.0).unwrap();
        assert!(!engine.compute("A").valid);
    }

    #[test]
    fn test_invalid_own_pose() {
        let (engine, registry) = engine(&format!("{}\n[[tools]]\nid = \"A\"\n", header()));
        registry.update("A", Matrix4::identity(), false, 1.0).unwrap();
        let result = engine.compute("A");
        assert!(!result.valid);
        assert_eq!(result.timestamp, Some(1.0));
    }

    #[test]
    fn test_never_sampled_tool() {
        let (engine, _) = engine(&format!("{}\n[[tools]]\nid = \"A\"\n", header()));
        let result = engine.compute("A");
        assert!(!result.valid);
        assert_eq!(result.matrix, Matrix4::identity());
        assert_eq!(result.timestamp, None);
    }

    #[test]
    fn test_unreachable_reference_frame() {
        let toml = format!("{}\n[[tools]]\nid = \"A\"\nreference_frame = \"Table\"\n", header());
        let (engine, registry) = engine(&toml);
        registry.update("A", Matrix4::identity(), true, 1.0).unwrap();
        let result = engine.compute("A");
        assert_eq!(result.name, "AToTable");
        assert!(!result.valid);
    }

    #[test]
    fn test_unknown_tool() {
        let (engine, _) = engine(&format!("{}\n[[tools]]\nid = \"A\"\n", header()));
        let result = engine.compute("Probe");
        assert_eq!(result.name, "ProbeToTracker");
        assert!(!result.valid);
    }

    #[test]
    fn test_drift_reported_not_corrected() {
        let (engine, registry) = engine(&format!("{}\n[[tools]]\nid = \"A\"\n", header()));
        let mut pose = Matrix4::identity();
        pose.0[0][0] = 1.01;
        registry.update("A", pose, true, 1.0).unwrap();

        let result = engine.compute("A");
        assert_eq!(result.matrix, pose);
        assert!(result.drift > 0.01);
    }
}
