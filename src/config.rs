//! Device-set configuration
//!
//! A device set is described in TOML and resolved into a validated,
//! immutable [`DeviceSet`]. Every later stage (registry, transform engine,
//! channel multiplexer, server) works on the resolved form only.
//!
//! # Example
//!
//! ```toml
//! [device]
//! id = "OpticalTracker"
//! frame = "Tracker"
//! serial_port = "/dev/ttyUSB0"
//! baud_rate = 115200
//!
//! [[tools]]
//! id = "Stylus"
//! geometry = "8700340.rom"
//! reference_frame = "Reference"
//!
//! [[tools]]
//! id = "Reference"
//! geometry = "8700339.rom"
//!
//! [[channels]]
//! id = "TrackerStream"
//! tools = ["Stylus", "Reference"]
//!
//! [server]
//! listening_port = 18944
//! ```

use crate::error::{Result, TrackingError};
use crate::protocol::types::tdata::MAX_NAME_LEN;
use crate::protocol::STREAMED_MESSAGE_TYPES;
use crate::tracking::matrix::{Matrix4, RIGID_TOLERANCE};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Index of a tool inside its [`DeviceSet`]
pub type ToolIndex = usize;

/// Raw device-set document, as written in TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceSetConfig {
    pub device: DeviceConfig,
    #[serde(default)]
    pub tools: Vec<ToolConfig>,
    #[serde(default)]
    pub transforms: Vec<TransformConfig>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tracking device parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub id: String,
    /// Name of the frame live poses are reported in
    #[serde(default = "default_device_frame")]
    pub frame: String,
    pub serial_port: Option<String>,
    pub baud_rate: Option<u32>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Additional frame names that only appear in static transforms
    #[serde(default)]
    pub frames: Vec<String>,
}

fn default_device_frame() -> String {
    "Tracker".to_string()
}

/// One tracked tool
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolConfig {
    pub id: String,
    /// Geometry/calibration descriptor, e.g. a marker ROM file
    pub geometry: Option<String>,
    /// Frame the tool's output transform is expressed in (defaults to the device frame)
    pub reference_frame: Option<String>,
}

/// Named static transform between two frames
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    pub from: String,
    pub to: String,
    /// 16 values, row-major
    pub matrix: Vec<f64>,
    #[serde(default)]
    pub error: f64,
    pub date: Option<String>,
    #[serde(default = "default_true")]
    pub valid: bool,
}

fn default_true() -> bool {
    true
}

/// Output channel grouping tools
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChannelConfig {
    pub id: String,
    pub tools: Vec<String>,
}

/// Streaming server parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listening_port")]
    pub listening_port: u16,
    /// Channels to stream; empty streams all channels
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_max_messages_in_flight")]
    pub max_messages_in_flight: usize,
    #[serde(default = "default_max_processing_time_ms")]
    pub max_processing_time_ms: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,
    #[serde(default)]
    pub keep_alive_interval_ms: u64,
    #[serde(default)]
    pub send_valid_transforms_only: bool,
    #[serde(default = "default_true")]
    pub crc_check: bool,
    #[serde(default)]
    pub default_client: DefaultClientConfig,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listening_port: default_listening_port(),
            channels: Vec::new(),
            max_messages_in_flight: default_max_messages_in_flight(),
            max_processing_time_ms: default_max_processing_time_ms(),
            tick_interval_ms: default_tick_interval_ms(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            keep_alive_interval_ms: 0,
            send_valid_transforms_only: false,
            crc_check: true,
            default_client: DefaultClientConfig::default(),
            tls: None,
        }
    }
}

fn default_listening_port() -> u16 {
    18944
}

fn default_max_messages_in_flight() -> usize {
    100
}

fn default_max_processing_time_ms() -> u64 {
    50
}

fn default_tick_interval_ms() -> u64 {
    20
}

fn default_retry_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    50
}

fn default_send_timeout_ms() -> u64 {
    1000
}

fn default_stall_timeout_ms() -> u64 {
    5000
}

/// Profile applied to clients that never send a subscription
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DefaultClientConfig {
    #[serde(default = "default_message_types")]
    pub message_types: Vec<String>,
    /// Empty subscribes to every transform
    #[serde(default)]
    pub transform_names: Vec<String>,
}

impl Default for DefaultClientConfig {
    fn default() -> Self {
        Self {
            message_types: default_message_types(),
            transform_names: Vec::new(),
        }
    }
}

fn default_message_types() -> Vec<String> {
    vec!["TDATA".to_string()]
}

/// TLS certificate and key (PEM)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert: String,
    pub key: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// How the tracking device is reached
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    Serial { port: String, baud_rate: u32 },
    Network { host: String, port: u16 },
}

/// Resolved tracking device
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub frame: String,
    pub connection: Connection,
    pub startup_delay: Duration,
}

/// Resolved tool
#[derive(Debug, Clone, PartialEq)]
pub struct Tool {
    pub id: String,
    pub geometry: Option<String>,
    pub reference_frame: String,
}

impl Tool {
    /// Name of the transform produced for this tool, `<Tool>To<ReferenceFrame>`
    pub fn transform_name(&self) -> String {
        format!("{}To{}", self.id, self.reference_frame)
    }
}

/// Resolved static transform between two frames
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTransform {
    pub from: String,
    pub to: String,
    pub matrix: Matrix4,
    /// Error estimate carried into composed results
    pub error: f64,
    pub date: Option<String>,
    pub valid: bool,
}

impl CalibrationTransform {
    /// `<From>To<To>`
    pub fn name(&self) -> String {
        format!("{}To{}", self.from, self.to)
    }
}

/// Resolved output channel: an ordered list of tools
#[derive(Debug, Clone, PartialEq)]
pub struct OutputChannel {
    pub id: String,
    pub tools: Vec<ToolIndex>,
}

/// Message types and transform names a client receives
///
/// An empty `transform_names` list means every transform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientProfile {
    pub message_types: Vec<String>,
    pub transform_names: Vec<String>,
}

impl ClientProfile {
    /// Whether messages of `message_type` are delivered
    pub fn accepts_type(&self, message_type: &str) -> bool {
        self.message_types.iter().any(|t| t == message_type)
    }

    /// Whether the transform called `name` is delivered
    pub fn wants(&self, name: &str) -> bool {
        self.transform_names.is_empty() || self.transform_names.iter().any(|n| n == name)
    }
}

/// Resolved server parameters
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listening_port: u16,
    /// Channels streamed, in configuration order
    pub channels: Vec<usize>,
    pub max_messages_in_flight: usize,
    pub max_processing_time: Duration,
    pub tick_interval: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub send_timeout: Duration,
    pub stall_timeout: Duration,
    pub keep_alive_interval: Option<Duration>,
    pub send_valid_transforms_only: bool,
    pub crc_check: bool,
    pub default_client: ClientProfile,
    pub tls: Option<TlsConfig>,
}

/// Validated, immutable device set
///
/// Owns its tools, static transforms and output channels. Reloading means
/// building a new `DeviceSet` and tearing down everything built on the old one.
#[derive(Debug, Clone)]
pub struct DeviceSet {
    pub device: Device,
    pub tools: Vec<Tool>,
    pub transforms: Vec<CalibrationTransform>,
    pub channels: Vec<OutputChannel>,
    pub server: ServerSettings,
    pub logging: LoggingConfig,
    tool_index: HashMap<String, ToolIndex>,
    channel_index: HashMap<String, usize>,
}

impl DeviceSet {
    /// Load and resolve a device set from a TOML file
    ///
    /// # Errors
    ///
    /// - [`TrackingError::Io`] - File could not be read
    /// - [`TrackingError::Toml`] - File is not valid TOML for this schema
    /// - [`TrackingError::Configuration`] - References or matrices do not resolve
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use igtl_tracking_server::config::DeviceSet;
    ///
    /// let device_set = DeviceSet::from_file("config/device_set.toml")?;
    /// println!("{} tools", device_set.tools.len());
    /// # Ok::<(), igtl_tracking_server::error::TrackingError>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let device_set = Self::from_toml_str(&contents)?;
        info!(path = %path.display(), "Device set loaded");
        Ok(device_set)
    }

    /// Parse and resolve a device set from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw: DeviceSetConfig = toml::from_str(contents)?;
        Self::resolve(raw)
    }

    /// Resolve a raw configuration into a validated device set
    ///
    /// Nothing is returned unless every reference resolves.
    pub fn resolve(raw: DeviceSetConfig) -> Result<Self> {
        let device = resolve_device(&raw.device)?;

        let mut tools = Vec::with_capacity(raw.tools.len());
        let mut tool_index = HashMap::new();
        for tool in &raw.tools {
            require_name("tool id", &tool.id)?;
            let reference_frame = tool
                .reference_frame
                .clone()
                .unwrap_or_else(|| device.frame.clone());
            require_name("reference frame", &reference_frame)?;
            if reference_frame == tool.id {
                return Err(config_err(format!(
                    "tool '{}' cannot be tracked relative to itself",
                    tool.id
                )));
            }
            if tool_index.insert(tool.id.clone(), tools.len()).is_some() {
                return Err(config_err(format!("duplicate tool id '{}'", tool.id)));
            }
            let resolved = Tool {
                id: tool.id.clone(),
                geometry: tool.geometry.clone(),
                reference_frame,
            };
            check_wire_name("transform name", &resolved.transform_name())?;
            tools.push(resolved);
        }

        let mut known_frames: HashSet<&str> = HashSet::new();
        known_frames.insert(&device.frame);
        for frame in &raw.device.frames {
            require_name("frame", frame)?;
            known_frames.insert(frame);
        }
        for tool in &tools {
            known_frames.insert(&tool.id);
            known_frames.insert(&tool.reference_frame);
        }

        let mut transforms = Vec::with_capacity(raw.transforms.len());
        let mut seen_pairs = HashSet::new();
        for transform in &raw.transforms {
            transforms.push(resolve_transform(transform, &known_frames)?);
            let (a, b) = (transform.from.as_str(), transform.to.as_str());
            let key = if a <= b { (a, b) } else { (b, a) };
            if !seen_pairs.insert(key) {
                return Err(config_err(format!(
                    "transform between '{}' and '{}' is defined more than once",
                    transform.from, transform.to
                )));
            }
        }

        let mut channels = Vec::with_capacity(raw.channels.len());
        let mut channel_index = HashMap::new();
        for channel in &raw.channels {
            require_name("channel id", &channel.id)?;
            check_wire_name("channel id", &channel.id)?;
            if channel_index.insert(channel.id.clone(), channels.len()).is_some() {
                return Err(config_err(format!("duplicate channel id '{}'", channel.id)));
            }
            let members = channel
                .tools
                .iter()
                .map(|id| {
                    tool_index.get(id).copied().ok_or_else(|| {
                        config_err(format!(
                            "channel '{}' references unknown tool '{}'",
                            channel.id, id
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            channels.push(OutputChannel {
                id: channel.id.clone(),
                tools: members,
            });
        }

        let server = resolve_server(&raw.server, &channels, &channel_index, &tools)?;

        debug!(
            device = %device.id,
            tools = tools.len(),
            transforms = transforms.len(),
            channels = channels.len(),
            "Device set resolved"
        );

        Ok(DeviceSet {
            device,
            tools,
            transforms,
            channels,
            server,
            logging: raw.logging,
            tool_index,
            channel_index,
        })
    }

    /// Index of the tool called `id`
    pub fn tool_index(&self, id: &str) -> Option<ToolIndex> {
        self.tool_index.get(id).copied()
    }

    /// Tool called `id`
    pub fn tool(&self, id: &str) -> Option<&Tool> {
        self.tool_index(id).map(|i| &self.tools[i])
    }

    /// Output channel called `id`
    pub fn channel(&self, id: &str) -> Option<&OutputChannel> {
        self.channel_index.get(id).map(|&i| &self.channels[i])
    }
}

fn config_err(msg: String) -> TrackingError {
    TrackingError::Configuration(msg)
}

fn require_name(what: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(config_err(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn check_wire_name(what: &str, value: &str) -> Result<()> {
    if value.len() > MAX_NAME_LEN {
        return Err(config_err(format!(
            "{} '{}' is {} bytes, longer than the {}-byte wire field",
            what,
            value,
            value.len(),
            MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn resolve_device(raw: &DeviceConfig) -> Result<Device> {
    require_name("device id", &raw.id)?;
    check_wire_name("device id", &raw.id)?;
    require_name("device frame", &raw.frame)?;

    let serial = raw.serial_port.is_some() || raw.baud_rate.is_some();
    let network = raw.host.is_some() || raw.port.is_some();

    let connection = match (serial, network) {
        (true, true) => {
            return Err(config_err(format!(
                "device '{}' specifies both serial and network connection parameters",
                raw.id
            )))
        }
        (false, false) => {
            return Err(config_err(format!(
                "device '{}' needs either serial_port + baud_rate or host + port",
                raw.id
            )))
        }
        (true, false) => match (&raw.serial_port, raw.baud_rate) {
            (Some(port), Some(baud_rate)) if !port.is_empty() && baud_rate > 0 => {
                Connection::Serial {
                    port: port.clone(),
                    baud_rate,
                }
            }
            _ => {
                return Err(config_err(format!(
                    "device '{}' serial connection needs both serial_port and a non-zero baud_rate",
                    raw.id
                )))
            }
        },
        (false, true) => match (&raw.host, raw.port) {
            (Some(host), Some(port)) if !host.is_empty() && port > 0 => Connection::Network {
                host: host.clone(),
                port,
            },
            _ => {
                return Err(config_err(format!(
                    "device '{}' network connection needs both host and a non-zero port",
                    raw.id
                )))
            }
        },
    };

    Ok(Device {
        id: raw.id.clone(),
        frame: raw.frame.clone(),
        connection,
        startup_delay: Duration::from_millis(raw.startup_delay_ms),
    })
}

fn resolve_transform(raw: &TransformConfig, known_frames: &HashSet<&str>) -> Result<CalibrationTransform> {
    for frame in [&raw.from, &raw.to] {
        if !known_frames.contains(frame.as_str()) {
            return Err(config_err(format!(
                "transform {}To{} references unknown frame '{}'",
                raw.from, raw.to, frame
            )));
        }
    }
    if raw.from == raw.to {
        return Err(config_err(format!(
            "transform {}To{} maps a frame onto itself",
            raw.from, raw.to
        )));
    }

    let matrix = Matrix4::from_row_major(&raw.matrix).ok_or_else(|| {
        config_err(format!(
            "transform {}To{} needs 16 matrix values, got {}",
            raw.from,
            raw.to,
            raw.matrix.len()
        ))
    })?;
    if !matrix.is_rigid(RIGID_TOLERANCE) {
        return Err(config_err(format!(
            "transform {}To{} is not a rigid transform",
            raw.from, raw.to
        )));
    }
    if !raw.error.is_finite() || raw.error < 0.0 {
        return Err(config_err(format!(
            "transform {}To{} has an invalid error estimate {}",
            raw.from, raw.to, raw.error
        )));
    }

    Ok(CalibrationTransform {
        from: raw.from.clone(),
        to: raw.to.clone(),
        matrix,
        error: raw.error,
        date: raw.date.clone(),
        valid: raw.valid,
    })
}

fn resolve_server(
    raw: &ServerConfig,
    channels: &[OutputChannel],
    channel_index: &HashMap<String, usize>,
    tools: &[Tool],
) -> Result<ServerSettings> {
    let served: Vec<usize> = if raw.channels.is_empty() {
        (0..channels.len()).collect()
    } else {
        raw.channels
            .iter()
            .map(|id| {
                channel_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| config_err(format!("server streams unknown channel '{}'", id)))
            })
            .collect::<Result<_>>()?
    };

    if raw.max_messages_in_flight == 0 {
        return Err(config_err("max_messages_in_flight must be at least 1".to_string()));
    }
    if raw.tick_interval_ms == 0 {
        return Err(config_err("tick_interval_ms must be at least 1".to_string()));
    }

    for message_type in &raw.default_client.message_types {
        if !STREAMED_MESSAGE_TYPES.contains(&message_type.as_str()) {
            return Err(config_err(format!(
                "default client requests unsupported message type '{}'",
                message_type
            )));
        }
    }

    let produced: HashSet<String> = served
        .iter()
        .flat_map(|&c| channels[c].tools.iter().map(|&t| tools[t].transform_name()))
        .collect();
    for name in &raw.default_client.transform_names {
        if !produced.contains(name) {
            return Err(config_err(format!(
                "default client subscribes to '{}', which no served channel produces",
                name
            )));
        }
    }

    Ok(ServerSettings {
        listening_port: raw.listening_port,
        channels: served,
        max_messages_in_flight: raw.max_messages_in_flight,
        max_processing_time: Duration::from_millis(raw.max_processing_time_ms),
        tick_interval: Duration::from_millis(raw.tick_interval_ms),
        retry_attempts: raw.retry_attempts,
        retry_delay: Duration::from_millis(raw.retry_delay_ms),
        send_timeout: Duration::from_millis(raw.send_timeout_ms),
        stall_timeout: Duration::from_millis(raw.stall_timeout_ms),
        keep_alive_interval: (raw.keep_alive_interval_ms > 0)
            .then(|| Duration::from_millis(raw.keep_alive_interval_ms)),
        send_valid_transforms_only: raw.send_valid_transforms_only,
        crc_check: raw.crc_check,
        default_client: ClientProfile {
            message_types: raw.default_client.message_types.clone(),
            transform_names: raw.default_client.transform_names.clone(),
        },
        tls: raw.tls.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[device]
id = "Tracker"
serial_port = "COM3"
baud_rate = 115200

[[tools]]
id = "Stylus"
geometry = "stylus.rom"
reference_frame = "Reference"

[[tools]]
id = "Reference"
geometry = "reference.rom"

[[channels]]
id = "TrackerStream"
tools = ["Stylus", "Reference"]
"#;

    fn expect_config_error(toml: &str, needle: &str) {
        match DeviceSet::from_toml_str(toml) {
            Err(TrackingError::Configuration(msg)) => {
                assert!(msg.contains(needle), "'{}' does not mention '{}'", msg, needle)
            }
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_minimal_device_set() {
        let set = DeviceSet::from_toml_str(BASE).unwrap();
        assert_eq!(set.device.frame, "Tracker");
        assert_eq!(
            set.device.connection,
            Connection::Serial {
                port: "COM3".into(),
                baud_rate: 115200
            }
        );
        assert_eq!(set.tools[0].transform_name(), "StylusToReference");
        assert_eq!(set.tools[1].transform_name(), "ReferenceToTracker");
        assert_eq!(set.channel("TrackerStream").unwrap().tools, vec![0, 1]);
        assert_eq!(set.server.channels, vec![0]);
        assert_eq!(set.server.listening_port, 18944);
        assert_eq!(set.server.retry_attempts, 10);
        assert_eq!(set.server.default_client.message_types, vec!["TDATA"]);
        assert!(set.server.default_client.transform_names.is_empty());
        assert!(!set.server.send_valid_transforms_only);
    }

    #[test]
    fn test_network_connection() {
        let toml = r#"
[device]
id = "Remote"
host = "192.168.0.10"
port = 8765
"#;
        let set = DeviceSet::from_toml_str(toml).unwrap();
        assert_eq!(
            set.device.connection,
            Connection::Network {
                host: "192.168.0.10".into(),
                port: 8765
            }
        );
    }

    #[test]
    fn test_conflicting_connection() {
        let toml = r#"
[device]
id = "Tracker"
serial_port = "COM3"
baud_rate = 115200
host = "localhost"
port = 8765
"#;
        expect_config_error(toml, "both serial and network");
    }

    #[test]
    fn test_missing_connection() {
        expect_config_error("[device]\nid = \"Tracker\"\n", "either serial_port");
    }

    #[test]
    fn test_incomplete_serial_connection() {
        expect_config_error(
            "[device]\nid = \"Tracker\"\nserial_port = \"COM3\"\n",
            "non-zero baud_rate",
        );
    }

    #[test]
    fn test_channel_unknown_tool() {
        let toml = BASE.replace(r#"tools = ["Stylus", "Reference"]"#, r#"tools = ["Stylus", "Probe"]"#);
        expect_config_error(&toml, "unknown tool 'Probe'");
    }

    #[test]
    fn test_duplicate_tool() {
        let toml = format!("{}\n[[tools]]\nid = \"Stylus\"\n", BASE);
        expect_config_error(&toml, "duplicate tool id");
    }

    #[test]
    fn test_transform_unknown_frame() {
        let toml = format!(
            "{}\n[[transforms]]\nfrom = \"StylusTip\"\nto = \"Stylus\"\nmatrix = [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]\n",
            BASE
        );
        expect_config_error(&toml, "unknown frame 'StylusTip'");
    }

    #[test]
    fn test_auxiliary_frame_resolves() {
        let toml = BASE.replace(
            "baud_rate = 115200",
            "baud_rate = 115200\nframes = [\"Table\"]",
        ) + "\n[[transforms]]\nfrom = \"Tracker\"\nto = \"Table\"\nmatrix = [1,0,0,5, 0,1,0,0, 0,0,1,0, 0,0,0,1]\nerror = 0.25\n";
        let set = DeviceSet::from_toml_str(&toml).unwrap();
        assert_eq!(set.transforms[0].name(), "TrackerToTable");
        assert_eq!(set.transforms[0].error, 0.25);
        assert!(set.transforms[0].valid);
    }

    #[test]
    fn test_non_rigid_matrix_rejected() {
        let toml = format!(
            "{}\n[[transforms]]\nfrom = \"Tracker\"\nto = \"Reference\"\nmatrix = [2,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]\n",
            BASE
        );
        expect_config_error(&toml, "not a rigid transform");
    }

    #[test]
    fn test_short_matrix_rejected() {
        let toml = format!(
            "{}\n[[transforms]]\nfrom = \"Tracker\"\nto = \"Reference\"\nmatrix = [1,0,0,0]\n",
            BASE
        );
        expect_config_error(&toml, "16 matrix values");
    }

    #[test]
    fn test_duplicate_transform_pair_rejected() {
        let transform = "\n[[transforms]]\nfrom = \"Tracker\"\nto = \"Reference\"\nmatrix = [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]\n";
        let inverse = "\n[[transforms]]\nfrom = \"Reference\"\nto = \"Tracker\"\nmatrix = [1,0,0,0, 0,1,0,0, 0,0,1,0, 0,0,0,1]\n";
        let toml = format!("{}{}{}", BASE, transform, inverse);
        expect_config_error(&toml, "more than once");
    }

    #[test]
    fn test_self_referencing_tool_rejected() {
        let toml = BASE.replace(r#"reference_frame = "Reference""#, r#"reference_frame = "Stylus""#);
        expect_config_error(&toml, "relative to itself");
    }

    #[test]
    fn test_transform_name_too_long() {
        let toml = BASE.replace(
            r#"reference_frame = "Reference""#,
            r#"reference_frame = "PatientHeadReferenceFrame""#,
        );
        expect_config_error(&toml, "wire field");
    }

    #[test]
    fn test_unknown_served_channel() {
        let toml = format!("{}\n[server]\nchannels = [\"Missing\"]\n", BASE);
        expect_config_error(&toml, "unknown channel 'Missing'");
    }

    #[test]
    fn test_default_client_unknown_transform() {
        let toml = format!(
            "{}\n[server.default_client]\ntransform_names = [\"ProbeToReference\"]\n",
            BASE
        );
        expect_config_error(&toml, "ProbeToReference");
    }

    #[test]
    fn test_default_client_unsupported_type() {
        let toml = format!(
            "{}\n[server.default_client]\nmessage_types = [\"IMAGE\"]\n",
            BASE
        );
        expect_config_error(&toml, "unsupported message type 'IMAGE'");
    }

    #[test]
    fn test_server_overrides() {
        let toml = format!(
            "{}\n[server]\nlistening_port = 18945\nretry_attempts = 3\nkeep_alive_interval_ms = 250\nsend_valid_transforms_only = true\n\n[server.default_client]\ntransform_names = [\"StylusToReference\"]\n",
            BASE
        );
        let set = DeviceSet::from_toml_str(&toml).unwrap();
        assert_eq!(set.server.listening_port, 18945);
        assert_eq!(set.server.retry_attempts, 3);
        assert_eq!(set.server.keep_alive_interval, Some(Duration::from_millis(250)));
        assert!(set.server.send_valid_transforms_only);
        assert!(set.server.default_client.wants("StylusToReference"));
        assert!(!set.server.default_client.wants("ReferenceToTracker"));
    }

    #[test]
    fn test_toml_syntax_error() {
        let result = DeviceSet::from_toml_str("[device\nid = ");
        assert!(matches!(result, Err(TrackingError::Toml(_))));
    }

    #[test]
    fn test_client_profile_defaults_to_all_names() {
        let profile = ClientProfile {
            message_types: vec!["TDATA".into()],
            transform_names: vec![],
        };
        assert!(profile.accepts_type("TDATA"));
        assert!(!profile.accepts_type("IMAGE"));
        assert!(profile.wants("AnythingToTracker"));
    }
}
