//! Error types for the tracking pipeline and its OpenIGTLink transport
//!
//! Configuration and listening-socket failures are fatal. Everything else is
//! recovered locally: stale samples and invalid transforms are reported as
//! values, protocol and delivery errors only ever affect one client session.

use thiserror::Error;

/// Tracking server error types
///
/// All fallible operations in this crate return `Result<T, TrackingError>`.
#[derive(Error, Debug)]
pub enum TrackingError {
    /// Device-set description could not be resolved
    ///
    /// This error occurs when:
    /// - A channel or transform references an unknown tool or frame
    /// - A static transform matrix is not a rigid transform
    /// - Connection parameters are missing or conflicting
    ///
    /// It is fatal at load time and no partial device set is produced.
    ///
    /// # Example
    /// ```no_run
    /// # use igtl_tracking_server::error::TrackingError;
    /// let err = TrackingError::Configuration("channel 'Main' references unknown tool 'Probe'".to_string());
    /// ```
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Device-set TOML could not be parsed
    #[error("Configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A client sent a malformed or unsupported request
    ///
    /// Only the offending session is affected.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A message could not be delivered within the retry budget
    ///
    /// The session is disconnected after this error.
    #[error("Delivery failed after {attempts} attempts")]
    DeliveryFailure {
        /// Number of write attempts made, including the first
        attempts: u32,
    },

    /// The listening socket failed
    ///
    /// This terminates the server and is reported to the operator.
    #[error("Listening socket failure: {0}")]
    TransportFatal(std::io::Error),

    /// No tool with the given id is configured
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// No output channel with the given id is configured
    #[error("Unknown channel: {0}")]
    UnknownChannel(String),

    /// Invalid header format or content
    ///
    /// This error occurs when:
    /// - Message type contains more than 12 bytes
    /// - Device name contains more than 20 bytes
    /// - A name field is not valid UTF-8
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// CRC checksum mismatch
    ///
    /// The message should be discarded.
    #[error("CRC mismatch: expected {expected:#x}, got {actual:#x}")]
    CrcMismatch {
        /// CRC value carried in the message header
        expected: u64,
        /// CRC value calculated from the received body
        actual: u64,
    },

    /// Unknown or unsupported message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// Invalid message size
    ///
    /// This error occurs when:
    /// - Message body size doesn't match the size declared in header
    /// - Array sizes in message don't match declared counts
    #[error("Invalid message size: expected {expected}, got {actual}")]
    InvalidSize {
        /// Expected size in bytes based on message format
        expected: usize,
        /// Actual size in bytes received or parsed
        actual: usize,
    },

    /// Message body size exceeds maximum allowed
    ///
    /// Protects the reader tasks from allocating for impossibly large bodies.
    #[error("Message body too large: {size} bytes (max: {max})")]
    BodyTooLarge {
        /// Declared body size in bytes
        size: usize,
        /// Maximum allowed size in bytes
        max: usize,
    },

    /// I/O error occurred during network communication or file access
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error in a string field
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl TrackingError {
    /// Whether this error should abort startup or serving
    ///
    /// # Examples
    ///
    /// ```
    /// use igtl_tracking_server::error::TrackingError;
    ///
    /// assert!(TrackingError::Configuration("bad".into()).is_fatal());
    /// assert!(!TrackingError::Protocol("bad".into()).is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TrackingError::Configuration(_) | TrackingError::Toml(_) | TrackingError::TransportFatal(_)
        )
    }
}

/// Result type alias for tracking server operations
pub type Result<T> = std::result::Result<T, TrackingError>;
