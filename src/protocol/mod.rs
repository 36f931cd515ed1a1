//! OpenIGTLink wire protocol
//!
//! Only the subset needed to stream tracking data is implemented: TDATA
//! updates and STATUS/CAPABILITY replies going out, CLIENTINFO subscriptions
//! and GET_CAPABIL/GET_STATUS queries coming in.

pub mod crc;
pub mod header;
pub mod message;
pub mod request;
pub mod types;
pub mod update;

pub use crc::{calculate_crc, verify_crc};
pub use header::{DeviceName, Header, Timestamp, TypeName};
pub use message::{IgtlMessage, Message};
pub use request::ClientRequest;
pub use update::{decode_update, encode_update, TrackedTransform};

/// Message types a client may subscribe to
pub const STREAMED_MESSAGE_TYPES: &[&str] = &["TDATA"];

/// Message types advertised in CAPABILITY replies
pub const SERVER_CAPABILITIES: &[&str] = &["TDATA", "STATUS", "CAPABILITY"];

/// Largest body accepted from a client
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;
