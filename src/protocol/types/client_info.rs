//! CLIENTINFO message
//!
//! Subscription request sent by a client. The body holds two string lists,
//! each a u32 count followed by null-terminated entries:
//!
//! 1. message types the client wants to receive
//! 2. transform names the client wants to receive
//!
//! An empty type list keeps the server's default types, an empty name list
//! subscribes to every transform. Trailing bytes make the request malformed.

use super::{get_string_list, put_string_list};
use crate::error::{Result, TrackingError};
use crate::protocol::message::Message;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfoMessage {
    pub message_types: Vec<String>,
    pub transform_names: Vec<String>,
}

impl ClientInfoMessage {
    pub fn new(message_types: Vec<String>, transform_names: Vec<String>) -> Self {
        ClientInfoMessage {
            message_types,
            transform_names,
        }
    }
}

impl Message for ClientInfoMessage {
    fn message_type() -> &'static str {
        "CLIENTINFO"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_string_list(&mut buf, &self.message_types);
        put_string_list(&mut buf, &self.transform_names);
        Ok(buf)
    }

    fn decode_content(mut data: &[u8]) -> Result<Self> {
        let message_types = get_string_list(&mut data, "message type list")?;
        let transform_names = get_string_list(&mut data, "transform name list")?;
        if !data.is_empty() {
            return Err(TrackingError::InvalidSize {
                expected: 0,
                actual: data.len(),
            });
        }
        Ok(ClientInfoMessage {
            message_types,
            transform_names,
        })
    }
}
