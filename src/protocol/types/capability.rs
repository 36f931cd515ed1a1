//! CAPABILITY message
//!
//! Lists the message types the server can send. Body: u32 count, then
//! null-terminated type names.

use super::{get_string_list, put_string_list};
use crate::error::{Result, TrackingError};
use crate::protocol::message::Message;

#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityMessage {
    pub types: Vec<String>,
}

impl CapabilityMessage {
    pub fn new(types: Vec<String>) -> Self {
        CapabilityMessage { types }
    }
}

impl Message for CapabilityMessage {
    fn message_type() -> &'static str {
        "CAPABILITY"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        put_string_list(&mut buf, &self.types);
        Ok(buf)
    }

    fn decode_content(mut data: &[u8]) -> Result<Self> {
        let types = get_string_list(&mut data, "capability type")?;
        if !data.is_empty() {
            return Err(TrackingError::InvalidSize {
                expected: 0,
                actual: data.len(),
            });
        }
        Ok(CapabilityMessage { types })
    }
}
