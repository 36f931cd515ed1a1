//! STATUS message
//!
//! Sent by the server in reply to GET_STATUS, as a keep-alive, and right
//! before a session is closed for a protocol violation.

use crate::error::{Result, TrackingError};
use crate::protocol::message::Message;
use bytes::{Buf, BufMut};

const ERROR_NAME_LEN: usize = 20;
const MIN_SIZE: usize = 2 + 8 + ERROR_NAME_LEN + 1;

/// Status codes used by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum StatusCode {
    Invalid = 0,
    Ok = 1,
}

/// STATUS message
///
/// Body layout: code u16, subcode i64, error name char[20], then a
/// null-terminated status string.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub code: u16,
    pub subcode: i64,
    pub error_name: String,
    pub status_string: String,
}

impl StatusMessage {
    /// OK status with a human-readable text
    pub fn ok(status_string: &str) -> Self {
        StatusMessage {
            code: StatusCode::Ok as u16,
            subcode: 0,
            error_name: String::new(),
            status_string: status_string.to_string(),
        }
    }

    /// Error status; `error_name` is truncated to 20 bytes on the wire
    pub fn error(error_name: &str, status_string: &str) -> Self {
        StatusMessage {
            code: StatusCode::Invalid as u16,
            subcode: 0,
            error_name: error_name.to_string(),
            status_string: status_string.to_string(),
        }
    }

    /// Reply sent before closing a session that violated the protocol
    pub fn protocol_error(detail: &str) -> Self {
        Self::error("ProtocolError", detail)
    }

    pub fn is_ok(&self) -> bool {
        self.code == StatusCode::Ok as u16
    }
}

impl Message for StatusMessage {
    fn message_type() -> &'static str {
        "STATUS"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(MIN_SIZE + self.status_string.len());
        buf.put_u16(self.code);
        buf.put_i64(self.subcode);

        let mut name = [0u8; ERROR_NAME_LEN];
        let len = self.error_name.len().min(ERROR_NAME_LEN);
        name[..len].copy_from_slice(&self.error_name.as_bytes()[..len]);
        buf.put_slice(&name);

        buf.put_slice(self.status_string.as_bytes());
        buf.put_u8(0);
        Ok(buf)
    }

    fn decode_content(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_SIZE {
            return Err(TrackingError::InvalidSize {
                expected: MIN_SIZE,
                actual: data.len(),
            });
        }

        let mut cursor = data;
        let code = cursor.get_u16();
        let subcode = cursor.get_i64();

        let name_field = &cursor[..ERROR_NAME_LEN];
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(ERROR_NAME_LEN);
        let error_name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();
        cursor.advance(ERROR_NAME_LEN);

        let text_len = cursor.iter().position(|&b| b == 0).unwrap_or(cursor.len());
        let status_string = String::from_utf8(cursor[..text_len].to_vec())?;

        Ok(StatusMessage {
            code,
            subcode,
            error_name,
            status_string,
        })
    }
}
