//! Decoding of client-to-server messages

use crate::error::{Result, TrackingError};
use crate::protocol::header::Header;
use crate::protocol::message::{check_crc, Message};
use crate::protocol::types::{ClientInfoMessage, GetCapabilityMessage, GetStatusMessage, StatusMessage};

/// Message received from a tracking client
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    /// CLIENTINFO: replace the session's subscription
    Subscribe(ClientInfoMessage),
    /// GET_CAPABIL
    GetCapability,
    /// GET_STATUS
    GetStatus,
    /// STATUS sent by the client, e.g. its own keep-alive
    Status(StatusMessage),
    /// Any other type; logged and ignored
    Unsupported(String),
}

impl ClientRequest {
    /// Decode a request from its header and body
    ///
    /// # Errors
    ///
    /// - [`TrackingError::CrcMismatch`] - Body does not match the header CRC
    /// - Codec errors for malformed bodies of known types
    pub fn decode(header: &Header, body: &[u8], verify_crc: bool) -> Result<Self> {
        check_crc(header, body, verify_crc)?;

        let type_name = header.type_name.as_str()?;
        let request = if type_name == ClientInfoMessage::message_type() {
            ClientRequest::Subscribe(ClientInfoMessage::decode_content(body)?)
        } else if type_name == GetCapabilityMessage::message_type() {
            ClientRequest::GetCapability
        } else if type_name == GetStatusMessage::message_type() {
            ClientRequest::GetStatus
        } else if type_name == StatusMessage::message_type() {
            ClientRequest::Status(StatusMessage::decode_content(body)?)
        } else {
            ClientRequest::Unsupported(type_name.to_string())
        };
        Ok(request)
    }

    /// Decode a request from a complete frame
    pub fn decode_frame(frame: &[u8], verify_crc: bool) -> Result<Self> {
        let header = Header::decode(frame)?;
        let body = &frame[Header::SIZE..];
        if body.len() as u64 != header.body_size {
            return Err(TrackingError::InvalidSize {
                expected: header.body_size as usize,
                actual: body.len(),
            });
        }
        Self::decode(&header, body, verify_crc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::IgtlMessage;
    use crate::protocol::types::TDataMessage;

    fn frame<T: Message>(content: T) -> Vec<u8> {
        IgtlMessage::new(content, "Client").unwrap().encode().unwrap()
    }

    #[test]
    fn test_subscribe() {
        let info = ClientInfoMessage::new(vec!["TDATA".into()], vec!["AToRef".into()]);
        let request = ClientRequest::decode_frame(&frame(info.clone()), true).unwrap();
        assert_eq!(request, ClientRequest::Subscribe(info));
    }

    #[test]
    fn test_queries() {
        assert_eq!(
            ClientRequest::decode_frame(&frame(GetCapabilityMessage), true).unwrap(),
            ClientRequest::GetCapability
        );
        assert_eq!(
            ClientRequest::decode_frame(&frame(GetStatusMessage), true).unwrap(),
            ClientRequest::GetStatus
        );
    }

    #[test]
    fn test_unsupported_type() {
        let request = ClientRequest::decode_frame(&frame(TDataMessage::default()), true).unwrap();
        assert_eq!(request, ClientRequest::Unsupported("TDATA".into()));
    }

    #[test]
    fn test_crc_checked_when_enabled() {
        let mut bytes = frame(ClientInfoMessage::new(vec!["TDATA".into()], vec![]));
        let i = Header::SIZE + 5;
        bytes[i] ^= 0x01;
        assert!(matches!(
            ClientRequest::decode_frame(&bytes, true),
            Err(TrackingError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_malformed_subscription() {
        let mut bytes = frame(ClientInfoMessage::default());
        // Claim one message type without providing it
        bytes[Header::SIZE + 3] = 1;
        assert!(ClientRequest::decode_frame(&bytes, false).is_err());
    }
}
