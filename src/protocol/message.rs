//! Message trait and the header + body wrapper

use crate::error::{Result, TrackingError};
use crate::protocol::crc::calculate_crc;
use crate::protocol::header::{DeviceName, Header, Timestamp, TypeName};

/// Body codec of one OpenIGTLink message type
pub trait Message: Sized {
    /// Type name carried in the header (e.g. "TDATA")
    fn message_type() -> &'static str;

    /// Encode the body
    fn encode_content(&self) -> Result<Vec<u8>>;

    /// Decode the body
    fn decode_content(data: &[u8]) -> Result<Self>;
}

/// Complete OpenIGTLink v2 message
#[derive(Debug, Clone, PartialEq)]
pub struct IgtlMessage<T: Message> {
    pub header: Header,
    pub content: T,
}

impl<T: Message> IgtlMessage<T> {
    /// Wrap `content` with a header stamped with the current time
    ///
    /// Body size and CRC are filled in by [`encode`](Self::encode).
    pub fn new(content: T, device_name: &str) -> Result<Self> {
        Self::with_timestamp(content, device_name, Timestamp::now())
    }

    /// Wrap `content` with an explicit header timestamp
    pub fn with_timestamp(content: T, device_name: &str, timestamp: Timestamp) -> Result<Self> {
        let header = Header {
            version: Header::VERSION,
            type_name: TypeName::new(T::message_type())?,
            device_name: DeviceName::new(device_name)?,
            timestamp,
            body_size: 0,
            crc: 0,
        };
        Ok(IgtlMessage { header, content })
    }

    /// Serialize header and body
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = self.content.encode_content()?;

        let mut header = self.header.clone();
        header.body_size = body.len() as u64;
        header.crc = calculate_crc(&body);

        let mut buf = Vec::with_capacity(Header::SIZE + body.len());
        buf.extend_from_slice(&header.encode());
        buf.extend_from_slice(&body);
        Ok(buf)
    }

    /// Parse a complete message, verifying its CRC
    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::decode_with_options(data, true)
    }

    /// Parse a complete message, optionally skipping CRC verification
    pub fn decode_with_options(data: &[u8], verify_crc: bool) -> Result<Self> {
        let header = Header::decode(data)?;

        let type_name = header.type_name.as_str()?;
        if type_name != T::message_type() {
            return Err(TrackingError::UnknownMessageType(format!(
                "expected {}, got {}",
                T::message_type(),
                type_name
            )));
        }

        let available = data.len() - Header::SIZE;
        let body_size = usize::try_from(header.body_size).unwrap_or(usize::MAX);
        if body_size > available {
            return Err(TrackingError::InvalidSize {
                expected: body_size,
                actual: available,
            });
        }
        let body = &data[Header::SIZE..Header::SIZE + body_size];
        check_crc(&header, body, verify_crc)?;

        let content = T::decode_content(body)?;
        Ok(IgtlMessage { header, content })
    }
}

/// Verify `body` against the header CRC when `enabled`
pub fn check_crc(header: &Header, body: &[u8], enabled: bool) -> Result<()> {
    if !enabled {
        return Ok(());
    }
    let actual = calculate_crc(body);
    if actual != header.crc {
        return Err(TrackingError::CrcMismatch {
            expected: header.crc,
            actual,
        });
    }
    Ok(())
}
