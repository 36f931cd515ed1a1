//! OpenIGTLink v2 message header
//!
//! Every message starts with the same 58 bytes, all numbers big-endian:
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0  | 2  | version |
//! | 2  | 12 | type name, null-padded |
//! | 14 | 20 | device name, null-padded |
//! | 34 | 8  | timestamp (32-bit seconds, 32-bit fraction) |
//! | 42 | 8  | body size |
//! | 50 | 8  | CRC-64 of the body |

use crate::error::{Result, TrackingError};
use bytes::{Buf, BufMut, BytesMut};

/// Fixed-width, null-padded ASCII name field
#[derive(Clone, PartialEq, Eq)]
pub struct NameField<const N: usize>([u8; N]);

/// Message type name (12 bytes)
pub type TypeName = NameField<12>;

/// Device name (20 bytes)
pub type DeviceName = NameField<20>;

impl<const N: usize> NameField<N> {
    /// Create a name field, rejecting names longer than `N` bytes
    pub fn new(name: &str) -> Result<Self> {
        if name.len() > N {
            return Err(TrackingError::InvalidHeader(format!(
                "Name '{}' too long: {} bytes (max: {})",
                name,
                name.len(),
                N
            )));
        }
        let mut bytes = [0u8; N];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(NameField(bytes))
    }

    /// Name up to the first null byte
    pub fn as_str(&self) -> Result<&str> {
        let len = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        std::str::from_utf8(&self.0[..len])
            .map_err(|_| TrackingError::InvalidHeader("Invalid UTF-8 in name field".to_string()))
    }

    /// Raw field bytes
    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> From<[u8; N]> for NameField<N> {
    fn from(bytes: [u8; N]) -> Self {
        NameField(bytes)
    }
}

impl<const N: usize> std::fmt::Debug for NameField<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.as_str() {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "{:?}", &self.0[..]),
        }
    }
}

/// OpenIGTLink timestamp
///
/// Upper 32 bits are seconds since the Unix epoch, lower 32 bits are the
/// fraction of a second scaled to 2^32.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub seconds: u32,
    pub fraction: u32,
}

impl Timestamp {
    pub fn new(seconds: u32, fraction: u32) -> Self {
        Timestamp { seconds, fraction }
    }

    /// Current wall-clock time
    ///
    /// A clock set before the epoch yields a zero timestamp.
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let fraction = ((now.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Timestamp {
            seconds: now.as_secs() as u32,
            fraction: fraction as u32,
        }
    }

    /// Wire representation
    pub fn to_u64(self) -> u64 {
        ((self.seconds as u64) << 32) | (self.fraction as u64)
    }

    /// Parse the wire representation
    pub fn from_u64(value: u64) -> Self {
        Timestamp {
            seconds: (value >> 32) as u32,
            fraction: value as u32,
        }
    }

    /// Seconds as floating point
    ///
    /// # Examples
    ///
    /// ```
    /// use igtl_tracking_server::protocol::header::Timestamp;
    ///
    /// let ts = Timestamp::new(1000, 0x8000_0000);
    /// assert!((ts.to_f64() - 1000.5).abs() < 1e-9);
    /// ```
    pub fn to_f64(self) -> f64 {
        self.seconds as f64 + self.fraction as f64 / 4_294_967_296.0
    }
}

/// Decoded 58-byte header
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u16,
    pub type_name: TypeName,
    pub device_name: DeviceName,
    pub timestamp: Timestamp,
    pub body_size: u64,
    pub crc: u64,
}

impl Header {
    /// Header size in bytes
    pub const SIZE: usize = 58;

    /// Protocol version written by this server
    pub const VERSION: u16 = 2;

    /// Decode a header from the first 58 bytes of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(TrackingError::InvalidSize {
                expected: Self::SIZE,
                actual: buf.len(),
            });
        }

        let mut cursor = &buf[..Self::SIZE];
        let version = cursor.get_u16();
        let mut type_bytes = [0u8; 12];
        cursor.copy_to_slice(&mut type_bytes);
        let mut device_bytes = [0u8; 20];
        cursor.copy_to_slice(&mut device_bytes);

        Ok(Header {
            version,
            type_name: TypeName::from(type_bytes),
            device_name: DeviceName::from(device_bytes),
            timestamp: Timestamp::from_u64(cursor.get_u64()),
            body_size: cursor.get_u64(),
            crc: cursor.get_u64(),
        })
    }

    /// Encode into exactly 58 bytes
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_u16(self.version);
        buf.put_slice(self.type_name.as_bytes());
        buf.put_slice(self.device_name.as_bytes());
        buf.put_u64(self.timestamp.to_u64());
        buf.put_u64(self.body_size);
        buf.put_u64(self.crc);
        buf.to_vec()
    }

    /// Declared body size, bounded by `max`
    pub fn checked_body_size(&self, max: usize) -> Result<usize> {
        match usize::try_from(self.body_size) {
            Ok(size) if size <= max => Ok(size),
            _ => Err(TrackingError::BodyTooLarge {
                size: usize::try_from(self.body_size).unwrap_or(usize::MAX),
                max,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_fields() {
        assert_eq!(TypeName::new("TDATA").unwrap().as_str().unwrap(), "TDATA");
        assert!(TypeName::new("CLIENTINFO_LONG").is_err());

        let exact = DeviceName::new("ExactlyTwentyBytes!!").unwrap();
        assert_eq!(exact.as_str().unwrap(), "ExactlyTwentyBytes!!");
        assert!(DeviceName::new("TwentyOneBytesLong!!!").is_err());
    }

    #[test]
    fn test_invalid_utf8_name() {
        let mut bytes = [0u8; 12];
        bytes[0] = 0xFF;
        assert!(matches!(
            TypeName::from(bytes).as_str(),
            Err(TrackingError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_timestamp_now_is_recent() {
        let ts = Timestamp::now();
        assert!(ts.seconds > 1_600_000_000);
    }

    #[test]
    fn test_timestamp_wire_value() {
        let ts = Timestamp::new(0x0102_0304, 0x0506_0708);
        assert_eq!(ts.to_u64(), 0x0102_0304_0506_0708);
        assert_eq!(Timestamp::from_u64(ts.to_u64()), ts);
    }

    #[test]
    fn test_header_layout() {
        let header = Header {
            version: 2,
            type_name: TypeName::new("TDATA").unwrap(),
            device_name: DeviceName::new("TrackerStream").unwrap(),
            timestamp: Timestamp::from_u64(0x0102_0304_0506_0708),
            body_size: 70,
            crc: 0xDEAD_BEEF_CAFE_BABE,
        };

        let encoded = header.encode();
        assert_eq!(encoded.len(), Header::SIZE);
        assert_eq!(&encoded[0..2], &[0, 2]);
        assert_eq!(&encoded[2..7], b"TDATA");
        assert_eq!(&encoded[14..27], b"TrackerStream");
        assert_eq!(encoded[34], 0x01);
        assert_eq!(&encoded[42..50], &70u64.to_be_bytes());

        assert_eq!(Header::decode(&encoded).unwrap(), header);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(matches!(
            Header::decode(&[0u8; 30]),
            Err(TrackingError::InvalidSize { expected: 58, actual: 30 })
        ));
    }

    #[test]
    fn test_body_size_limit() {
        let mut header = Header::decode(&[0u8; Header::SIZE]).unwrap();
        header.body_size = 2048;
        assert_eq!(header.checked_body_size(4096).unwrap(), 2048);
        assert!(matches!(
            header.checked_body_size(1024),
            Err(TrackingError::BodyTooLarge { size: 2048, max: 1024 })
        ));
    }
}
