//! TDATA (tracking data) message
//!
//! One TDATA message carries every transform of an output channel. Each
//! element is 70 bytes:
//!
//! | Offset | Size | Field |
//! |-------:|-----:|-------|
//! | 0  | 20 | name, null-padded (a 20-byte name has no terminator) |
//! | 20 | 1  | instrument type |
//! | 21 | 1  | tracking status, 0 = OK, 1 = missing |
//! | 22 | 48 | upper 3x4 matrix as 12 x f32, column-major |
//!
//! The column-major ordering matches the TRANSFORM message, so the last
//! three floats are the translation.

use crate::error::{Result, TrackingError};
use crate::protocol::message::Message;
use bytes::{Buf, BufMut};

/// Size of the name field
pub const MAX_NAME_LEN: usize = 20;

/// Encoded size of one element
pub const ELEMENT_SIZE: usize = MAX_NAME_LEN + 2 + 12 * 4;

/// Instrument type of a tracking element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackingInstrumentType {
    Tracker = 1,
    Instrument6D = 2,
    Instrument3D = 3,
    Instrument5D = 4,
}

impl TryFrom<u8> for TrackingInstrumentType {
    type Error = TrackingError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(TrackingInstrumentType::Tracker),
            2 => Ok(TrackingInstrumentType::Instrument6D),
            3 => Ok(TrackingInstrumentType::Instrument3D),
            4 => Ok(TrackingInstrumentType::Instrument5D),
            _ => Err(TrackingError::InvalidHeader(format!(
                "Invalid tracking instrument type: {}",
                value
            ))),
        }
    }
}

/// Tracking status of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TrackingStatus {
    Ok = 0,
    Missing = 1,
}

impl TrackingStatus {
    /// Any non-zero byte reads as missing
    fn from_u8(value: u8) -> Self {
        if value == 0 {
            TrackingStatus::Ok
        } else {
            TrackingStatus::Missing
        }
    }

    pub fn is_ok(self) -> bool {
        self == TrackingStatus::Ok
    }
}

/// One named transform in a TDATA message
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingDataElement {
    pub name: String,
    pub instrument_type: TrackingInstrumentType,
    pub status: TrackingStatus,
    /// Upper 3x4 of the matrix, row-major in memory; bottom row is implicit
    pub matrix: [[f32; 4]; 3],
}

impl TrackingDataElement {
    pub fn new(name: impl Into<String>, status: TrackingStatus, matrix: [[f32; 4]; 3]) -> Self {
        TrackingDataElement {
            name: name.into(),
            instrument_type: TrackingInstrumentType::Instrument6D,
            status,
            matrix,
        }
    }
}

/// TDATA message
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TDataMessage {
    pub elements: Vec<TrackingDataElement>,
}

impl TDataMessage {
    pub fn new(elements: Vec<TrackingDataElement>) -> Self {
        TDataMessage { elements }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

impl Message for TDataMessage {
    fn message_type() -> &'static str {
        "TDATA"
    }

    fn encode_content(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.elements.len() * ELEMENT_SIZE);

        for element in &self.elements {
            let name = element.name.as_bytes();
            if name.len() > MAX_NAME_LEN {
                return Err(TrackingError::InvalidHeader(format!(
                    "Tracking element name '{}' exceeds {} bytes",
                    element.name, MAX_NAME_LEN
                )));
            }
            let mut name_field = [0u8; MAX_NAME_LEN];
            name_field[..name.len()].copy_from_slice(name);
            buf.put_slice(&name_field);

            buf.put_u8(element.instrument_type as u8);
            buf.put_u8(element.status as u8);

            for col in 0..4 {
                for row in &element.matrix {
                    buf.put_f32(row[col]);
                }
            }
        }

        Ok(buf)
    }

    fn decode_content(mut data: &[u8]) -> Result<Self> {
        if data.len() % ELEMENT_SIZE != 0 {
            return Err(TrackingError::InvalidSize {
                expected: (data.len() / ELEMENT_SIZE + 1) * ELEMENT_SIZE,
                actual: data.len(),
            });
        }

        let mut elements = Vec::with_capacity(data.len() / ELEMENT_SIZE);
        while data.has_remaining() {
            let name_field = &data[..MAX_NAME_LEN];
            let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(MAX_NAME_LEN);
            let name = String::from_utf8(name_field[..name_len].to_vec())?;
            data.advance(MAX_NAME_LEN);

            let instrument_type = TrackingInstrumentType::try_from(data.get_u8())?;
            let status = TrackingStatus::from_u8(data.get_u8());

            let mut matrix = [[0.0f32; 4]; 3];
            for col in 0..4 {
                for row in matrix.iter_mut() {
                    row[col] = data.get_f32();
                }
            }

            elements.push(TrackingDataElement {
                name,
                instrument_type,
                status,
                matrix,
            });
        }

        Ok(TDataMessage { elements })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POSE: [[f32; 4]; 3] = [
        [0.0, -1.0, 0.0, 10.0],
        [1.0, 0.0, 0.0, 20.0],
        [0.0, 0.0, 1.0, 30.0],
    ];

    #[test]
    fn test_element_layout() {
        let msg = TDataMessage::new(vec![TrackingDataElement::new("StylusToRef", TrackingStatus::Missing, POSE)]);
        let encoded = msg.encode_content().unwrap();

        assert_eq!(encoded.len(), ELEMENT_SIZE);
        assert_eq!(&encoded[..11], b"StylusToRef");
        assert!(encoded[11..20].iter().all(|&b| b == 0));
        assert_eq!(encoded[20], TrackingInstrumentType::Instrument6D as u8);
        assert_eq!(encoded[21], 1);

        // Column-major: R11, R21, R31, R12, ...
        let floats: Vec<f32> = encoded[22..]
            .chunks(4)
            .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(&floats[..3], &[0.0, 1.0, 0.0]);
        assert_eq!(&floats[3..6], &[-1.0, 0.0, 0.0]);
        assert_eq!(&floats[9..], &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_roundtrip_keeps_status_and_order() {
        let original = TDataMessage::new(vec![
            TrackingDataElement::new("AToRef", TrackingStatus::Ok, POSE),
            TrackingDataElement::new("BToRef", TrackingStatus::Missing, POSE),
        ]);
        let decoded = TDataMessage::decode_content(&original.encode_content().unwrap()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_full_width_name() {
        let name = "ABCDEFGHIJKLMNOPQRST";
        let msg = TDataMessage::new(vec![TrackingDataElement::new(name, TrackingStatus::Ok, POSE)]);
        let decoded = TDataMessage::decode_content(&msg.encode_content().unwrap()).unwrap();
        assert_eq!(decoded.elements[0].name, name);
    }

    #[test]
    fn test_name_too_long_rejected() {
        let msg = TDataMessage::new(vec![TrackingDataElement::new(
            "ABCDEFGHIJKLMNOPQRSTU",
            TrackingStatus::Ok,
            POSE,
        )]);
        assert!(msg.encode_content().is_err());
    }

    #[test]
    fn test_nonzero_status_reads_missing() {
        let msg = TDataMessage::new(vec![TrackingDataElement::new("A", TrackingStatus::Ok, POSE)]);
        let mut encoded = msg.encode_content().unwrap();
        encoded[21] = 7;
        let decoded = TDataMessage::decode_content(&encoded).unwrap();
        assert_eq!(decoded.elements[0].status, TrackingStatus::Missing);
    }

    #[test]
    fn test_partial_element_rejected() {
        assert!(matches!(
            TDataMessage::decode_content(&[0u8; ELEMENT_SIZE + 3]),
            Err(TrackingError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_empty_body() {
        let decoded = TDataMessage::decode_content(&[]).unwrap();
        assert!(decoded.is_empty());
    }
}
