//! Conversions between transform results and TDATA messages

use crate::error::Result;
use crate::protocol::message::IgtlMessage;
use crate::protocol::types::{TDataMessage, TrackingDataElement, TrackingStatus};
use crate::tracking::engine::TransformResult;
use crate::tracking::matrix::Matrix4;

/// Transform as seen by a receiving client
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedTransform {
    pub name: String,
    pub matrix: Matrix4,
    pub valid: bool,
}

/// Build the TDATA update of one channel
///
/// The device name is the channel id and entries keep the order of `results`.
///
/// # Examples
///
/// ```
/// use igtl_tracking_server::protocol::update::{decode_update, encode_update};
/// use igtl_tracking_server::tracking::{Matrix4, TransformResult};
///
/// let results = vec![TransformResult {
///     name: "StylusToReference".to_string(),
///     matrix: Matrix4::translation(1.0, 2.0, 3.0),
///     valid: true,
///     timestamp: Some(0.5),
///     error: 0.0,
///     drift: 0.0,
/// }];
///
/// let msg = encode_update("TrackerStream", &results)?;
/// assert_eq!(msg.header.device_name.as_str()?, "TrackerStream");
///
/// let received = decode_update(&msg.content);
/// assert_eq!(received[0].name, "StylusToReference");
/// assert!(received[0].valid);
/// # Ok::<(), igtl_tracking_server::error::TrackingError>(())
/// ```
pub fn encode_update(channel_id: &str, results: &[TransformResult]) -> Result<IgtlMessage<TDataMessage>> {
    let elements = results.iter().map(to_element).collect();
    IgtlMessage::new(TDataMessage::new(elements), channel_id)
}

/// Recover name, matrix and validity of every entry
pub fn decode_update(message: &TDataMessage) -> Vec<TrackedTransform> {
    message
        .elements
        .iter()
        .map(|element| TrackedTransform {
            name: element.name.clone(),
            matrix: Matrix4::from_f32_3x4(&element.matrix),
            valid: element.status.is_ok(),
        })
        .collect()
}

fn to_element(result: &TransformResult) -> TrackingDataElement {
    let status = if result.valid {
        TrackingStatus::Ok
    } else {
        TrackingStatus::Missing
    };
    TrackingDataElement::new(result.name.clone(), status, result.matrix.to_f32_3x4())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(name: &str, matrix: Matrix4, valid: bool) -> TransformResult {
        TransformResult {
            name: name.to_string(),
            matrix,
            valid,
            timestamp: None,
            error: 0.0,
            drift: 0.0,
        }
    }

    #[test]
    fn test_update_survives_the_wire() {
        let results = vec![
            result("AToRef", Matrix4::rotation_z(0.25, 101.5, -3.25, 12.0), true),
            result("BToRef", Matrix4::identity(), false),
        ];

        let bytes = encode_update("Main", &results).unwrap().encode().unwrap();
        let decoded = IgtlMessage::<TDataMessage>::decode(&bytes).unwrap();
        assert_eq!(decoded.header.device_name.as_str().unwrap(), "Main");

        let received = decode_update(&decoded.content);
        assert_eq!(received.len(), results.len());
        for (sent, got) in results.iter().zip(&received) {
            assert_eq!(got.name, sent.name);
            assert_eq!(got.valid, sent.valid);
            assert!(got.matrix.approx_eq(&sent.matrix, 1e-4));
        }
    }

    #[test]
    fn test_empty_update() {
        let msg = encode_update("Main", &[]).unwrap();
        assert!(msg.content.is_empty());
    }
}
