//! Message types exchanged with tracking clients

pub mod capability;
pub mod client_info;
pub mod query;
pub mod status;
pub mod tdata;

pub use capability::CapabilityMessage;
pub use client_info::ClientInfoMessage;
pub use query::{GetCapabilityMessage, GetStatusMessage};
pub use status::StatusMessage;
pub use tdata::{TDataMessage, TrackingDataElement, TrackingInstrumentType, TrackingStatus};

use crate::error::{Result, TrackingError};
use bytes::{Buf, BufMut};

/// Write a u32 count followed by null-terminated strings
pub(crate) fn put_string_list(buf: &mut Vec<u8>, items: &[String]) {
    buf.put_u32(items.len() as u32);
    for item in items {
        buf.put_slice(item.as_bytes());
        buf.put_u8(0);
    }
}

/// Read a u32 count followed by that many null-terminated strings
pub(crate) fn get_string_list(data: &mut &[u8], what: &str) -> Result<Vec<String>> {
    if data.remaining() < 4 {
        return Err(TrackingError::InvalidSize {
            expected: 4,
            actual: data.remaining(),
        });
    }
    let count = data.get_u32() as usize;

    // Every entry needs at least its terminator
    if count > data.remaining() {
        return Err(TrackingError::InvalidSize {
            expected: count,
            actual: data.remaining(),
        });
    }

    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let end = data.iter().position(|&b| b == 0).ok_or_else(|| {
            TrackingError::InvalidHeader(format!("Missing null terminator in {}", what))
        })?;
        items.push(String::from_utf8(data[..end].to_vec())?);
        data.advance(end + 1);
    }
    Ok(items)
}
