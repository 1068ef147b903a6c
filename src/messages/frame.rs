//! # Radio Frame Module
//!
//! Low-level frame structure for radio transmission and reception.
//!
//! ## Architecture
//!
//! RadioFrame represents the wire format for dice-to-dice communication.
//! Each frame contains:
//! - Raw data buffer of fixed size (RADIO_FRAME_SIZE)
//! - Actual data length
//!
//! ## Frame Structure
//!
//! All frames start with a one-byte message tag. The remaining bytes are
//! the tag-specific payload, serialized field by field in little-endian
//! order (see `dice_message`). The payload length is fixed per tag, and
//! the pair (tag, length) identifies the variant on the wire.
//!
//! ## Design Considerations
//!
//! - **Public Fields**: `data` and `length` are public for zero-copy
//!   hand-off to radio hardware interfaces
//! - **Fixed Size**: all frames share one buffer size for predictable
//!   memory usage; a frame never spans multiple radio datagrams

use crate::RADIO_FRAME_SIZE;

/// Low-level frame structure for radio transmission
///
/// Represents the wire-format data transmitted and received over the radio.
/// Contains a fixed-size buffer and the actual data length.
#[derive(Clone)]
#[cfg_attr(feature = "std", derive(Debug))]
pub struct RadioFrame {
    /// Raw frame data buffer of fixed size
    pub data: [u8; RADIO_FRAME_SIZE],

    /// Actual number of valid bytes in the data buffer
    pub length: usize,
}

impl RadioFrame {
    /// Extracts the message tag byte from the frame header
    ///
    /// The tag is always at byte 0 of the frame.
    pub fn tag(&self) -> u8 {
        if self.length == 0 {
            return u8::MAX;
        }
        self.data[0]
    }

    /// Builds a frame from raw received bytes
    ///
    /// Returns `None` for empty input or input longer than
    /// `RADIO_FRAME_SIZE`; such datagrams are discarded at the transport
    /// boundary (spurious traffic on the shared channel).
    pub fn from_slice(bytes: &[u8]) -> Option<RadioFrame> {
        if bytes.is_empty() || bytes.len() > RADIO_FRAME_SIZE {
            return None;
        }
        let mut data = [0u8; RADIO_FRAME_SIZE];
        data[..bytes.len()].copy_from_slice(bytes);
        Some(RadioFrame { data, length: bytes.len() })
    }

    /// The valid bytes of this frame
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }
}

impl PartialEq for RadioFrame {
    fn eq(&self, other: &Self) -> bool {
        self.length == other.length && self.data[..self.length] == other.data[..other.length]
    }
}

impl Eq for RadioFrame {}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    #[test]
    fn from_slice_accepts_valid_lengths() {
        let frame = RadioFrame::from_slice(&[7u8; 1]).unwrap();
        assert_eq!(frame.length, 1);
        assert_eq!(frame.tag(), 7);

        let frame = RadioFrame::from_slice(&[1u8; RADIO_FRAME_SIZE]).unwrap();
        assert_eq!(frame.length, RADIO_FRAME_SIZE);
    }

    #[test]
    fn from_slice_rejects_empty_and_oversize() {
        assert!(RadioFrame::from_slice(&[]).is_none());
        assert!(RadioFrame::from_slice(&[0u8; RADIO_FRAME_SIZE + 1]).is_none());
    }

    #[test]
    fn equality_ignores_trailing_buffer_bytes() {
        let a = RadioFrame::from_slice(&[3, 1, 2]).unwrap();
        let mut b = RadioFrame::from_slice(&[3, 1, 2]).unwrap();
        b.data[10] = 0xAA;
        assert_eq!(a, b);
    }
}
