//! Core types for decoded stream data.
//!
//! ## Architecture
//!
//! The type system mirrors the device's wire structures by composition:
//! - [`PacketHeader`] is the fixed envelope in front of every payload
//! - [`ChannelHeader`] is the generic header every channel payload starts with
//! - [`ChannelPayload`] is the tagged union of the four channel kinds
//! - [`Capture`] holds what a reader buffered, keyed by channel id
//! - [`AlignedBlock`] is the equal-length pair produced by an aligner

mod capture;
mod channel;
mod packet;

pub use capture::{AlignedBlock, Capture, PulseScope};
pub use channel::{
    AnalogPacket, CanFdPacket, ChannelHeader, ChannelPayload, ChannelType, GpsPacket, TachoPacket,
};
pub use packet::{Frame, PacketHeader};

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_known_tags_round_trip(tag in 1u16..=4) {
            let channel_type = ChannelType::from_tag(tag).unwrap();
            prop_assert_eq!(channel_type.tag(), tag);
        }

        #[test]
        fn prop_unknown_tags_are_rejected(tag in 5u16..) {
            let err = ChannelType::from_tag(tag).unwrap_err();
            prop_assert!(err.is_framing_failure());
        }

        #[test]
        fn prop_aligned_block_sides_are_equal(a in 0usize..500, b in 0usize..500) {
            let block = AlignedBlock::new(vec![0.0; a], vec![1.0; b]);
            prop_assert_eq!(block.reference.len(), block.sync.len());
            prop_assert_eq!(block.len(), a.min(b));
        }
    }

    #[test]
    fn zero_tag_is_unknown() {
        assert!(matches!(
            ChannelType::from_tag(0),
            Err(crate::TelemetryError::UnknownChannelType { tag: 0 })
        ));
    }

    #[test]
    fn opaque_payload_type_is_not_channel_data() {
        let header = PacketHeader { version: 1, payload_type: 3, payload_size: 8, sequence: 0 };
        assert!(!header.is_channel_data());
        let frame = Frame { header, payloads: Vec::new() };
        assert_eq!(frame.wire_size(), 24);
    }
}
