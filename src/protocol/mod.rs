//! QServer streaming protocol codec.
//!
//! [`format`] decodes frames read from the device socket; [`writer`] builds
//! frames in the same layout for mock devices, recordings and benchmarks.

pub mod format;
pub mod writer;

pub use format::{
    decode_channel_header, decode_channel_payload, decode_frame, decode_frames, decode_header,
    decode_payload,
};
pub use writer::{FrameWriter, encode_header};
