//! Packet source trait for stream readers

use crate::Result;
use crate::types::Frame;

/// Trait for byte sources that yield decoded frames
///
/// Sources abstract over a live device socket and recorded streams. The
/// reader's driver task owns the source exclusively.
#[async_trait::async_trait]
pub trait PacketSource: Send + 'static {
    /// Wait until the first byte of the next frame is available
    ///
    /// Returns:
    /// - `Ok(true)` - A frame has started arriving
    /// - `Ok(false)` - The peer closed the stream at a frame boundary
    /// - `Err(e)` - I/O error
    ///
    /// Must be cancel safe: dropping the future consumes no bytes, so the
    /// driver can race it against a shutdown request.
    async fn ready(&mut self) -> Result<bool>;

    /// Read and decode one whole frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - Frame decoded
    /// - `Ok(None)` - Stream ended at a frame boundary
    /// - `Err(e)` - I/O or framing error; the stream cannot continue
    ///
    /// Not cancel safe. Once started it runs to the end of the frame.
    async fn next_packet(&mut self) -> Result<Option<Frame>>;

    /// Human-readable description used in logs
    fn describe(&self) -> String;
}
