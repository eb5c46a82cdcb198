//! Stream reader and cross-system time alignment for Mecalc QServer acquisition devices.
//!
//! qsync reads the channel data stream a QServer device publishes over TCP,
//! buffers it per channel, and lines up the samples of two independently
//! clocked devices so they can be compared sample for sample.
//!
//! # Features
//!
//! - **Stream Reader**: Background task per device, cooperative shutdown, replay of recordings
//! - **Packet Codec**: Analog, GPS, CAN FD and tacho payloads decoded into a tagged union
//! - **Readiness Gate**: Waits until every subscribed channel holds a common timestamp
//! - **Time Alignment**: GPS, PTP and calibration-pulse policies
//! - **Delay Estimation**: FFT cross-correlation with cached plans
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use qsync::{QSync, ReaderConfig, TimeAligner, align::PtpAligner};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> qsync::Result<()> {
//!     let config = ReaderConfig::for_channels([13]);
//!     let mut reference = QSync::connect("192.168.100.2:8001", &config).await?;
//!     let mut sync = QSync::connect("192.168.100.3:8001", &config).await?;
//!
//!     tokio::time::sleep(Duration::from_secs(5)).await;
//!     reference.stop().await?;
//!     sync.stop().await?;
//!
//!     let block = PtpAligner::new().aligned_block(&reference.drain()?, &sync.drain()?)?;
//!     println!("{} aligned samples", block.len());
//!     Ok(())
//! }
//! ```

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;

// Wire protocol and buffering
pub mod demux;
pub mod gate;
pub mod nmea;
pub mod protocol;

// Connection architecture
pub mod connection;
pub mod driver;
pub mod provider;
pub mod providers;
pub mod stream;

// Alignment and orchestration
pub mod align;
pub mod config;
pub mod discovery;
pub mod session;

// Re-export main types
pub use error::*;
pub use types::*;

pub use align::{Aligner, TimeAligner};
pub use config::{AlignmentPolicy, ReaderConfig, SyncConfig};
pub use connection::StreamReader;
pub use discovery::{DeviceDiscovery, StreamSetup};
pub use driver::{ReaderState, ReaderStats};
pub use session::SyncSession;

/// Unified entry point for device stream readers.
///
/// # Examples
///
/// ## Live device
/// ```rust,no_run
/// use qsync::{QSync, ReaderConfig};
///
/// #[tokio::main]
/// async fn main() -> qsync::Result<()> {
///     let reader = QSync::connect("192.168.100.2:8001", &ReaderConfig::default()).await?;
///     // Use reader...
///     Ok(())
/// }
/// ```
///
/// ## Recorded stream
/// ```rust,no_run
/// use qsync::{QSync, ReaderConfig};
///
/// #[tokio::main]
/// async fn main() -> qsync::Result<()> {
///     let reader = QSync::replay("capture.qrec", &ReaderConfig::default()).await?;
///     // Use reader...
///     Ok(())
/// }
/// ```
pub struct QSync;

impl QSync {
    /// Connect to a device's channel data stream.
    ///
    /// The reader starts buffering as soon as the socket is open. Only the
    /// analog channels listed in `config.channels` are kept; GPS messages are
    /// kept for every channel.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The address cannot be resolved
    /// - The device refuses the connection
    /// - The device does not answer within `config.connect_timeout_ms`
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use qsync::{QSync, ReaderConfig};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> qsync::Result<()> {
    /// let config = ReaderConfig::for_channels([1, 2]);
    /// let reader = QSync::connect("192.168.100.2:8001", &config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect<A>(addr: A, config: &ReaderConfig) -> Result<StreamReader>
    where
        A: tokio::net::ToSocketAddrs + std::fmt::Debug,
    {
        StreamReader::connect(addr, config).await
    }

    /// Replay a raw recording of a device stream.
    ///
    /// The file holds the exact bytes a device sent, and is decoded by the
    /// same codec as a live connection. The reader ends when the file does.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::File`] if the file cannot be opened. Corrupt
    /// frames are reported by [`StreamReader::stop`].
    pub async fn replay<P: AsRef<std::path::Path>>(
        path: P,
        config: &ReaderConfig,
    ) -> Result<StreamReader> {
        StreamReader::replay(path, config).await
    }
}
