//! Stream reader for one acquisition device

use futures::Stream;
use std::fmt::Debug;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::ToSocketAddrs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{IntervalStream, WatchStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ReaderConfig;
use crate::demux::ChannelBuffers;
use crate::discovery::StreamSetup;
use crate::driver::{Driver, ReaderCore, ReaderState, ReaderStats, SharedCore, lock_core};
use crate::provider::PacketSource;
use crate::providers::{ReplaySource, StreamSource};
use crate::stream::ReadyBatches;
use crate::types::{AnalogPacket, Capture, GpsPacket};
use crate::{Result, TelemetryError};

/// Reader for one device's channel data stream
///
/// A background task reads frames and routes their payloads into per-channel
/// buffers. Consumers poll [`is_data_ready`](Self::is_data_ready) at their own
/// cadence and drain what has been buffered; they never block on the task.
pub struct StreamReader {
    /// Buffers and counters shared with the reader task
    core: SharedCore,

    /// Reader state receiver
    state: watch::Receiver<ReaderState>,

    /// Cancellation token for stopping the task
    cancel: CancellationToken,

    /// Reader task; taken by `stop`
    task: Option<JoinHandle<Result<ReaderStats>>>,

    /// Capture window guaranteed by `stop`
    min_capture: Duration,

    description: String,
}

impl StreamReader {
    /// Connect to a device's streaming port.
    ///
    /// Returns once the TCP connection is open; data may not have arrived yet.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Connection`] if the device refuses the
    /// connection and [`TelemetryError::Timeout`] if it does not answer within
    /// `config.connect_timeout_ms`.
    pub async fn connect<A>(addr: A, config: &ReaderConfig) -> Result<Self>
    where
        A: ToSocketAddrs + Debug,
    {
        let source =
            StreamSource::connect(addr, config.connect_timeout(), config.initial_buffer).await?;
        Ok(Self::from_source(source.with_max_payload(config.max_payload), config))
    }

    /// Connect using a device's stream setup document.
    pub async fn connect_setup(setup: &StreamSetup, config: &ReaderConfig) -> Result<Self> {
        Self::connect(setup.endpoint()?, config).await
    }

    /// Replay a recorded byte stream through the same decoder.
    pub async fn replay<P: AsRef<Path>>(path: P, config: &ReaderConfig) -> Result<Self> {
        let source = ReplaySource::open(path).await?;
        Ok(Self::from_source(source.with_max_payload(config.max_payload), config))
    }

    /// Start reading from any packet source.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_source<S: PacketSource>(source: S, config: &ReaderConfig) -> Self {
        let description = source.describe();
        let core = Arc::new(Mutex::new(ReaderCore {
            buffers: ChannelBuffers::new(config.channels.iter().copied()),
            stats: ReaderStats::default(),
        }));

        let handles = Driver::spawn(source, Arc::clone(&core));
        info!("Reader started for {} (channels {:?})", description, config.channels);

        Self {
            core,
            state: handles.state,
            cancel: handles.cancel,
            task: Some(handles.task),
            min_capture: config.min_capture(),
            description,
        }
    }

    /// Stop the reader task and wait for it to exit.
    ///
    /// If a packet has arrived, first waits until `min_capture` has passed
    /// since the first one. Cancellation is checked between frames, so the
    /// frame in flight is completed. Buffered data stays available for
    /// draining afterwards.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the reader task, if any.
    pub async fn stop(&mut self) -> Result<ReaderStats> {
        let Some(task) = self.task.take() else {
            return self.stats();
        };

        let first_packet = lock_core(&self.core)?.stats.first_packet_at;
        if let Some(first) = first_packet
            && !self.state().is_terminal()
        {
            let remaining = self.min_capture.saturating_sub(first.elapsed());
            if !remaining.is_zero() {
                debug!("Holding {} open for {:?} more", self.description, remaining);
                tokio::time::sleep(remaining).await;
            }
        }

        self.cancel.cancel();
        let stats = task.await.map_err(|e| {
            TelemetryError::buffer(format!("reader task for {} panicked: {}", self.description, e))
        })??;

        info!("Reader for {} stopped after {} packets", self.description, stats.packets);
        Ok(stats)
    }

    /// Whether every subscribed channel holds aligned data.
    pub fn is_data_ready(&self) -> Result<bool> {
        Ok(lock_core(&self.core)?.buffers.is_data_ready())
    }

    /// Whether the gate has latched on a common timestamp.
    pub fn is_aligned(&self) -> Result<bool> {
        Ok(lock_core(&self.core)?.buffers.is_aligned())
    }

    /// Take the buffered blocks of one analog channel.
    pub fn drain_analog(&self, channel: u16) -> Result<Vec<AnalogPacket>> {
        Ok(lock_core(&self.core)?.buffers.drain_analog(channel))
    }

    /// Take the buffered samples of one analog channel, concatenated.
    pub fn drain_samples(&self, channel: u16) -> Result<Vec<f32>> {
        let packets = self.drain_analog(channel)?;
        Ok(packets.into_iter().flat_map(|p| p.samples).collect())
    }

    /// Take the buffered messages of one GPS channel.
    pub fn drain_gps(&self, channel: u16) -> Result<Vec<GpsPacket>> {
        Ok(lock_core(&self.core)?.buffers.drain_gps(channel))
    }

    /// Take everything buffered.
    pub fn drain(&self) -> Result<Capture> {
        Ok(lock_core(&self.core)?.buffers.drain())
    }

    /// Copy everything buffered without removing it.
    pub fn snapshot(&self) -> Result<Capture> {
        Ok(lock_core(&self.core)?.buffers.snapshot())
    }

    pub fn stats(&self) -> Result<ReaderStats> {
        Ok(lock_core(&self.core)?.stats.clone())
    }

    pub fn state(&self) -> ReaderState {
        self.state.borrow().clone()
    }

    /// State changes, starting with the current state
    pub fn state_updates(&self) -> impl Stream<Item = ReaderState> + 'static {
        WatchStream::new(self.state.clone())
    }

    /// Drained captures, checking readiness once per `period`
    pub fn ready_batches(&self, period: Duration) -> ReadyBatches<IntervalStream> {
        ReadyBatches::new(Arc::clone(&self.core), self.state.clone(), period)
    }

    pub fn describe(&self) -> &str {
        &self.description
    }
}

impl Drop for StreamReader {
    fn drop(&mut self) {
        debug!("Dropping reader for {}", self.description);
        self.cancel.cancel();
    }
}
