//! Driver spawns and manages the reader task

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::demux::ChannelBuffers;
use crate::provider::PacketSource;
use crate::types::Frame;
use crate::{Result, TelemetryError};

/// Lifecycle of a reader task.
#[derive(Debug, Clone)]
pub enum ReaderState {
    /// Connected, no frame received yet
    Waiting,
    /// Frames are arriving
    Streaming,
    /// The peer closed the stream
    Ended,
    /// Stopped on request
    Stopped,
    /// Fatal error; the connection must be reopened
    Failed(Arc<TelemetryError>),
}

// Two failures are equal when they come from the same task exit.
impl PartialEq for ReaderState {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ReaderState::Failed(a), ReaderState::Failed(b)) => Arc::ptr_eq(a, b),
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for ReaderState {}

impl ReaderState {
    /// Whether the reader task has exited.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReaderState::Ended | ReaderState::Stopped | ReaderState::Failed(_))
    }

    /// The error that ended the task, if it failed.
    pub fn failure(&self) -> Option<&TelemetryError> {
        match self {
            ReaderState::Failed(error) => Some(error.as_ref()),
            _ => None,
        }
    }
}

/// Counters kept by the reader task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub packets: u64,
    pub opaque_packets: u64,
    pub payload_bytes: u64,
    pub analog_buffered: u64,
    pub gps_buffered: u64,
    pub filtered: u64,
    pub discarded: u64,
    pub sequence_gaps: u64,
    pub first_packet_at: Option<Instant>,
    pub last_sequence: Option<u32>,
}

/// Everything the reader task mutates, behind one lock.
#[derive(Debug)]
pub struct ReaderCore {
    pub buffers: ChannelBuffers,
    pub stats: ReaderStats,
}

/// Shared handle to a reader's buffers and counters.
pub type SharedCore = Arc<Mutex<ReaderCore>>;

/// Lock the shared core, mapping a poisoned lock to a buffer error.
pub fn lock_core(core: &SharedCore) -> Result<MutexGuard<'_, ReaderCore>> {
    core.lock().map_err(|_| TelemetryError::buffer("reader buffers poisoned by a panicked task"))
}

/// Result of spawning a reader task
pub struct DriverHandles {
    /// Receiver for reader state changes
    pub state: watch::Receiver<ReaderState>,
    /// Cancellation token for cooperative shutdown
    pub cancel: CancellationToken,
    /// Task handle; resolves to the final counters or the fatal error
    pub task: JoinHandle<Result<ReaderStats>>,
}

/// Driver spawns and manages the reader task
///
/// The task owns the packet source. It checks for cancellation only between
/// frames: once a frame has started arriving it is read to the end, so the
/// socket is never abandoned mid-frame.
pub struct Driver;

impl Driver {
    /// Spawn the reader task for the given source
    pub fn spawn<S>(source: S, core: SharedCore) -> DriverHandles
    where
        S: PacketSource,
    {
        let (state_tx, state_rx) = watch::channel(ReaderState::Waiting);
        let cancel = CancellationToken::new();
        let cancel_task = cancel.clone();

        let task = tokio::spawn(async move {
            let result = Self::reader_task(source, &core, &state_tx, cancel_task).await;
            let final_state = match &result {
                Ok(state) => state.clone(),
                Err(e) => ReaderState::Failed(Arc::new(e.detached())),
            };
            let _ = state_tx.send(final_state);

            result?;
            Ok(lock_core(&core)?.stats.clone())
        });

        DriverHandles { state: state_rx, cancel, task }
    }

    /// Reader task - reads frames and routes their payloads
    async fn reader_task<S>(
        mut source: S,
        core: &SharedCore,
        state_tx: &watch::Sender<ReaderState>,
        cancel: CancellationToken,
    ) -> Result<ReaderState>
    where
        S: PacketSource,
    {
        let peer = source.describe();
        info!("Reader task started for {}", peer);
        let mut frame_count = 0u64;

        let end_state = loop {
            // Check for cancellation between frames
            if cancel.is_cancelled() {
                info!("Reader for {} cancelled", peer);
                break ReaderState::Stopped;
            }

            // Waiting for the next frame consumes nothing, so it may be abandoned
            let has_data = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Reader for {} cancelled while idle", peer);
                    break ReaderState::Stopped;
                }
                result = source.ready() => result,
            };

            match has_data {
                Ok(true) => {}
                Ok(false) => {
                    info!("{} ended the stream after {} frames", peer, frame_count);
                    break ReaderState::Ended;
                }
                Err(e) => {
                    error!("Reader for {} failed while waiting: {}", peer, e);
                    return Err(e);
                }
            }

            let frame = match source.next_packet().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("{} ended the stream after {} frames", peer, frame_count);
                    break ReaderState::Ended;
                }
                Err(e) => {
                    error!("Reader for {} stopped on fatal error: {}", peer, e);
                    return Err(e);
                }
            };

            Self::ingest(core, frame)?;
            frame_count += 1;
            if frame_count == 1 {
                debug!("First frame from {}", peer);
                let _ = state_tx.send(ReaderState::Streaming);
            }
        };

        info!("Reader task for {} ended (processed {} frames)", peer, frame_count);
        Ok(end_state)
    }

    /// Route one frame into the buffers under the reader lock.
    fn ingest(core: &SharedCore, frame: Frame) -> Result<()> {
        let mut guard = lock_core(core)?;
        let ReaderCore { buffers, stats } = &mut *guard;

        let sequence = frame.header.sequence;
        if let Some(last) = stats.last_sequence
            && sequence != last.wrapping_add(1)
        {
            stats.sequence_gaps += 1;
            warn!("Sequence gap: expected {}, got {}", last.wrapping_add(1), sequence);
        }
        stats.last_sequence = Some(sequence);
        stats.first_packet_at.get_or_insert_with(Instant::now);
        stats.packets += 1;
        stats.payload_bytes += u64::from(frame.header.payload_size);

        if !frame.header.is_channel_data() {
            stats.opaque_packets += 1;
            return Ok(());
        }

        let summary = buffers.route_all(frame.payloads);
        stats.analog_buffered += summary.analog as u64;
        stats.gps_buffered += summary.gps as u64;
        stats.filtered += summary.filtered as u64;
        stats.discarded += summary.discarded as u64;

        trace!(
            "Frame {}: analog={}, gps={}, filtered={}, discarded={}",
            sequence, summary.analog, summary.gps, summary.filtered, summary.discarded
        );
        Ok(())
    }
}
