//! Replay source for recorded device streams

use std::io::Cursor;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, info};

use super::stream::StreamSource;
use crate::provider::PacketSource;
use crate::types::Frame;
use crate::{Result, TelemetryError};

enum Recording {
    File(StreamSource<File>),
    Memory(StreamSource<Cursor<Vec<u8>>>),
}

/// Replays a raw byte capture of a device socket
///
/// The recording is the exact byte stream the device sent, so it goes
/// through the same decoder as a live connection.
pub struct ReplaySource {
    recording: Recording,

    /// Optional frame pacing interval
    pacing: Option<Interval>,

    origin: String,
}

impl ReplaySource {
    /// Open a recording file.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .await
            .map_err(|e| TelemetryError::file_error(PathBuf::from(path), e))?;
        let origin = path.display().to_string();
        info!("Opened stream recording: {}", origin);

        Ok(Self {
            recording: Recording::File(StreamSource::new(file, origin.clone())),
            pacing: None,
            origin,
        })
    }

    /// Replay an in-memory recording.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let origin = format!("<memory: {} bytes>", bytes.len());
        Self {
            recording: Recording::Memory(StreamSource::new(Cursor::new(bytes), origin.clone())),
            pacing: None,
            origin,
        }
    }

    /// Release at most one frame per `period`.
    pub fn with_pacing(mut self, period: Duration) -> Self {
        let mut ticks = interval(period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Replay pacing set to {:?} per frame", period);
        self.pacing = Some(ticks);
        self
    }

    /// Reject frames declaring more than `max_payload` bytes.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.recording = match self.recording {
            Recording::File(source) => Recording::File(source.with_max_payload(max_payload)),
            Recording::Memory(source) => Recording::Memory(source.with_max_payload(max_payload)),
        };
        self
    }

    fn source(&mut self) -> &mut dyn PacketSource {
        match &mut self.recording {
            Recording::File(source) => source,
            Recording::Memory(source) => source,
        }
    }
}

#[async_trait::async_trait]
impl PacketSource for ReplaySource {
    async fn ready(&mut self) -> Result<bool> {
        if let Some(pacing) = self.pacing.as_mut() {
            pacing.tick().await;
        }
        self.source().ready().await
    }

    async fn next_packet(&mut self) -> Result<Option<Frame>> {
        self.source().next_packet().await
    }

    fn describe(&self) -> String {
        format!("replay of {}", self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameWriter;
    use std::io::Write;

    fn recording(frames: u32) -> Vec<u8> {
        (0..frames)
            .flat_map(|i| FrameWriter::new(i).analog(1, u64::from(i) * 100, &[i as f32]).encode())
            .collect()
    }

    #[tokio::test]
    async fn replays_file_frames_in_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&recording(3)).unwrap();

        let mut source = ReplaySource::open(file.path()).await.unwrap();
        for expected in 0..3 {
            assert!(source.ready().await.unwrap());
            let frame = source.next_packet().await.unwrap().unwrap();
            assert_eq!(frame.header.sequence, expected);
        }
        assert!(!source.ready().await.unwrap());
        assert!(source.describe().starts_with("replay of"));
    }

    #[tokio::test]
    async fn missing_file_is_a_file_error() {
        let result = ReplaySource::open("/definitely/not/here.qrec").await;
        assert!(matches!(result, Err(TelemetryError::File { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_spaces_frames() {
        let mut source =
            ReplaySource::from_bytes(recording(3)).with_pacing(Duration::from_millis(100));
        let start = tokio::time::Instant::now();
        for _ in 0..3 {
            assert!(source.ready().await.unwrap());
            source.next_packet().await.unwrap();
        }
        // First tick completes immediately.
        assert!(start.elapsed() >= Duration::from_millis(200));
    }
}
