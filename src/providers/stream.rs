//! Byte stream source for device sockets

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info, trace};

use crate::protocol::format::{PACKET_HEADER_SIZE, decode_header, decode_payload};
use crate::provider::PacketSource;
use crate::types::Frame;
use crate::{Result, TelemetryError};

/// Default receive buffer size; grown when a frame declares a larger payload.
pub const DEFAULT_RECEIVE_BUFFER: usize = 2048;

/// Largest payload a frame may declare before the stream is treated as corrupt.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame source over any async byte stream
///
/// Reads the fixed header, grows the receive buffer if the declared payload
/// does not fit, then reads exactly the payload before decoding it. A header
/// declaring more than `max_payload` bytes is a framing error.
pub struct StreamSource<R> {
    reader: BufReader<R>,
    /// Receive buffer for payload bytes
    buffer: Vec<u8>,
    max_payload: usize,
    peer: String,
    frames_read: u64,
}

impl StreamSource<TcpStream> {
    /// Open a TCP connection to a device's streaming port.
    pub async fn connect<A>(addr: A, timeout: Duration, initial_buffer: usize) -> Result<Self>
    where
        A: ToSocketAddrs + std::fmt::Debug,
    {
        let peer = format!("{:?}", addr);
        info!("Connecting to acquisition device at {}", peer);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TelemetryError::connection_failed_with_source(
                    format!("cannot connect to {}", peer),
                    Box::new(e),
                ));
            }
            Err(_) => return Err(TelemetryError::Timeout { duration: timeout }),
        };

        stream.set_nodelay(true).map_err(|e| TelemetryError::io("configuring socket", e))?;
        let peer = stream.peer_addr().map(|a| a.to_string()).unwrap_or(peer);
        info!(peer = %peer, "Connected to acquisition device");

        Ok(Self::with_capacity(stream, peer, initial_buffer))
    }
}

impl<R> StreamSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pub fn new(reader: R, peer: impl Into<String>) -> Self {
        Self::with_capacity(reader, peer, DEFAULT_RECEIVE_BUFFER)
    }

    pub fn with_capacity(reader: R, peer: impl Into<String>, initial_buffer: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buffer: vec![0u8; initial_buffer],
            max_payload: DEFAULT_MAX_PAYLOAD,
            peer: peer.into(),
            frames_read: 0,
        }
    }

    /// Reject frames declaring more than `max_payload` bytes.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Current receive buffer size in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

#[async_trait::async_trait]
impl<R> PacketSource for StreamSource<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    async fn ready(&mut self) -> Result<bool> {
        let available = self
            .reader
            .fill_buf()
            .await
            .map_err(|e| TelemetryError::io(format!("waiting for data from {}", self.peer), e))?;
        Ok(!available.is_empty())
    }

    async fn next_packet(&mut self) -> Result<Option<Frame>> {
        if !self.ready().await? {
            debug!("{} closed the stream after {} frames", self.peer, self.frames_read);
            return Ok(None);
        }

        let mut header_bytes = [0u8; PACKET_HEADER_SIZE];
        self.reader.read_exact(&mut header_bytes).await.map_err(|e| read_error("header", e))?;
        let header = decode_header(&header_bytes)?;

        let size = header.payload_size as usize;
        if size > self.max_payload {
            return Err(TelemetryError::framing(
                "packet header",
                format!("declares {} payload bytes, limit is {}", size, self.max_payload),
            ));
        }
        if size > self.buffer.len() {
            debug!("Growing receive buffer from {} to {} bytes", self.buffer.len(), size);
            self.buffer.resize(size, 0);
        }

        let payload = &mut self.buffer[..size];
        self.reader.read_exact(payload).await.map_err(|e| read_error("payload", e))?;
        let payloads = decode_payload(&header, payload)?;

        self.frames_read += 1;
        trace!("Frame {} from {}: {} payloads", header.sequence, self.peer, payloads.len());
        Ok(Some(Frame { header, payloads }))
    }

    fn describe(&self) -> String {
        self.peer.clone()
    }
}

fn read_error(part: &str, err: std::io::Error) -> TelemetryError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TelemetryError::framing(format!("packet {}", part), "stream ended mid-frame")
    } else {
        TelemetryError::io(format!("reading packet {}", part), err)
    }
}
