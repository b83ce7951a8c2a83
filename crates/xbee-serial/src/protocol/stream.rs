//! Byte stream framing
//!
//! Turns an async byte stream into a sequence of decoded API frames.

use std::io;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tracing::trace;

use super::{Frame, FrameType, Result, XbeeError, START_DELIMITER};

/// Abstraction for the link carrying API frames (serial port, socket, pipe)
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// Where the reader is within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// No read in progress
    Idle,
    /// Skipping bytes until the next 0x7E
    AwaitingDelimiter,
    /// Reading the length and frame type
    ReadingHeader,
    /// Reading fields, payload and checksum
    ReadingPayload,
    /// Decoding a complete frame
    Dispatching,
}

/// Reads API frames from an async byte stream
pub struct FrameReader<R> {
    inner: BufReader<R>,
    /// Bound on each header/payload read; the delimiter wait is unbounded
    read_timeout: Option<Duration>,
    /// Header bytes of a rejected frame, rescanned before reading `inner`
    pushback: Vec<u8>,
    state: ReadState,
    bytes_read: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Create a reader; `read_timeout` limits each read once a delimiter is seen
    pub fn new(inner: R, read_timeout: Option<Duration>) -> Self {
        Self {
            inner: BufReader::new(inner),
            read_timeout,
            pushback: Vec::new(),
            state: ReadState::Idle,
            bytes_read: 0,
        }
    }

    /// Current position in the frame state machine
    pub fn state(&self) -> ReadState {
        self.state
    }

    /// Total bytes consumed from the stream, including discarded ones
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read and decode the next frame.
    ///
    /// Errors for a single frame (timeout, bad length, unknown type, bad
    /// checksum) leave the reader ready to resynchronise on the next
    /// delimiter. [`XbeeError::Closed`] means the stream has ended.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        let result = self.read_frame_inner().await;
        self.state = ReadState::Idle;
        result
    }

    async fn read_frame_inner(&mut self) -> Result<Frame> {
        self.state = ReadState::AwaitingDelimiter;
        self.skip_to_delimiter().await?;

        self.state = ReadState::ReadingHeader;
        let mut header = [0u8; 2];
        self.read_exact_timed(&mut header).await?;
        let length = BigEndian::read_u16(&header) as usize;
        if length == 0 || length > FrameType::max_length() {
            // Likely a stray 0x7E: a real delimiter may sit in these two bytes
            let mut rescan = header.to_vec();
            rescan.append(&mut self.pushback);
            self.pushback = rescan;
            return Err(XbeeError::InvalidLength { length });
        }
        let mut frame_type = [0u8; 1];
        self.read_exact_timed(&mut frame_type).await?;

        // length - 1 bytes of fields and payload, then the checksum
        self.state = ReadState::ReadingPayload;
        let mut body = vec![0u8; length];
        self.read_exact_timed(&mut body).await?;

        self.state = ReadState::Dispatching;
        trace!(frame_type = frame_type[0], length, "Frame received");
        Frame::decode(frame_type[0], &body)
    }

    /// Consume bytes up to and including the next delimiter without buffering them
    async fn skip_to_delimiter(&mut self) -> Result<()> {
        if let Some(pos) = self.pushback.iter().position(|&b| b == START_DELIMITER) {
            self.pushback.drain(..=pos);
            if pos > 0 {
                trace!(count = pos, "Discarded bytes before delimiter");
            }
            return Ok(());
        }

        let mut discarded = self.pushback.len();
        self.pushback.clear();
        loop {
            let (scanned, found) = {
                let available = self.inner.fill_buf().await?;
                if available.is_empty() {
                    return Err(XbeeError::Closed);
                }
                match available.iter().position(|&b| b == START_DELIMITER) {
                    Some(pos) => (pos + 1, true),
                    None => (available.len(), false),
                }
            };
            self.inner.consume(scanned);
            self.bytes_read += scanned as u64;

            if found {
                discarded += scanned - 1;
                break;
            }
            discarded += scanned;
        }

        if discarded > 0 {
            trace!(count = discarded, "Discarded bytes before delimiter");
        }
        Ok(())
    }

    async fn read_exact_timed(&mut self, buf: &mut [u8]) -> Result<()> {
        let reused = self.pushback.len().min(buf.len());
        buf[..reused].copy_from_slice(&self.pushback[..reused]);
        self.pushback.drain(..reused);
        let rest = &mut buf[reused..];
        if rest.is_empty() {
            return Ok(());
        }

        let read = self.inner.read_exact(rest);
        let result = match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| XbeeError::Timeout)?,
            None => read.await,
        };

        match result {
            Ok(n) => {
                self.bytes_read += n as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(XbeeError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}
