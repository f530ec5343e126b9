//! Wire framing for the Meshtastic serial/TCP client API.
//!
//! Every packet travels as `0x94 0xC3 len_hi len_lo` followed by `len` bytes of protobuf.
//! The radio interleaves plain-text console output with frames, so the reader scans byte by
//! byte and resynchronizes on any mismatch. Bytes that are not part of a frame are treated
//! as device console output and logged under the `device` target.

use crate::logutil::{escape_log, hex_snippet};
use crate::metrics;
use crate::protobuf::meshtastic_generated as proto;
use bytes::Bytes;
use chrono::Utc;
use log::{debug, trace, warn};
use prost::Message;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::{sleep, Duration};

pub const START1: u8 = 0x94;
pub const START2: u8 = 0xC3;
pub const HEADER_LEN: usize = 4;
/// Largest payload the firmware accepts in one frame.
pub const MAX_PAYLOAD: usize = 512;
pub const WAKE_BYTES: usize = 32;
pub const WAKE_SETTLE: Duration = Duration::from_millis(100);

/// Console lines longer than this are flushed to the log in pieces.
const MAX_CONSOLE_LINE: usize = 512;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream closed")]
    Eof,
    #[error("i/o error: {0}")]
    Io(#[source] io::Error),
    #[error("payload of {0} bytes exceeds the 512 byte frame limit")]
    TooLarge(usize),
    #[error("failed to decode packet: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("failed to encode packet: {0}")]
    Encode(#[from] prost::EncodeError),
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FrameError::Eof
        } else {
            FrameError::Io(e)
        }
    }
}

/// Outcome of feeding one byte to the [`Scanner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scan {
    /// Need more bytes.
    Pending,
    /// A valid header was completed; read this many payload bytes next.
    Payload(usize),
    /// A header declared a length above [`MAX_PAYLOAD`]; scanning restarted.
    Oversize(usize),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    #[default]
    Start1,
    Start2,
    LenHi,
    LenLo,
}

/// Header recognizer. Holds no I/O so it can be driven from any byte source.
#[derive(Debug, Default)]
pub struct Scanner {
    state: ScanState,
    len_hi: u8,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one byte. Bytes that turn out not to belong to a frame header are appended to
    /// `noise`.
    pub fn push(&mut self, byte: u8, noise: &mut Vec<u8>) -> Scan {
        match self.state {
            ScanState::Start1 => {
                if byte == START1 {
                    self.state = ScanState::Start2;
                } else {
                    noise.push(byte);
                }
                Scan::Pending
            }
            ScanState::Start2 => {
                if byte == START2 {
                    self.state = ScanState::LenHi;
                    Scan::Pending
                } else {
                    // The held START1 was noise; the current byte may open a new header.
                    noise.push(START1);
                    self.state = ScanState::Start1;
                    self.push(byte, noise)
                }
            }
            ScanState::LenHi => {
                self.len_hi = byte;
                self.state = ScanState::LenLo;
                Scan::Pending
            }
            ScanState::LenLo => {
                self.state = ScanState::Start1;
                let len = ((self.len_hi as usize) << 8) | byte as usize;
                if len == 0 {
                    Scan::Pending
                } else if len > MAX_PAYLOAD {
                    Scan::Oversize(len)
                } else {
                    Scan::Payload(len)
                }
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == ScanState::Start1
    }
}

/// Buffered frame reader over any async byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    scanner: Scanner,
    noise: Vec<u8>,
    console_line: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
            scanner: Scanner::new(),
            noise: Vec::new(),
            console_line: Vec::new(),
        }
    }

    /// Read the next frame payload, skipping any noise in front of it.
    pub async fn read_payload(&mut self) -> Result<Bytes, FrameError> {
        loop {
            let byte = self.inner.read_u8().await?;
            let step = self.scanner.push(byte, &mut self.noise);
            if !self.noise.is_empty() {
                self.drain_noise();
            }
            match step {
                Scan::Pending => {}
                Scan::Oversize(len) => {
                    warn!(
                        "Discarding frame header with length {} (max {}); resynchronizing",
                        len, MAX_PAYLOAD
                    );
                    metrics::inc_oversize_frames();
                }
                Scan::Payload(len) => {
                    let mut payload = vec![0u8; len];
                    self.inner.read_exact(&mut payload).await?;
                    metrics::inc_frames_received();
                    trace!("RX frame len={} hex={}", len, hex_snippet(&payload, 64));
                    return Ok(Bytes::from(payload));
                }
            }
        }
    }

    /// Read and decode the next `FromRadio` packet.
    pub async fn read_packet(&mut self) -> Result<proto::FromRadio, FrameError> {
        let payload = self.read_payload().await?;
        Ok(proto::FromRadio::decode(payload)?)
    }

    fn drain_noise(&mut self) {
        metrics::add_noise_bytes(self.noise.len() as u64);
        for b in self.noise.drain(..) {
            if b == b'\n' {
                Self::flush_console_line(&mut self.console_line);
            } else if b != b'\r' {
                self.console_line.push(b);
                if self.console_line.len() >= MAX_CONSOLE_LINE {
                    Self::flush_console_line(&mut self.console_line);
                }
            }
        }
    }

    fn flush_console_line(line: &mut Vec<u8>) {
        if line.iter().any(|b| !b.is_ascii_whitespace() && *b != 0) {
            let text = String::from_utf8_lossy(line);
            debug!(target: "device", "{}", escape_log(text.trim_end()));
        }
        line.clear();
    }
}

/// Write one frame (header and payload in a single write) and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(payload.len()));
    }
    let len = payload.len();
    let mut frame = Vec::with_capacity(HEADER_LEN + len);
    frame.extend_from_slice(&[START1, START2, ((len >> 8) & 0xFF) as u8, (len & 0xFF) as u8]);
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    metrics::inc_frames_sent();
    trace!("TX frame len={} hex={}", len, hex_snippet(payload, 64));
    Ok(())
}

/// Encode a protobuf message (normally `ToRadio`) and write it as one frame.
pub async fn write_packet<W, M>(writer: &mut W, packet: &M) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
    M: Message,
{
    let len = packet.encoded_len();
    if len > MAX_PAYLOAD {
        return Err(FrameError::TooLarge(len));
    }
    let mut buf = Vec::with_capacity(len);
    packet.encode(&mut buf)?;
    write_frame(writer, &buf).await
}

/// Rouse a sleeping radio: a run of filler bytes, then a short settle delay.
pub async fn wake_device<W>(writer: &mut W) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&[0u8; WAKE_BYTES]).await?;
    writer.flush().await?;
    sleep(WAKE_SETTLE).await;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Append-only text capture of raw frames, one line per frame.
pub struct FrameLog {
    file: Mutex<File>,
}

impl FrameLog {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, direction: Direction, payload: &[u8]) {
        let tag = match direction {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        };
        let line = format!(
            "{} {} {} {}",
            Utc::now().to_rfc3339(),
            tag,
            payload.len(),
            hex_snippet(payload, MAX_PAYLOAD)
        );
        let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(target: "frames", "Frame log write failed: {}", e);
        }
    }
}
