//! Length-prefixed wire framing.
//!
//! Every message is one envelope:
//!
//! ```text
//! +----------------------+---------+------------------+
//! | length: u64 LE (8 B) | kind 1B | payload (length) |
//! +----------------------+---------+------------------+
//! ```
//!
//! `kind` is 0 for a normal payload and 1 for a serialized [`RemoteError`].
//! Readers loop over partial reads, pulling at most [`READ_BUFFER_SIZE`]
//! bytes per call, so any byte-stream transport works.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Chunk size for payload reads.
pub const READ_BUFFER_SIZE: usize = 256;

/// Length prefix plus kind flag.
pub const HEADER_LEN: usize = 9;

/// Default upper bound for a single payload (256 MiB).
pub const DEFAULT_MAX_FRAME_LEN: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Normal = 0,
    Error = 1,
}

impl TryFrom<u8> for FrameKind {
    type Error = Error;

    fn try_from(flag: u8) -> Result<Self> {
        match flag {
            0 => Ok(FrameKind::Normal),
            1 => Ok(FrameKind::Error),
            other => Err(Error::protocol(format!("unknown frame kind {}", other))),
        }
    }
}

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn normal(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Normal,
            payload,
        }
    }

    pub fn error(payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Error,
            payload,
        }
    }

    /// Header and payload as one buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&(self.payload.len() as u64).to_le_bytes());
        buf.push(self.kind as u8);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode one envelope from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold a complete envelope,
    /// otherwise the envelope and the number of bytes consumed.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }
        let (len, kind) = parse_header(&buf[..HEADER_LEN])?;
        let len = usize::try_from(len)
            .map_err(|_| Error::protocol(format!("frame length {} is too large", len)))?;
        let end = HEADER_LEN + len;
        if buf.len() < end {
            return Ok(None);
        }
        Ok(Some((
            Self {
                kind,
                payload: buf[HEADER_LEN..end].to_vec(),
            },
            end,
        )))
    }
}

fn parse_header(header: &[u8]) -> Result<(u64, FrameKind)> {
    let mut len = [0u8; 8];
    len.copy_from_slice(&header[..8]);
    Ok((u64::from_le_bytes(len), FrameKind::try_from(header[8])?))
}

/// Error payload carried by an error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub message: String,
    pub type_name: String,
}

impl From<&Error> for RemoteError {
    fn from(err: &Error) -> Self {
        match err {
            Error::RemoteExecution { message, type_name } => Self {
                message: message.clone(),
                type_name: type_name.clone(),
            },
            other => Self {
                message: other.to_string(),
                type_name: other.kind_name().to_string(),
            },
        }
    }
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::RemoteExecution {
            message: err.message,
            type_name: err.type_name,
        }
    }
}

/// Payload serialization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// serde_json text.
    #[default]
    Json,
    /// bincode.
    Binary,
}

impl PayloadFormat {
    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(match self {
            PayloadFormat::Json => serde_json::to_vec(value)?,
            PayloadFormat::Binary => bincode::serialize(value)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(match self {
            PayloadFormat::Json => serde_json::from_slice(bytes)?,
            PayloadFormat::Binary => bincode::deserialize(bytes)?,
        })
    }
}

/// Typed framing over byte streams.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    format: PayloadFormat,
    max_frame_len: u64,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(PayloadFormat::default())
    }
}

impl Codec {
    pub fn new(format: PayloadFormat) -> Self {
        Self {
            format,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    pub fn with_max_frame_len(mut self, max_frame_len: u64) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    fn check_len(&self, len: u64) -> Result<usize> {
        if len > self.max_frame_len {
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds the {} byte limit",
                len, self.max_frame_len
            )));
        }
        usize::try_from(len).map_err(|_| Error::protocol(format!("frame length {} is too large", len)))
    }

    fn value_envelope<T: Serialize>(&self, value: &T) -> Result<Envelope> {
        Ok(Envelope::normal(self.format.encode(value)?))
    }

    fn error_envelope(&self, err: &Error) -> Result<Envelope> {
        Ok(Envelope::error(self.format.encode(&RemoteError::from(err))?))
    }

    /// Decode a normal payload, or surface an error payload as
    /// `RemoteExecution`.
    pub fn open<T: DeserializeOwned>(&self, envelope: Envelope) -> Result<T> {
        match envelope.kind {
            FrameKind::Normal => self.format.decode(&envelope.payload),
            FrameKind::Error => {
                let remote: RemoteError = self.format.decode(&envelope.payload)?;
                Err(remote.into())
            }
        }
    }

    pub fn write_value<W: Write, T: Serialize>(&self, writer: &mut W, value: &T) -> Result<()> {
        write_envelope(writer, &self.value_envelope(value)?)
    }

    pub fn write_error<W: Write>(&self, writer: &mut W, err: &Error) -> Result<()> {
        write_envelope(writer, &self.error_envelope(err)?)
    }

    /// Read one envelope. `Ok(None)` on a clean end of stream before the header.
    pub fn read_envelope<R: Read>(&self, reader: &mut R) -> Result<Option<Envelope>> {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full(reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(Error::protocol(format!(
                "truncated header: {} of {} bytes",
                got, HEADER_LEN
            )));
        }
        let (len, kind) = parse_header(&header)?;
        let len = self.check_len(len)?;
        let mut payload = vec![0u8; len];
        let got = read_full(reader, &mut payload)?;
        if got < len {
            return Err(Error::protocol(format!(
                "truncated payload: {} of {} bytes",
                got, len
            )));
        }
        Ok(Some(Envelope { kind, payload }))
    }

    pub fn read_value<R: Read, T: DeserializeOwned>(&self, reader: &mut R) -> Result<T> {
        let envelope = self
            .read_envelope(reader)?
            .ok_or_else(|| Error::protocol("connection closed before a response"))?;
        self.open(envelope)
    }

    pub async fn write_value_async<W, T>(&self, writer: &mut W, value: &T) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        write_envelope_async(writer, &self.value_envelope(value)?).await
    }

    pub async fn write_error_async<W>(&self, writer: &mut W, err: &Error) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        write_envelope_async(writer, &self.error_envelope(err)?).await
    }

    pub async fn read_envelope_async<R>(&self, reader: &mut R) -> Result<Option<Envelope>>
    where
        R: AsyncRead + Unpin,
    {
        let mut header = [0u8; HEADER_LEN];
        let got = read_full_async(reader, &mut header).await?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_LEN {
            return Err(Error::protocol(format!(
                "truncated header: {} of {} bytes",
                got, HEADER_LEN
            )));
        }
        let (len, kind) = parse_header(&header)?;
        let len = self.check_len(len)?;
        let mut payload = vec![0u8; len];
        let got = read_full_async(reader, &mut payload).await?;
        if got < len {
            return Err(Error::protocol(format!(
                "truncated payload: {} of {} bytes",
                got, len
            )));
        }
        Ok(Some(Envelope { kind, payload }))
    }

    pub async fn read_value_async<R, T>(&self, reader: &mut R) -> Result<T>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let envelope = self
            .read_envelope_async(reader)
            .await?
            .ok_or_else(|| Error::protocol("connection closed before a response"))?;
        self.open(envelope)
    }
}

pub fn write_envelope<W: Write>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    writer.write_all(&envelope.encode())?;
    writer.flush()?;
    Ok(())
}

pub async fn write_envelope_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    writer.write_all(&envelope.encode()).await?;
    writer.flush().await?;
    Ok(())
}

/// Fill `buf` in chunks of at most [`READ_BUFFER_SIZE`]; returns the byte
/// count read before end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let end = buf.len().min(filled + READ_BUFFER_SIZE);
        match reader.read(&mut buf[filled..end]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

async fn read_full_async<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let end = buf.len().min(filled + READ_BUFFER_SIZE);
        let n = reader.read(&mut buf[filled..end]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
