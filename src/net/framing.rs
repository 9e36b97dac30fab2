//! Message framing for the length-prefixed protocol
//!
//! Every message is a fixed header followed by the payload:
//! `[magic u32 LE][version u16 LE][reserved u16][length u32 LE][payload]`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::game::constants::net::{FRAME_MAGIC, FRAME_VERSION, HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Errors that can occur during message framing
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Bad magic number: {0:#010x}")]
    BadMagic(u32),
    #[error("Unsupported frame version: {0}")]
    UnsupportedVersion(u16),
    #[error("Message too large: {0} bytes (max {1})")]
    MessageTooLarge(usize, usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Build the header announcing a payload of `len` bytes
pub fn encode_header(len: usize) -> Result<Vec<u8>, FramingError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }
    Ok(FrameBuilder::with_capacity(HEADER_SIZE)
        .write_u32(FRAME_MAGIC)
        .write_u16(FRAME_VERSION)
        .write_u16(0)
        .write_u32(len as u32)
        .build())
}

/// Check a header and return the payload length it announces
pub fn parse_header(header: &[u8]) -> Result<usize, FramingError> {
    let mut reader = FrameReader::new(header);
    let (Some(magic), Some(version), Some(_reserved), Some(len)) =
        (reader.read_u32(), reader.read_u16(), reader.read_u16(), reader.read_u32())
    else {
        return Err(FramingError::ConnectionClosed);
    };
    if magic != FRAME_MAGIC {
        return Err(FramingError::BadMagic(magic));
    }
    if version != FRAME_VERSION {
        return Err(FramingError::UnsupportedVersion(version));
    }
    let len = len as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge(len, MAX_MESSAGE_SIZE));
    }
    Ok(len)
}

/// Read one framed message from a stream
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut header = [0u8; HEADER_SIZE];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FramingError::ConnectionClosed);
        }
        Err(e) => return Err(FramingError::Io(e)),
    }

    let len = parse_header(&header)?;
    if len == 0 {
        return Ok(Vec::new());
    }

    let mut buf = vec![0u8; len];
    match stream.read_exact(&mut buf).await {
        Ok(_) => Ok(buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            Err(FramingError::ConnectionClosed)
        }
        Err(e) => Err(FramingError::Io(e)),
    }
}

/// Write one framed message to a stream
pub async fn write_message<W: AsyncWrite + Unpin>(
    stream: &mut W,
    data: &[u8],
) -> Result<(), FramingError> {
    let header = encode_header(data.len())?;
    stream.write_all(&header).await?;
    stream.write_all(data).await?;
    stream.flush().await?;
    Ok(())
}

/// Frame builder for constructing headers
pub struct FrameBuilder {
    buffer: Vec<u8>,
}

impl FrameBuilder {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Write a u16 (little-endian)
    pub fn write_u16(mut self, value: u16) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Write a u32 (little-endian)
    pub fn write_u32(mut self, value: u32) -> Self {
        self.buffer.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buffer
    }
}

/// Frame reader for parsing headers
pub struct FrameReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Read n bytes
    pub fn read(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.position + n > self.data.len() {
            return None;
        }
        let slice = &self.data[self.position..self.position + n];
        self.position += n;
        Some(slice)
    }

    /// Read a u16 (little-endian)
    pub fn read_u16(&mut self) -> Option<u16> {
        self.read(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a u32 (little-endian)
    pub fn read_u32(&mut self) -> Option<u32> {
        self.read(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn has_remaining(&self) -> bool {
        self.position < self.data.len()
    }
}
