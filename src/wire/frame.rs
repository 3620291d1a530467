//! Framing for gossip envelopes.
//!
//! A CBOR envelope never crosses a socket bare: it rides in a frame of
//! u32 LE payload length, u32 LE crc32c, payload. The length word is
//! held to the configured frame cap on both sides - a node must never
//! emit a frame its peers are bound to refuse, and a receiver must
//! never allocate on a peer's say-so. The checksum catches corruption
//! before the envelope decoder sees the bytes. Any frame-level failure
//! leaves the stream position unusable, so callers drop the
//! connection; malformed CBOR inside an intact frame is the envelope
//! decoder's business, not ours.

use std::io::{ErrorKind, Read, Write};

use crc32c::crc32c;
use thiserror::Error;

/// Length word plus checksum word.
pub const HEADER_BYTES: usize = 8;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("gossip frame truncated while reading its {context}")]
    Truncated { context: &'static str },
    #[error("zero-length gossip frame; an envelope is never empty")]
    Empty,
    #[error("gossip frame of {got} bytes exceeds the {limit}-byte cap")]
    Oversize { limit: usize, got: usize },
    #[error(
        "gossip frame checksum mismatch: header says {expected:#010x}, payload hashes to {got:#010x}"
    )]
    ChecksumMismatch { expected: u32, got: u32 },
}

pub struct FrameReader<R> {
    inner: R,
    limit: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R, limit: usize) -> Self {
        Self { inner, limit }
    }

    /// Next framed envelope payload, or `None` when the peer closed
    /// the stream between frames.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(header) = self.read_header()? else {
            return Ok(None);
        };

        let mut word = [0u8; 4];
        word.copy_from_slice(&header[..4]);
        let length = u32::from_le_bytes(word) as usize;
        word.copy_from_slice(&header[4..]);
        let expected = u32::from_le_bytes(word);

        if length == 0 {
            return Err(FrameError::Empty);
        }
        if length > self.limit {
            return Err(FrameError::Oversize {
                limit: self.limit,
                got: length,
            });
        }

        let mut payload = vec![0u8; length];
        self.inner
            .read_exact(&mut payload)
            .map_err(|err| truncated(err, "payload"))?;

        let got = crc32c(&payload);
        if got != expected {
            return Err(FrameError::ChecksumMismatch { expected, got });
        }
        Ok(Some(payload))
    }

    /// Read the 8-byte header, distinguishing a clean close (no bytes
    /// at all) from a torn one.
    fn read_header(&mut self) -> Result<Option<[u8; HEADER_BYTES]>, FrameError> {
        let mut header = [0u8; HEADER_BYTES];
        let mut first = [0u8; 1];
        loop {
            match self.inner.read(&mut first) {
                Ok(0) => return Ok(None),
                Ok(_) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
        header[0] = first[0];
        self.inner
            .read_exact(&mut header[1..])
            .map_err(|err| truncated(err, "header"))?;
        Ok(Some(header))
    }
}

fn truncated(err: std::io::Error, context: &'static str) -> FrameError {
    if err.kind() == ErrorKind::UnexpectedEof {
        FrameError::Truncated { context }
    } else {
        FrameError::Io(err)
    }
}

pub struct FrameWriter<W> {
    inner: W,
    limit: usize,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W, limit: usize) -> Self {
        Self { inner, limit }
    }

    pub fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let header = frame_header(payload, self.limit)?;
        self.inner.write_all(&header)?;
        self.inner.write_all(payload)?;
        self.inner.flush()?;
        Ok(())
    }
}

/// Header for `payload`, enforcing the cap on the sending side too.
pub fn frame_header(payload: &[u8], limit: usize) -> Result<[u8; HEADER_BYTES], FrameError> {
    if payload.is_empty() {
        return Err(FrameError::Empty);
    }
    if payload.len() > limit {
        return Err(FrameError::Oversize {
            limit,
            got: payload.len(),
        });
    }
    let length = u32::try_from(payload.len()).map_err(|_| FrameError::Oversize {
        limit,
        got: payload.len(),
    })?;

    let mut header = [0u8; HEADER_BYTES];
    header[..4].copy_from_slice(&length.to_le_bytes());
    header[4..].copy_from_slice(&crc32c(payload).to_le_bytes());
    Ok(header)
}

/// A complete frame in one buffer, for one-shot writes and tests.
pub fn frame_bytes(payload: &[u8], limit: usize) -> Result<Vec<u8>, FrameError> {
    let header = frame_header(payload, limit)?;
    let mut frame = Vec::with_capacity(HEADER_BYTES + payload.len());
    frame.extend_from_slice(&header);
    frame.extend_from_slice(payload);
    Ok(frame)
}
