//! Length-prefixed frame codec.
//!
//! Every frame is a 12-byte header — `[magic:u32][version:u32][len:u32]`,
//! native-endian as produced by the host — followed by `len` bytes of UTF-8
//! JSON. The receiver validates magic and version before trusting the
//! length, and a zero-byte read at a frame boundary is a graceful
//! end-of-stream, not an error.

use std::io::{Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{io_err, ProtoError};

pub const FRAME_MAGIC: u32 = 0x484C_4F57; // "HLOW"
pub const PROTOCOL_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 12;

/// Upper bound on a single frame payload. Anything larger is a corrupt or
/// hostile header even when magic and version check out.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Assemble a full frame in memory. Nothing is ever written for a payload
/// that fails this step, so a partial frame cannot reach the socket.
fn assemble(payload: &[u8]) -> Result<Vec<u8>, ProtoError> {
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(ProtoError::FrameTooLarge {
            len: payload.len() as u64,
        });
    }
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&FRAME_MAGIC.to_ne_bytes());
    frame.extend_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn parse_header(header: &[u8; HEADER_LEN]) -> Result<usize, ProtoError> {
    let magic = u32::from_ne_bytes([header[0], header[1], header[2], header[3]]);
    if magic != FRAME_MAGIC {
        return Err(ProtoError::BadMagic { found: magic });
    }
    let version = u32::from_ne_bytes([header[4], header[5], header[6], header[7]]);
    if version != PROTOCOL_VERSION {
        return Err(ProtoError::VersionMismatch {
            found: version,
            expected: PROTOCOL_VERSION,
        });
    }
    let len = u32::from_ne_bytes([header[8], header[9], header[10], header[11]]);
    if len > MAX_FRAME_LEN {
        return Err(ProtoError::FrameTooLarge { len: len as u64 });
    }
    Ok(len as usize)
}

// ---------------------------------------------------------------------------
// Blocking I/O (client side)
// ---------------------------------------------------------------------------

pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), ProtoError> {
    let frame = assemble(payload)?;
    writer
        .write_all(&frame)
        .map_err(|e| io_err("frame write", e))?;
    writer.flush().map_err(|e| io_err("frame flush", e))?;
    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly between frames.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtoError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .map_err(|e| io_err("frame header read", e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtoError::Truncated);
        }
        filled += n;
    }

    let len = parse_header(&header)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .map_err(|e| io_err("frame payload read", e))?;
    Ok(Some(payload))
}

// ---------------------------------------------------------------------------
// Async I/O (service side)
// ---------------------------------------------------------------------------

pub async fn write_frame_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ProtoError> {
    let frame = assemble(payload)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| io_err("frame write", e))?;
    writer.flush().await.map_err(|e| io_err("frame flush", e))?;
    Ok(())
}

pub async fn read_frame_async<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ProtoError> {
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = reader
            .read(&mut header[filled..])
            .await
            .map_err(|e| io_err("frame header read", e))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtoError::Truncated);
        }
        filled += n;
    }

    let len = parse_header(&header)?;
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| io_err("frame payload read", e))?;
    Ok(Some(payload))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn roundtrip_arbitrary_bytes() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).expect("write");

        let mut cursor = Cursor::new(wire);
        let back = read_frame(&mut cursor).expect("read").expect("frame");
        assert_eq!(back, payload);
        // Stream is now at a frame boundary: clean EOF.
        assert!(read_frame(&mut cursor).expect("eof").is_none());
    }

    #[test]
    fn multiple_frames_parse_in_sequence() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"first").expect("write");
        write_frame(&mut wire, b"second").expect("write");

        let mut cursor = Cursor::new(wire);
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"second");
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn bad_magic_is_rejected_before_length_is_trusted() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        wire.extend_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
        // A length the receiver must not allocate for.
        wire.extend_from_slice(&u32::MAX.to_ne_bytes());

        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, ProtoError::BadMagic { .. }));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&FRAME_MAGIC.to_ne_bytes());
        wire.extend_from_slice(&99u32.to_ne_bytes());
        wire.extend_from_slice(&0u32.to_ne_bytes());

        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(
            err,
            ProtoError::VersionMismatch {
                found: 99,
                expected: PROTOCOL_VERSION
            }
        ));
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&FRAME_MAGIC.to_ne_bytes());
        wire.extend_from_slice(&PROTOCOL_VERSION.to_ne_bytes());
        wire.extend_from_slice(&(MAX_FRAME_LEN + 1).to_ne_bytes());

        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, ProtoError::FrameTooLarge { .. }));
    }

    #[test]
    fn truncated_header_is_an_error_not_eof() {
        let wire = FRAME_MAGIC.to_ne_bytes()[..3].to_vec();
        let err = read_frame(&mut Cursor::new(wire)).unwrap_err();
        assert!(matches!(err, ProtoError::Truncated));
    }

    #[tokio::test]
    async fn async_and_blocking_codecs_agree() {
        let mut wire = Vec::new();
        write_frame(&mut wire, b"payload").expect("write");

        let mut reader = wire.as_slice();
        let frame = read_frame_async(&mut reader)
            .await
            .expect("read")
            .expect("frame");
        assert_eq!(frame, b"payload");

        let mut async_wire = Vec::new();
        write_frame_async(&mut async_wire, b"payload")
            .await
            .expect("write");
        assert_eq!(async_wire, wire);
    }
}
