//! Length prefixed wire framing.
//!
//! Every envelope is written as:
//!
//! ```text
//! ┌─────┬──────────────┬────────────────────────┬─────────────┐
//! │ tag │ len: i16 BE  │ len: i32 BE (if -1)    │ payload     │
//! │ 1 B │ 2 B          │ 4 B                    │ len bytes   │
//! └─────┴──────────────┴────────────────────────┴─────────────┘
//! ```
//!
//! Payloads up to [`MAX_SHORT_LEN`] bytes carry their length in the 16 bit field. Longer payloads write
//! [`LARGE_LEN_ESCAPE`] there and follow it with the real length as a 32 bit integer. There is no handshake,
//! version byte, checksum or compression: the first bytes on a fresh socket are already a frame.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// The largest payload length that fits in the short length field.
pub const MAX_SHORT_LEN: usize = i16::MAX as usize;

/// The value written to the short length field when the payload is too large for it.
pub const LARGE_LEN_ESCAPE: i16 = -1;

/// The largest payload length that can be framed at all.
pub const MAX_LONG_LEN: usize = i32::MAX as usize;

/// The size of the longest possible frame header.
pub const MAX_HEADER_LEN: usize = 7;

const SHORT_HEADER_LEN: usize = 3;

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// The caller supplied sequence tag.
    pub tag: u8,
    /// The raw payload.
    pub payload: Bytes,
}

/// Returns the length of the header preceding a payload of `payload_len` bytes.
pub const fn header_len(payload_len: usize) -> usize {
    if payload_len > MAX_SHORT_LEN {
        MAX_HEADER_LEN
    } else {
        SHORT_HEADER_LEN
    }
}

/// Writes the header for a payload of `payload_len` bytes into `dst`.
///
/// Fails with [`io::ErrorKind::InvalidInput`] if the payload is longer than [`MAX_LONG_LEN`].
pub fn encode_header<B: BufMut>(tag: u8, payload_len: usize, dst: &mut B) -> io::Result<()> {
    if payload_len > MAX_LONG_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("payload of {payload_len} bytes is too large to frame"),
        ));
    }

    dst.put_u8(tag);
    if payload_len > MAX_SHORT_LEN {
        dst.put_i16(LARGE_LEN_ESCAPE);
        dst.put_i32(payload_len as i32);
    } else {
        dst.put_i16(payload_len as i16);
    }

    Ok(())
}

/// Writes a complete frame into `dst`.
pub fn encode<B: BufMut>(tag: u8, payload: &[u8], dst: &mut B) -> io::Result<()> {
    encode_header(tag, payload.len(), dst)?;
    dst.put_slice(payload);
    Ok(())
}

/// Writes a complete frame to `writer`.
///
/// The frame is not flushed.
pub async fn write_frame<W>(writer: &mut W, tag: u8, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut header = [0u8; MAX_HEADER_LEN];
    let len = header_len(payload.len());
    encode_header(tag, payload.len(), &mut &mut header[..])?;

    writer.write_all(&header[..len]).await?;
    writer.write_all(payload).await
}

/// Attempts to decode one frame from the front of `src`.
///
/// Returns `Ok(None)` when `src` does not yet hold a whole frame, in which case nothing is consumed.
///
/// The announced length is trusted, so a peer can make `src` reserve up to [`MAX_LONG_LEN`] bytes. Use
/// [`decode_with_limit`] when reading from an untrusted peer.
pub fn decode(src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
    decode_with_limit(src, MAX_LONG_LEN)
}

/// Like [`decode`], but fails with [`FrameError::TooLarge`] once a header announces more than `max_len` payload
/// bytes. Nothing is reserved or consumed in that case.
pub fn decode_with_limit(src: &mut BytesMut, max_len: usize) -> Result<Option<Frame>, FrameError> {
    if src.len() < SHORT_HEADER_LEN {
        return Ok(None);
    }

    let tag = src[0];
    let (header_len, payload_len) = match i16::from_be_bytes([src[1], src[2]]) {
        LARGE_LEN_ESCAPE => {
            if src.len() < MAX_HEADER_LEN {
                return Ok(None);
            }
            let len = i32::from_be_bytes([src[3], src[4], src[5], src[6]]);
            if len < 0 {
                return Err(FrameError::InvalidLongLength(len));
            }
            (MAX_HEADER_LEN, len as usize)
        }
        len if len < 0 => return Err(FrameError::InvalidShortLength(len)),
        len => (SHORT_HEADER_LEN, len as usize),
    };
    check_len(payload_len, max_len)?;

    let frame_len = header_len + payload_len;
    if src.len() < frame_len {
        src.reserve(frame_len - src.len());
        return Ok(None);
    }

    src.advance(header_len);
    let payload = src.split_to(payload_len).freeze();
    Ok(Some(Frame { tag, payload }))
}

/// Reads one frame from `reader`.
///
/// Returns `Ok(None)` if the stream ends cleanly on a frame boundary.
///
/// The payload buffer is allocated up front from the announced length, up to [`MAX_LONG_LEN`] bytes. Use
/// [`read_frame_with_limit`] when reading from an untrusted peer.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    read_frame_with_limit(reader, MAX_LONG_LEN).await
}

/// Like [`read_frame`], but fails with [`FrameError::TooLarge`] before allocating once a header announces more
/// than `max_len` payload bytes.
pub async fn read_frame_with_limit<R>(reader: &mut R, max_len: usize) -> Result<Option<Frame>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(FrameError::Io(err)),
    };

    let len = match reader.read_i16().await? {
        LARGE_LEN_ESCAPE => {
            let len = reader.read_i32().await?;
            if len < 0 {
                return Err(FrameError::InvalidLongLength(len));
            }
            len as usize
        }
        len if len < 0 => return Err(FrameError::InvalidShortLength(len)),
        len => len as usize,
    };
    check_len(len, max_len)?;

    let mut payload = vec![0; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(Frame {
        tag,
        payload: payload.into(),
    }))
}

fn check_len(len: usize, max: usize) -> Result<(), FrameError> {
    if len > max {
        return Err(FrameError::TooLarge { len, max });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn short_header_layout() {
        let mut buf = BytesMut::new();
        encode(7, &[0xAA, 0xBB], &mut buf).unwrap();
        assert_eq!(&buf[..], &[7, 0x00, 0x02, 0xAA, 0xBB]);
    }

    #[test]
    fn boundary_lengths_use_the_expected_header() {
        let mut buf = BytesMut::new();
        encode_header(1, MAX_SHORT_LEN, &mut buf).unwrap();
        assert_eq!(&buf[..], &[1, 0x7F, 0xFF]);

        let mut buf = BytesMut::new();
        encode_header(2, MAX_SHORT_LEN + 1, &mut buf).unwrap();
        assert_eq!(&buf[..], &[2, 0xFF, 0xFF, 0x00, 0x00, 0x80, 0x00]);

        let mut buf = BytesMut::new();
        encode_header(3, 1_000_000, &mut buf).unwrap();
        assert_eq!(&buf[..], &[3, 0xFF, 0xFF, 0x00, 0x0F, 0x42, 0x40]);
    }

    #[test]
    fn decode_recovers_tag_and_payload() {
        for len in [0, 1, MAX_SHORT_LEN, MAX_SHORT_LEN + 1, 1_000_000] {
            let original = payload(len);
            let tag = (len % 256) as u8;

            let mut buf = BytesMut::new();
            encode(tag, &original, &mut buf).unwrap();
            assert_eq!(buf.len(), header_len(len) + len);

            let frame = decode(&mut buf).unwrap().expect("whole frame");
            assert_eq!(frame.tag, tag);
            assert_eq!(frame.payload, original);
            assert!(buf.is_empty());
        }
    }

    #[test]
    fn decode_waits_for_a_whole_frame() {
        let mut full = BytesMut::new();
        encode(9, &payload(40_000), &mut full).unwrap();

        for cut in [0, 2, 3, 6, 7, full.len() - 1] {
            let mut partial = BytesMut::from(&full[..cut]);
            assert!(decode(&mut partial).unwrap().is_none());
            assert_eq!(partial.len(), cut);
        }
    }

    #[test]
    fn decode_consumes_consecutive_frames() {
        let mut buf = BytesMut::new();
        encode(1, b"first", &mut buf).unwrap();
        encode(2, b"", &mut buf).unwrap();
        encode(3, b"third", &mut buf).unwrap();

        let tags: Vec<_> = std::iter::from_fn(|| decode(&mut buf).unwrap())
            .map(|frame| frame.tag)
            .collect();
        assert_eq!(tags, [1, 2, 3]);
    }

    #[test]
    fn decode_rejects_negative_lengths() {
        let mut buf = BytesMut::from(&[0u8, 0xFF, 0xFE][..]);
        assert!(matches!(
            decode(&mut buf),
            Err(FrameError::InvalidShortLength(-2))
        ));

        let mut buf = BytesMut::from(&[0u8, 0xFF, 0xFF, 0x80, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            decode(&mut buf),
            Err(FrameError::InvalidLongLength(i32::MIN))
        ));
    }

    #[test]
    fn decode_with_limit_rejects_oversized_headers_before_reserving() {
        let mut buf = BytesMut::from(&[4u8, 0xFF, 0xFF, 0x7F, 0xFF, 0xFF, 0xFF][..]);
        let capacity = buf.capacity();
        assert!(matches!(
            decode_with_limit(&mut buf, 1024),
            Err(FrameError::TooLarge {
                len: MAX_LONG_LEN,
                max: 1024
            })
        ));
        assert_eq!(buf.len(), MAX_HEADER_LEN);
        assert_eq!(buf.capacity(), capacity);

        let mut buf = BytesMut::new();
        encode(5, &payload(1024), &mut buf).unwrap();
        let frame = decode_with_limit(&mut buf, 1024).unwrap().expect("whole frame");
        assert_eq!(frame.payload.len(), 1024);
    }

    #[tokio::test]
    async fn read_frame_with_limit_rejects_oversized_headers() {
        let mut wire = Vec::new();
        encode(1, &payload(16), &mut wire).unwrap();
        encode(2, &payload(MAX_SHORT_LEN + 1), &mut wire).unwrap();

        let mut reader = &wire[..];
        let frame = read_frame_with_limit(&mut reader, 16).await.unwrap().expect("frame");
        assert_eq!(frame.tag, 1);
        assert!(matches!(
            read_frame_with_limit(&mut reader, 16).await,
            Err(FrameError::TooLarge { len, max: 16 }) if len == MAX_SHORT_LEN + 1
        ));
    }

    #[tokio::test]
    async fn write_frame_emits_header_then_payload() {
        let mut writer = tokio_test::io::Builder::new()
            .write(&[5, 0x00, 0x03])
            .write(b"abc")
            .build();
        write_frame(&mut writer, 5, b"abc").await.unwrap();

        let large = payload(MAX_SHORT_LEN + 1);
        let mut writer = tokio_test::io::Builder::new()
            .write(&[6, 0xFF, 0xFF, 0x00, 0x00, 0x80, 0x00])
            .write(&large)
            .build();
        write_frame(&mut writer, 6, &large).await.unwrap();
    }

    #[tokio::test]
    async fn read_frame_applies_the_inverse_rule() {
        let mut wire = Vec::new();
        for len in [0, 1, MAX_SHORT_LEN, MAX_SHORT_LEN + 1, 1_000_000] {
            encode((len % 7) as u8, &payload(len), &mut wire).unwrap();
        }

        let mut reader = &wire[..];
        for len in [0, 1, MAX_SHORT_LEN, MAX_SHORT_LEN + 1, 1_000_000] {
            let frame = read_frame(&mut reader).await.unwrap().expect("frame");
            assert_eq!(frame.tag, (len % 7) as u8);
            assert_eq!(frame.payload, payload(len));
        }
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_frame_reports_truncation() {
        let mut wire = Vec::new();
        encode(1, b"hello", &mut wire).unwrap();
        wire.truncate(wire.len() - 2);

        let mut reader = &wire[..];
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(FrameError::Truncated)
        ));
    }
}
