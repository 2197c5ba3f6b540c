//! Length-prefixed framing for [`Event`]s.
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! |  body length (u32, big-endian)    | JSON body |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! The prefix keeps the stream in sync: a body that fails to decode as an
//! event costs exactly one frame. Only an over-limit length prefix is fatal,
//! since the reader cannot know where the next frame starts.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::{Event, WireError};

/// Default maximum frame body size (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Size of the length prefix in bytes.
pub const LENGTH_FIELD_SIZE: usize = 4;

/// One self-delimited unit on the wire, holding exactly one event body.
///
/// The relay forwards frames verbatim, so the raw body is kept alongside
/// (rather than replaced by) the decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    body: Bytes,
}

impl Frame {
    /// Encode an event into a frame.
    pub fn from_event(event: &Event) -> Result<Self, WireError> {
        Ok(Self {
            body: Bytes::from(event.to_bytes()?),
        })
    }

    /// Wrap a raw body (no length prefix).
    pub fn from_body(body: impl Into<Bytes>) -> Self {
        Self { body: body.into() }
    }

    /// Decode the body into an event.
    pub fn event(&self) -> Result<Event, WireError> {
        Event::from_bytes(&self.body)
    }

    /// The raw body bytes.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// The complete wire bytes: length prefix followed by the body.
    pub fn to_wire_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(LENGTH_FIELD_SIZE + self.body.len());
        buf.put_u32(self.body.len() as u32);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// tokio-util codec producing and consuming [`Frame`]s.
///
/// Use with `Framed`, `FramedRead` or `FramedWrite`. The length prefix stays
/// in the buffer until the whole body has arrived, so the limit is checked
/// against the real header however the bytes are split across reads.
#[derive(Debug, Clone)]
pub struct EventCodec {
    max_frame_size: usize,
}

impl EventCodec {
    /// Codec with the default size limit.
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Codec with a custom size limit.
    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured size limit.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for EventCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EventCodec {
    type Item = Frame;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if size > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size,
                limit: self.max_frame_size,
            });
        }

        let total = LENGTH_FIELD_SIZE + size;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        Ok(Some(Frame {
            body: src.split_to(size).freeze(),
        }))
    }
}

impl Encoder<Frame> for EventCodec {
    type Error = WireError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.len() > self.max_frame_size {
            return Err(WireError::FrameTooLarge {
                size: frame.len(),
                limit: self.max_frame_size,
            });
        }
        dst.reserve(LENGTH_FIELD_SIZE + frame.len());
        dst.put_u32(frame.len() as u32);
        dst.put_slice(&frame.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClientId;
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn broadcast(text: &str) -> Event {
        Event::Broadcast {
            sender: ClientId::random(),
            text: text.into(),
        }
    }

    #[test]
    fn wire_bytes_carry_big_endian_length() {
        let frame = Frame::from_body(&b"{}"[..]);
        let wire = frame.to_wire_bytes();
        assert_eq!(&wire[..4], &[0, 0, 0, 2]);
        assert_eq!(&wire[4..], b"{}");
    }

    #[test]
    fn decoder_waits_for_complete_frame() {
        let frame = Frame::from_event(&broadcast("hello")).unwrap();
        let wire = frame.to_wire_bytes();
        let mut codec = EventCodec::new();

        let mut buf = BytesMut::from(&wire[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[3..wire.len() - 1]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&wire[wire.len() - 1..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn body_split_after_header_still_decodes() {
        let frame = Frame::from_event(&broadcast("split across reads")).unwrap();
        let wire = frame.to_wire_bytes();
        let mut codec = EventCodec::new();

        // Header plus the start of the body, then the rest.
        let mut buf = BytesMut::from(&wire[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(frame));
        assert!(buf.is_empty());
    }

    #[test]
    fn byte_at_a_time_decodes() {
        let frame = Frame::from_event(&broadcast("one byte per read")).unwrap();
        let wire = frame.to_wire_bytes();
        let mut codec = EventCodec::with_max_size(wire.len());
        let mut buf = BytesMut::new();

        for (i, byte) in wire.iter().enumerate() {
            buf.put_u8(*byte);
            let decoded = codec.decode(&mut buf).unwrap();
            if i + 1 < wire.len() {
                assert!(decoded.is_none());
            } else {
                assert_eq!(decoded, Some(frame.clone()));
            }
        }
    }

    #[test]
    fn two_frames_in_one_read_decode_separately() {
        let first = Frame::from_event(&broadcast("one")).unwrap();
        let second = Frame::from_event(&broadcast("two")).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first.to_wire_bytes());
        buf.extend_from_slice(&second.to_wire_bytes());

        let mut codec = EventCodec::new();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(first));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(second));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn malformed_body_does_not_desync_stream() {
        let good = Frame::from_event(&broadcast("after garbage")).unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::from_body(&b"{not json"[..]).to_wire_bytes());
        buf.extend_from_slice(&good.to_wire_bytes());

        let mut codec = EventCodec::new();
        let bad = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(bad.event(), Err(WireError::MalformedFrame(_))));

        let next = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.event().unwrap(), good.event().unwrap());
    }

    #[test]
    fn oversized_header_is_rejected() {
        let mut codec = EventCodec::with_max_size(16);
        let mut buf = BytesMut::new();
        buf.put_u32(17);
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { size: 17, limit: 16 }));
    }

    #[test]
    fn oversized_frame_is_not_encoded() {
        let mut codec = EventCodec::with_max_size(4);
        let mut dst = BytesMut::new();
        let err = codec
            .encode(Frame::from_body(&b"too long"[..]), &mut dst)
            .unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { .. }));
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn framed_stream_preserves_boundaries() {
        let (client, server) = tokio::io::duplex(64);
        let mut writer = FramedWrite::new(client, EventCodec::new());
        let mut reader = FramedRead::new(server, EventCodec::new());

        // Larger than the duplex buffer, so the body is split across writes.
        let long = "x".repeat(500);
        let events = vec![broadcast("short"), broadcast(&long), broadcast("")];

        let sent = events.clone();
        let send_task = tokio::spawn(async move {
            for event in sent {
                writer.send(Frame::from_event(&event).unwrap()).await.unwrap();
            }
        });

        for expected in events {
            let frame = reader.next().await.unwrap().unwrap();
            assert_eq!(frame.event().unwrap(), expected);
        }
        send_task.await.unwrap();
    }
}
