use bytes::{Buf, BytesMut};
use tracing::trace;

use super::Message;
use crate::error::ProtocolError;

/// Largest frame we will accept. A Piece frame tops out at 9 bytes of
/// header plus one block; a Bitfield for an enormous torrent can be
/// bigger, so the ceiling is deliberately generous. Anything above it
/// is a corrupt length prefix, not a real message.
const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Splits a raw inbound byte stream into complete wire messages.
///
/// One instance per connection. Bytes arrive in arbitrary chunks: a
/// chunk may hold several messages, a fraction of one, or a length
/// prefix cut in half. Whatever does not yet form a complete frame is
/// retained across calls in `pending_tail`.
#[derive(Debug, Default)]
pub struct StreamDemuxer {
    pending_tail: BytesMut,
}

impl StreamDemuxer {
    pub fn new() -> Self {
        Self {
            pending_tail: BytesMut::new(),
        }
    }

    /// Append `chunk` to the buffered tail and drain every complete
    /// message now available, in arrival order. Insufficient bytes are
    /// never an error; the unread remainder (length prefix included)
    /// waits for the next call.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>, ProtocolError> {
        self.pending_tail.extend_from_slice(chunk);

        let mut messages = Vec::new();

        while self.pending_tail.len() >= 4 {
            let length = u32::from_be_bytes([
                self.pending_tail[0],
                self.pending_tail[1],
                self.pending_tail[2],
                self.pending_tail[3],
            ]) as usize;

            if length > MAX_FRAME_LEN {
                return Err(ProtocolError::Malformed(format!(
                    "Frame length {} exceeds maximum {}",
                    length, MAX_FRAME_LEN
                )));
            }

            if self.pending_tail.len() < 4 + length {
                trace!(
                    buffered = self.pending_tail.len(),
                    needed = 4 + length,
                    "Retaining partial frame"
                );
                break;
            }

            self.pending_tail.advance(4);
            let frame = self.pending_tail.split_to(length);
            messages.push(Message::decode_one(&frame)?);
        }

        Ok(messages)
    }

    /// Bytes currently buffered without a complete frame.
    pub fn pending_len(&self) -> usize {
        self.pending_tail.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_frame_buffering() {
        let mut demux = StreamDemuxer::new();

        let first = demux.feed(b"\x00\x00\x00\x03").unwrap();
        assert!(first.is_empty());
        assert_eq!(demux.pending_len(), 4);

        let second = demux.feed(b"\x05\xff\x80").unwrap();
        assert_eq!(
            second,
            vec![Message::Bitfield {
                bits: vec![0xff, 0x80]
            }]
        );
        assert_eq!(demux.pending_len(), 0);
    }

    #[test]
    fn test_two_messages_in_one_chunk() {
        let mut demux = StreamDemuxer::new();
        let messages = demux
            .feed(b"\x00\x00\x00\x03\x05\xff\x80\x00\x00\x00\x01\x01")
            .unwrap();
        assert_eq!(
            messages,
            vec![
                Message::Bitfield {
                    bits: vec![0xff, 0x80]
                },
                Message::Unchoke,
            ]
        );
    }

    #[test]
    fn test_keep_alive() {
        let mut demux = StreamDemuxer::new();
        let messages = demux.feed(b"\x00\x00\x00\x00").unwrap();
        assert_eq!(messages, vec![Message::KeepAlive]);
    }

    #[test]
    fn test_empty_feed_is_noop() {
        let mut demux = StreamDemuxer::new();
        assert!(demux.feed(b"").unwrap().is_empty());
        assert_eq!(demux.pending_len(), 0);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let mut wire = Vec::new();
        wire.extend_from_slice(
            &Message::Bitfield {
                bits: vec![0xff, 0x80],
            }
            .encode(),
        );
        wire.extend_from_slice(&Message::Unchoke.encode());
        wire.extend_from_slice(
            &Message::Piece {
                index: 0,
                begin: 0,
                block: b"ABCD".to_vec(),
            }
            .encode(),
        );
        wire.extend_from_slice(&Message::Have { piece_index: 7 }.encode());

        let expected = vec![
            Message::Bitfield {
                bits: vec![0xff, 0x80],
            },
            Message::Unchoke,
            Message::Piece {
                index: 0,
                begin: 0,
                block: b"ABCD".to_vec(),
            },
            Message::Have { piece_index: 7 },
        ];

        // One shot
        let mut demux = StreamDemuxer::new();
        assert_eq!(demux.feed(&wire).unwrap(), expected);

        // Every two-way split
        for split in 0..=wire.len() {
            let mut demux = StreamDemuxer::new();
            let mut got = demux.feed(&wire[..split]).unwrap();
            got.extend(demux.feed(&wire[split..]).unwrap());
            assert_eq!(got, expected, "split at {}", split);
            assert_eq!(demux.pending_len(), 0);
        }

        // Byte at a time
        let mut demux = StreamDemuxer::new();
        let mut got = Vec::new();
        for byte in &wire {
            got.extend(demux.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(got, expected);
    }

    #[test]
    fn test_length_prefix_split_across_calls() {
        let mut demux = StreamDemuxer::new();
        assert!(demux.feed(b"\x00\x00").unwrap().is_empty());
        assert!(demux.feed(b"\x00\x01").unwrap().is_empty());
        assert_eq!(demux.feed(b"\x02").unwrap(), vec![Message::Interested]);
    }

    #[test]
    fn test_oversized_frame_is_malformed() {
        let mut demux = StreamDemuxer::new();
        let err = demux.feed(b"\xff\xff\xff\xff").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn test_unknown_type_id_propagates() {
        let mut demux = StreamDemuxer::new();
        let err = demux.feed(b"\x00\x00\x00\x01\x63").unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageType(0x63));
    }
}
