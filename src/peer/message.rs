use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// A block request range within a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Piece index
    pub index: u32,
    /// Byte offset within the piece
    pub begin: u32,
    /// Length of the block
    pub length: u32,
}

impl BlockInfo {
    pub fn new(index: u32, begin: u32, length: u32) -> Self {
        Self {
            index,
            begin,
            length,
        }
    }
}

/// Messages exchanged between peers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Keep-alive message (zero-length frame, no type id)
    KeepAlive,
    /// Peer is throttling us
    Choke,
    /// Peer has stopped throttling us
    Unchoke,
    /// Indicate interest
    Interested,
    /// Indicate lack of interest
    NotInterested,
    /// Peer announces possession of one piece
    Have { piece_index: u32 },
    /// Peer declares its full piece set, one bit per piece, MSB first
    Bitfield { bits: Vec<u8> },
    /// Request a block
    Request { block: BlockInfo },
    /// Deliver a block
    Piece {
        index: u32,
        begin: u32,
        block: Vec<u8>,
    },
}

impl Message {
    /// Message type IDs
    const CHOKE: u8 = 0;
    const UNCHOKE: u8 = 1;
    const INTERESTED: u8 = 2;
    const NOT_INTERESTED: u8 = 3;
    const HAVE: u8 = 4;
    const BITFIELD: u8 = 5;
    const REQUEST: u8 = 6;
    const PIECE: u8 = 7;

    /// Serialize message to wire bytes
    /// Format: <4-byte big-endian length prefix><message ID><payload>
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();

        match self {
            Message::KeepAlive => {
                buf.put_u32(0); // length = 0, no id byte
            }
            Message::Choke => {
                buf.put_u32(1);
                buf.put_u8(Self::CHOKE);
            }
            Message::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(Self::UNCHOKE);
            }
            Message::Interested => {
                buf.put_u32(1);
                buf.put_u8(Self::INTERESTED);
            }
            Message::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(Self::NOT_INTERESTED);
            }
            Message::Have { piece_index } => {
                buf.put_u32(5); // length = 1 + 4
                buf.put_u8(Self::HAVE);
                buf.put_u32(*piece_index);
            }
            Message::Bitfield { bits } => {
                buf.put_u32((1 + bits.len()) as u32);
                buf.put_u8(Self::BITFIELD);
                buf.put_slice(bits);
            }
            Message::Request { block } => {
                buf.put_u32(13); // length = 1 + 4 + 4 + 4
                buf.put_u8(Self::REQUEST);
                buf.put_u32(block.index);
                buf.put_u32(block.begin);
                buf.put_u32(block.length);
            }
            Message::Piece {
                index,
                begin,
                block,
            } => {
                buf.put_u32((9 + block.len()) as u32);
                buf.put_u8(Self::PIECE);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
        }

        buf.to_vec()
    }

    /// Deserialize exactly one message from its framed contents:
    /// the type id byte followed by the payload, length prefix already
    /// stripped. An empty slice is a keep-alive.
    pub fn decode_one(mut data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let message_id = data.get_u8();

        match message_id {
            Self::CHOKE => Ok(Message::Choke),
            Self::UNCHOKE => Ok(Message::Unchoke),
            Self::INTERESTED => Ok(Message::Interested),
            Self::NOT_INTERESTED => Ok(Message::NotInterested),
            Self::HAVE => {
                if data.len() < 4 {
                    return Err(ProtocolError::Malformed(
                        "Have payload shorter than 4 bytes".to_string(),
                    ));
                }
                let piece_index = data.get_u32();
                Ok(Message::Have { piece_index })
            }
            Self::BITFIELD => Ok(Message::Bitfield {
                bits: data.to_vec(),
            }),
            Self::REQUEST => {
                if data.len() < 12 {
                    return Err(ProtocolError::Malformed(
                        "Request payload shorter than 12 bytes".to_string(),
                    ));
                }
                let index = data.get_u32();
                let begin = data.get_u32();
                let length = data.get_u32();
                Ok(Message::Request {
                    block: BlockInfo::new(index, begin, length),
                })
            }
            Self::PIECE => {
                if data.len() < 8 {
                    return Err(ProtocolError::Malformed(
                        "Piece payload shorter than 8 bytes".to_string(),
                    ));
                }
                let index = data.get_u32();
                let begin = data.get_u32();
                Ok(Message::Piece {
                    index,
                    begin,
                    block: data.to_vec(),
                })
            }
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: Message) {
        let bytes = message.encode();
        // Strip the 4-byte length prefix before handing to decode_one
        let decoded = Message::decode_one(&bytes[4..]).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_keep_alive_is_zero_length_frame() {
        assert_eq!(Message::KeepAlive.encode(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_flag_message_encoding() {
        assert_eq!(Message::Choke.encode(), vec![0, 0, 0, 1, 0]);
        assert_eq!(Message::Unchoke.encode(), vec![0, 0, 0, 1, 1]);
        assert_eq!(Message::Interested.encode(), vec![0, 0, 0, 1, 2]);
        assert_eq!(Message::NotInterested.encode(), vec![0, 0, 0, 1, 3]);
    }

    #[test]
    fn test_request_encoding() {
        let msg = Message::Request {
            block: BlockInfo::new(1, 16384, 16384),
        };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), 4 + 13);
        assert_eq!(&bytes[..5], &[0, 0, 0, 13, 6]);
        roundtrip(msg);
    }

    #[test]
    fn test_piece_roundtrip() {
        roundtrip(Message::Piece {
            index: 3,
            begin: 32768,
            block: vec![0xab; 100],
        });
    }

    #[test]
    fn test_have_and_bitfield_roundtrip() {
        roundtrip(Message::Have { piece_index: 42 });
        roundtrip(Message::Bitfield {
            bits: vec![0xff, 0x80],
        });
    }

    #[test]
    fn test_unknown_message_type() {
        let err = Message::decode_one(&[9]).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownMessageType(9));
    }

    #[test]
    fn test_truncated_payload_is_malformed() {
        assert!(matches!(
            Message::decode_one(&[4, 0, 0]),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            Message::decode_one(&[6, 0, 0, 0, 1]),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
