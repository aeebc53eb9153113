mod connection;
mod demux;
mod message;
mod protocol;

pub use connection::{spawn_connection, ConnectionLimits, PeerEvent, PeerHandle};
pub use demux::StreamDemuxer;
pub use message::{BlockInfo, Message};
pub use protocol::{Handshake, HANDSHAKE_LEN};

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::error::PeerError;

/// Choke and interest flags, both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    /// Whether we are choking the peer
    pub am_choking: bool,
    /// Whether we are interested in the peer
    pub am_interested: bool,
    /// Whether the peer is choking us
    pub peer_choking: bool,
    /// Whether the peer is interested in us
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

/// Everything the session tracks about one remote peer. Mutated only
/// from the session's event loop.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    /// Remote id from the verified handshake
    pub peer_id: Option<[u8; 20]>,
    pub hands_shook: bool,
    pub state: PeerState,
    /// Pieces the peer has declared via Bitfield and Have
    pub has_pieces: HashSet<u32>,
    /// The piece currently assigned to this peer, if any
    pub assigned_piece: Option<u32>,
}

impl Peer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            peer_id: None,
            hands_shook: false,
            state: PeerState::default(),
            has_pieces: HashSet::new(),
            assigned_piece: None,
        }
    }

    /// Record the peer's declared piece set from a Bitfield payload.
    ///
    /// Bits are MSB first: the leftmost bit of the leftmost byte is
    /// piece 0. The payload must be exactly `ceil(num_pieces / 8)`
    /// bytes; anything else means the declared set is garbage and the
    /// connection must be dropped.
    pub fn apply_bitfield(&mut self, bits: &[u8], num_pieces: u32) -> Result<(), PeerError> {
        let expected = (num_pieces as usize + 7) / 8;
        if bits.len() != expected {
            return Err(PeerError::BitfieldLengthMismatch {
                expected,
                got: bits.len(),
            });
        }

        for piece_index in 0..num_pieces {
            let byte_index = (piece_index / 8) as usize;
            let bit_index = 7 - (piece_index % 8);
            if (bits[byte_index] >> bit_index) & 1 == 1 {
                self.has_pieces.insert(piece_index);
            }
        }

        Ok(())
    }

    pub fn record_have(&mut self, piece_index: u32) {
        self.has_pieces.insert(piece_index);
    }

    pub fn has_piece(&self, piece_index: u32) -> bool {
        self.has_pieces.contains(&piece_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> Peer {
        Peer::new("127.0.0.1:6881".parse().unwrap())
    }

    #[test]
    fn test_default_state_is_choked_uninterested() {
        let state = PeerState::default();
        assert!(state.am_choking);
        assert!(state.peer_choking);
        assert!(!state.am_interested);
        assert!(!state.peer_interested);
    }

    #[test]
    fn test_bitfield_bit_order() {
        // 01000001 11000000 00100100
        let mut p = peer();
        p.apply_bitfield(b"A\xc0$", 23).unwrap();
        let expected: HashSet<u32> = [1, 7, 8, 9, 18, 21].into_iter().collect();
        assert_eq!(p.has_pieces, expected);
    }

    #[test]
    fn test_bitfield_single_byte() {
        let mut p = peer();
        p.apply_bitfield(b"\x01", 8).unwrap();
        assert_eq!(p.has_pieces, [7u32].into_iter().collect());

        let mut p = peer();
        p.apply_bitfield(b"\xc0", 2).unwrap();
        assert_eq!(p.has_pieces, [0u32, 1].into_iter().collect());
    }

    #[test]
    fn test_bitfield_length_mismatch() {
        let mut p = peer();
        let err = p.apply_bitfield(b"\xff\xff", 23).unwrap_err();
        assert!(matches!(
            err,
            PeerError::BitfieldLengthMismatch {
                expected: 3,
                got: 2
            }
        ));
        assert!(p.has_pieces.is_empty());
    }

    #[test]
    fn test_have_accumulates() {
        let mut p = peer();
        p.record_have(4);
        p.record_have(11);
        assert!(p.has_piece(4));
        assert!(p.has_piece(11));
        assert!(!p.has_piece(5));
    }
}
