use std::collections::HashSet;

use tracing::info;

use super::{Piece, PieceState};
use crate::error::{ConfigError, PieceError};
use crate::torrent::Pieces;

/// The target file as an ordered sequence of content-addressed pieces.
///
/// Pieces are created once, in index order, from the torrent metadata;
/// every piece has the nominal piece length except the last, which
/// holds the remainder.
#[derive(Debug)]
pub struct PieceStore {
    pieces: Vec<Piece>,
    total_length: u64,
}

impl PieceStore {
    pub fn new(
        total_length: u64,
        piece_length: u64,
        hashes: &Pieces,
    ) -> Result<Self, ConfigError> {
        if piece_length == 0 {
            return Err(ConfigError::InvalidPieceLength(piece_length));
        }

        // Ceiling division; an evenly divisible length gets a full-size
        // last piece, never a spurious empty one.
        let count = ((total_length + piece_length - 1) / piece_length) as usize;

        if hashes.len() != count {
            return Err(ConfigError::HashCountMismatch {
                hashes: hashes.len(),
                pieces: count,
            });
        }

        let mut pieces = Vec::with_capacity(count);
        for (index, hash) in hashes.iter().enumerate() {
            let length = if index == count - 1 {
                (total_length - piece_length * (count as u64 - 1)) as usize
            } else {
                piece_length as usize
            };
            pieces.push(Piece::new(index as u32, length, *hash.as_bytes()));
        }

        info!(
            "Piece store: {} pieces of {} bytes ({} bytes total)",
            count, piece_length, total_length
        );

        Ok(Self {
            pieces,
            total_length,
        })
    }

    pub fn piece(&self, index: u32) -> Option<&Piece> {
        self.pieces.get(index as usize)
    }

    pub fn piece_mut(&mut self, index: u32) -> Result<&mut Piece, PieceError> {
        self.pieces
            .get_mut(index as usize)
            .ok_or(PieceError::UnknownPiece(index))
    }

    /// Route a downloaded byte range to its piece.
    pub fn download(&mut self, index: u32, offset: usize, bytes: &[u8]) -> Result<(), PieceError> {
        self.piece_mut(index)?.download(offset, bytes)
    }

    /// The lowest-index `Pending` piece the peer has declared. This is
    /// the whole scheduling policy; a rarest-first picker would slot in
    /// here.
    pub fn next_pending_for(&self, peer_pieces: &HashSet<u32>) -> Option<u32> {
        self.pieces
            .iter()
            .find(|p| p.state() == PieceState::Pending && peer_pieces.contains(&p.index()))
            .map(|p| p.index())
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    pub fn complete_count(&self) -> usize {
        self.pieces.iter().filter(|p| p.is_complete()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(|p| p.is_complete())
    }

    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    pub fn progress(&self) -> f64 {
        (self.complete_count() as f64 / self.piece_count() as f64) * 100.0
    }

    /// Concatenate every piece in index order. Only legal once the
    /// store is complete.
    pub fn assemble(&self) -> Result<Vec<u8>, PieceError> {
        let mut output = Vec::with_capacity(self.total_length as usize);

        let mut ordered: Vec<&Piece> = self.pieces.iter().collect();
        ordered.sort_by_key(|p| p.index());

        for piece in ordered {
            if !piece.is_complete() {
                return Err(PieceError::NotDownloadable(piece.index()));
            }
            output.extend_from_slice(piece.bytes());
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    fn hashes_for(chunks: &[&[u8]]) -> Pieces {
        let mut raw = Vec::new();
        for chunk in chunks {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            raw.extend_from_slice(&hasher.finalize());
        }
        Pieces::from_bytes(&raw).unwrap()
    }

    fn dummy_hashes(count: usize) -> Pieces {
        Pieces::from_bytes(&vec![0u8; count * 20]).unwrap()
    }

    #[test]
    fn test_partition_exactness() {
        let store = PieceStore::new(1000, 300, &dummy_hashes(4)).unwrap();
        let lengths: Vec<usize> = (0..4).map(|i| store.piece(i).unwrap().length()).collect();
        assert_eq!(lengths, vec![300, 300, 300, 100]);
        assert_eq!(lengths.iter().sum::<usize>() as u64, 1000);
    }

    #[test]
    fn test_evenly_divisible_length() {
        let store = PieceStore::new(900, 300, &dummy_hashes(3)).unwrap();
        assert_eq!(store.piece_count(), 3);
        assert_eq!(store.piece(2).unwrap().length(), 300);
    }

    #[test]
    fn test_hash_count_mismatch() {
        let err = PieceStore::new(1000, 300, &dummy_hashes(5)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::HashCountMismatch {
                hashes: 5,
                pieces: 4
            }
        ));
    }

    #[test]
    fn test_zero_piece_length_rejected() {
        assert!(matches!(
            PieceStore::new(1000, 0, &dummy_hashes(0)),
            Err(ConfigError::InvalidPieceLength(0))
        ));
    }

    #[test]
    fn test_next_pending_is_lowest_index_the_peer_has() {
        let mut store = PieceStore::new(12, 4, &hashes_for(&[b"AAAA", b"BBBB", b"CCCC"])).unwrap();
        let peer_pieces: HashSet<u32> = [1, 2].into_iter().collect();

        assert_eq!(store.next_pending_for(&peer_pieces), Some(1));

        store.download(1, 0, b"BBBB").unwrap();
        assert_eq!(store.next_pending_for(&peer_pieces), Some(2));

        store.piece_mut(2).unwrap().mark_in_flight();
        assert_eq!(store.next_pending_for(&peer_pieces), None);
    }

    #[test]
    fn test_assemble_requires_completion() {
        let mut store = PieceStore::new(8, 4, &hashes_for(&[b"ABCD", b"EFGH"])).unwrap();
        store.download(0, 0, b"ABCD").unwrap();
        assert!(store.assemble().is_err());

        store.download(1, 0, b"EFGH").unwrap();
        assert!(store.is_complete());
        assert_eq!(store.assemble().unwrap(), b"ABCDEFGH");
    }

    #[test]
    fn test_unknown_piece_index() {
        let mut store = PieceStore::new(8, 4, &dummy_hashes(2)).unwrap();
        assert!(matches!(
            store.download(9, 0, b"x"),
            Err(PieceError::UnknownPiece(9))
        ));
    }
}
