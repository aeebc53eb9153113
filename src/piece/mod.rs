mod store;

pub use store::PieceStore;

use sha1::{Digest, Sha1};
use tracing::{debug, info, warn};

use crate::error::PieceError;

/// Standard request block size (16 KB)
pub const BLOCK_SIZE: u32 = 16 * 1024;

/// Lifecycle of a piece
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PieceState {
    /// Not assigned to any peer
    Pending,
    /// Assigned and receiving data
    InFlight,
    /// All bytes received, hash check running
    Verifying,
    /// Hash verified
    Complete,
    /// Hash check failed; must be reset before reuse
    Failed,
}

/// One content-addressed chunk of the target file.
///
/// Bytes are strictly appended: each write's offset must equal the
/// number of bytes already downloaded. Out-of-order and overlapping
/// writes are rejected rather than reordered.
#[derive(Debug, Clone)]
pub struct Piece {
    index: u32,
    length: usize,
    expected_hash: [u8; 20],
    downloaded: Vec<u8>,
    state: PieceState,
}

impl Piece {
    pub fn new(index: u32, length: usize, expected_hash: [u8; 20]) -> Self {
        // A zero-length piece has nothing to download or verify.
        let state = if length == 0 {
            PieceState::Complete
        } else {
            PieceState::Pending
        };

        Self {
            index,
            length,
            expected_hash,
            downloaded: Vec::new(),
            state,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn state(&self) -> PieceState {
        self.state
    }

    pub fn downloaded_len(&self) -> usize {
        self.downloaded.len()
    }

    pub fn is_complete(&self) -> bool {
        self.state == PieceState::Complete
    }

    pub fn mark_in_flight(&mut self) {
        if self.state == PieceState::Pending {
            self.state = PieceState::InFlight;
        }
    }

    /// Append a downloaded byte range. On reaching the full piece
    /// length the accumulated bytes are hash-verified: a match makes
    /// the piece `Complete`, a mismatch makes it `Failed` and the
    /// caller must `reset` it before it can be downloaded again.
    pub fn download(&mut self, offset: usize, bytes: &[u8]) -> Result<(), PieceError> {
        match self.state {
            PieceState::Pending | PieceState::InFlight => {}
            _ => return Err(PieceError::NotDownloadable(self.index)),
        }

        if offset != self.downloaded.len() {
            return Err(PieceError::OffsetMismatch {
                index: self.index,
                expected: self.downloaded.len(),
                got: offset,
            });
        }

        if offset + bytes.len() > self.length {
            return Err(PieceError::Overflow {
                index: self.index,
                offset,
                write_len: bytes.len(),
                piece_len: self.length,
            });
        }

        self.downloaded.extend_from_slice(bytes);
        debug!(
            "Piece {}: {} bytes at offset {} ({}/{})",
            self.index,
            bytes.len(),
            offset,
            self.downloaded.len(),
            self.length
        );

        if self.downloaded.len() == self.length {
            self.verify()?;
        }

        Ok(())
    }

    /// The next unfetched byte range, bounded by `chunk` bytes.
    /// `None` once the piece has all its bytes.
    pub fn next_range(&self, chunk: u32) -> Option<(u32, u32)> {
        let remaining = self.length - self.downloaded.len();
        if remaining == 0 {
            return None;
        }
        let begin = self.downloaded.len() as u32;
        let length = std::cmp::min(chunk as usize, remaining) as u32;
        Some((begin, length))
    }

    /// Discard downloaded bytes and return the piece to `Pending`.
    pub fn reset(&mut self) {
        self.downloaded.clear();
        self.state = PieceState::Pending;
    }

    /// Return an in-flight piece to `Pending` without discarding its
    /// bytes; a new assignee continues from the current offset.
    pub fn release(&mut self) {
        if self.state == PieceState::InFlight {
            self.state = PieceState::Pending;
        }
    }

    /// The verified piece contents. Empty until `Complete`.
    pub fn bytes(&self) -> &[u8] {
        &self.downloaded
    }

    fn verify(&mut self) -> Result<(), PieceError> {
        self.state = PieceState::Verifying;

        let mut hasher = Sha1::new();
        hasher.update(&self.downloaded);
        let hash = hasher.finalize();

        if hash.as_slice() != self.expected_hash {
            warn!("Piece {} failed hash verification", self.index);
            self.state = PieceState::Failed;
            return Err(PieceError::HashMismatch { index: self.index });
        }

        info!("Piece {} verified and complete", self.index);
        self.state = PieceState::Complete;
        Ok(())
    }
}
