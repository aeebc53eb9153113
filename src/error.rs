use thiserror::Error;

/// Errors in the post-handshake wire protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unknown message type id: {0}")]
    UnknownMessageType(u8),

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Invalid handshake: {0}")]
    BadHandshake(String),
}

/// Errors raised by piece assembly and verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PieceError {
    #[error("Piece {index}: write offset {got} does not match downloaded length {expected}")]
    OffsetMismatch {
        index: u32,
        expected: usize,
        got: usize,
    },

    #[error("Piece {index}: {write_len} bytes at offset {offset} exceeds piece length {piece_len}")]
    Overflow {
        index: u32,
        offset: usize,
        write_len: usize,
        piece_len: usize,
    },

    #[error("Piece {index}: hash verification failed")]
    HashMismatch { index: u32 },

    #[error("Unknown piece index: {0}")]
    UnknownPiece(u32),

    #[error("Piece {0} is not accepting data")]
    NotDownloadable(u32),
}

/// Errors scoped to a single peer connection.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Bitfield length mismatch: expected {expected} bytes, got {got}")]
    BitfieldLengthMismatch { expected: usize, got: usize },

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Failed to connect to {addr}: {reason}")]
    ConnectionFailed {
        addr: std::net::SocketAddr,
        reason: String,
    },

    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal startup configuration problems.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Hash count mismatch: {hashes} piece hashes for {pieces} pieces")]
    HashCountMismatch { hashes: usize, pieces: usize },

    #[error("Invalid piece length: {0}")]
    InvalidPieceLength(u64),

    #[error("Torrent length {length} is not reachable from {hashes} pieces of {piece_length} bytes")]
    InconsistentLength {
        length: u64,
        piece_length: u64,
        hashes: usize,
    },

    #[error("Target file already exists: {0}")]
    TargetExists(String),
}

#[derive(Error, Debug)]
pub enum DrizzleError {
    #[error("Bencode parsing error: {0}")]
    BencodeError(String),

    #[error("Invalid torrent file: {0}")]
    InvalidTorrent(String),

    #[error("Tracker error: {0}")]
    TrackerError(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Piece(#[from] PieceError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::string::FromUtf8Error),

    #[error("URL parse error: {0}")]
    UrlParseError(String),

    #[error("Session aborted: {0}")]
    SessionAborted(String),
}

impl From<url::ParseError> for DrizzleError {
    fn from(err: url::ParseError) -> Self {
        DrizzleError::UrlParseError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DrizzleError>;
