use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::error::{DrizzleError, Result};
use crate::peer::ConnectionLimits;
use crate::piece::PieceStore;
use crate::session::Session;
use crate::storage::Storage;
use crate::tracker::{generate_peer_id, TrackerClient, TrackerRequest};

/// Configuration for the client
pub struct ClientConfig {
    pub download_dir: String,
    pub listen_port: u16,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let limits = ConnectionLimits::default();
        Self {
            download_dir: "./downloads".to_string(),
            listen_port: 6881,
            connect_timeout: limits.connect_timeout,
            handshake_timeout: limits.handshake_timeout,
        }
    }
}

/// Top-level torrent client: one download session per invocation
pub struct TorrentClient {
    config: ClientConfig,
    peer_id: [u8; 20],
}

impl TorrentClient {
    pub fn new(config: ClientConfig) -> Self {
        let peer_id = generate_peer_id();
        info!("Client initialized with peer_id: {}", hex::encode(peer_id));

        Self { config, peer_id }
    }

    /// Download a torrent to completion
    pub async fn download(&self, torrent_path: &Path) -> Result<()> {
        info!("Starting download for: {}", torrent_path.display());

        let metainfo = crate::torrent::load_torrent_file(torrent_path).await?;

        info!("Torrent: {}", metainfo.info.name);
        info!("Total size: {} bytes", metainfo.info.total_length);
        info!("Pieces: {}", metainfo.info.pieces.len());
        info!("Info hash: {}", metainfo.info_hash_hex());

        if metainfo.info.files.len() != 1 {
            return Err(DrizzleError::InvalidTorrent(
                "Multi-file torrents are not supported".to_string(),
            ));
        }

        // Startup failures (bad metadata, occupied target) happen here,
        // before any connection is attempted.
        let storage = Storage::prepare(&self.config.download_dir, &metainfo.info.name).await?;
        let store = PieceStore::new(
            metainfo.info.total_length,
            metainfo.info.piece_length,
            &metainfo.info.pieces,
        )?;

        let tracker_client = TrackerClient::new();
        let request = TrackerRequest::new(
            metainfo.info_hash,
            self.peer_id,
            self.config.listen_port,
            metainfo.info.total_length,
        );

        let tracker_response = tracker_client.announce(&metainfo.announce, &request).await?;

        info!(
            "Received {} peers from tracker",
            tracker_response.peers.len()
        );

        let limits = ConnectionLimits {
            connect_timeout: self.config.connect_timeout,
            handshake_timeout: self.config.handshake_timeout,
        };

        let target = storage.target().to_path_buf();
        let mut session = Session::new(metainfo.info_hash, self.peer_id, store, storage, limits);
        session.run(tracker_response.peers).await?;

        info!("Download complete: {}", target.display());
        Ok(())
    }
}

impl Default for TorrentClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
