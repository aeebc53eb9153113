use std::path::{Path, PathBuf};

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::{ConfigError, Result};
use crate::piece::PieceStore;

/// File I/O for the finished download. The output artifact is a single
/// file holding all pieces concatenated in index order.
#[derive(Debug)]
pub struct Storage {
    target: PathBuf,
}

impl Storage {
    /// Resolve and reserve the target path. Refusing an existing file
    /// happens here, before any session state is created.
    pub async fn prepare<P: AsRef<Path>>(download_dir: P, file_name: &str) -> Result<Self> {
        let download_dir = download_dir.as_ref().to_path_buf();
        fs::create_dir_all(&download_dir).await?;

        let target = download_dir.join(file_name);
        if fs::try_exists(&target).await? {
            return Err(ConfigError::TargetExists(target.display().to_string()).into());
        }

        Ok(Self { target })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Write every verified piece to the target file. Callers must not
    /// invoke this until the store is complete.
    pub async fn write_out(&self, store: &PieceStore) -> Result<()> {
        let contents = store.assemble()?;

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&self.target)
            .await?;

        file.write_all(&contents).await?;
        file.flush().await?;

        info!(
            "Wrote {} bytes to {}",
            contents.len(),
            self.target.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torrent::Pieces;
    use sha1::{Digest, Sha1};

    fn completed_store() -> PieceStore {
        let mut raw = Vec::new();
        for chunk in [b"ABCD", b"EFGH"] {
            let mut hasher = Sha1::new();
            hasher.update(chunk);
            raw.extend_from_slice(&hasher.finalize());
        }
        let hashes = Pieces::from_bytes(&raw).unwrap();
        let mut store = PieceStore::new(8, 4, &hashes).unwrap();
        store.download(0, 0, b"ABCD").unwrap();
        store.download(1, 0, b"EFGH").unwrap();
        store
    }

    #[tokio::test]
    async fn test_write_out_concatenates_pieces() {
        let dir = std::env::temp_dir().join(format!("drizzle-test-{}", std::process::id()));
        let storage = Storage::prepare(&dir, "out.bin").await.unwrap();
        storage.write_out(&completed_store()).await.unwrap();

        let written = tokio::fs::read(storage.target()).await.unwrap();
        assert_eq!(written, b"ABCDEFGH");

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_existing_target_rejected() {
        let dir = std::env::temp_dir().join(format!("drizzle-test-exists-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        tokio::fs::write(dir.join("taken.bin"), b"old").await.unwrap();

        let err = Storage::prepare(&dir, "taken.bin").await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::DrizzleError::Config(ConfigError::TargetExists(_))
        ));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
