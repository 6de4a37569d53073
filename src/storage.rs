use crate::chord::types::FileId;
use crate::error::TransferError;
use bytes::Bytes;
use log::debug;
use std::path::PathBuf;
use tokio::fs::File;

/// Files served and received by a peer, all kept in one directory
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<dir>/<file>.pdf`, the copy this peer serves
    pub fn served_path(&self, file: FileId) -> PathBuf {
        self.dir.join(format!("{}.pdf", file))
    }

    /// `<dir>/received_<file>.pdf`, where a requested copy is written
    pub fn received_path(&self, file: FileId) -> PathBuf {
        self.dir.join(format!("received_{}.pdf", file))
    }

    pub async fn read(&self, file: FileId) -> Result<Bytes, TransferError> {
        let path = self.served_path(file);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(Bytes::from(content)),
            Err(e) => {
                debug!("Cannot read {}: {}", path.display(), e);
                Err(TransferError::FileUnavailable(file.0))
            }
        }
    }

    pub async fn create_received(&self, file: FileId) -> Result<File, TransferError> {
        Ok(File::create(self.received_path(file)).await?)
    }
}
