//! Filesystem-backed message store: one JSON file per message.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{Handle, MessageStore};
use crate::domain::Content;
use crate::error::{Result, StoreError};

/// A [`MessageStore`] backed by a directory of JSON files.
///
/// Each stored value becomes `<directory>/<time-ordered-id>.json`. `retrieve`
/// returns the first file it discovers that isn't already reserved; the
/// handle is the file's absolute path. Positive acknowledgement deletes the
/// file; negative acknowledgement merely drops the reservation.
pub struct LocalDirectoryStore {
    directory: PathBuf,
    reserved: Mutex<HashSet<PathBuf>>,
}

impl LocalDirectoryStore {
    /// Open (without creating) a directory-backed store. The directory must
    /// already exist.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// The directory this store reads and writes.
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

#[async_trait]
impl MessageStore for LocalDirectoryStore {
    async fn store(&self, content: Content) -> Result<(), StoreError> {
        let path = self.directory.join(format!("{}.json", Uuid::now_v7()));
        let bytes = serde_json::to_vec_pretty(&content)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn retrieve(&self) -> Result<Option<(Handle, Content)>, StoreError> {
        let mut read_dir = tokio::fs::read_dir(&self.directory).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if self.reserved.lock().contains(&path) {
                continue;
            }
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable store entry");
                    continue;
                }
            };
            let content: Content = match serde_json::from_slice(&bytes) {
                Ok(content) => content,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping undecodable store entry");
                    continue;
                }
            };
            self.reserved.lock().insert(path.clone());
            return Ok(Some((Handle(path.display().to_string()), content)));
        }
        Ok(None)
    }

    async fn acknowledge(&self, handle: &Handle, success: bool) -> Result<(), StoreError> {
        let path = PathBuf::from(&handle.0);
        let removed = self.reserved.lock().remove(&path);
        if !removed {
            return Err(StoreError::UnknownHandle(handle.0.clone()));
        }
        if success {
            tokio::fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
