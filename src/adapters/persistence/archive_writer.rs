//! Implements ArchiveRepo as JSON Lines files.
//!
//! Layout: `<base>/<user>/<group_id>/messages.jsonl` (one message per line, append-only)
//! and `<base>/<user>/<group_id>/media/`.

use crate::domain::{DomainError, Message};
use crate::ports::ArchiveRepo;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const MESSAGES_FILE: &str = "messages.jsonl";

pub struct JsonlArchive {
    base_dir: PathBuf,
}

impl JsonlArchive {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn group_dir(&self, user: &str, group_id: i64) -> PathBuf {
        self.base_dir.join(user).join(group_id.to_string())
    }
}

#[async_trait::async_trait]
impl ArchiveRepo for JsonlArchive {
    /// Appends messages as one JSON object per line. Does not read the existing file.
    async fn save_messages(
        &self,
        user: &str,
        group_id: i64,
        messages: &[Message],
    ) -> Result<(), DomainError> {
        if messages.is_empty() {
            return Ok(());
        }
        let dir = self.group_dir(user, group_id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;

        let mut buf = Vec::new();
        for msg in messages {
            serde_json::to_writer(&mut buf, msg).map_err(|e| DomainError::Storage(e.to_string()))?;
            buf.push(b'\n');
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(MESSAGES_FILE))
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;
        f.write_all(&buf)
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;
        f.flush()
            .await
            .map_err(|e| DomainError::Storage(e.to_string()))?;
        debug!(user, group_id, count = messages.len(), "messages appended");
        Ok(())
    }

    async fn clear_messages(&self, user: &str, group_id: i64) -> Result<(), DomainError> {
        let path = self.group_dir(user, group_id).join(MESSAGES_FILE);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DomainError::Storage(format!("remove {}: {}", path.display(), e))),
        }
    }

    fn media_dir(&self, user: &str, group_id: i64) -> PathBuf {
        self.group_dir(user, group_id).join("media")
    }
}
