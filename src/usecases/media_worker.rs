//! Bounded-concurrency media downloads for one batch of messages.
//!
//! Files are named `<message_id>.<ext>` inside the destination directory; files that
//! already exist are skipped. A failed download is counted, never fatal to the batch.

use crate::domain::{DomainError, MediaReference};
use crate::ports::TgClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub const DEFAULT_CONCURRENCY: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MediaStats {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl MediaStats {
    pub fn add(&mut self, other: MediaStats) {
        self.downloaded += other.downloaded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

enum Fetched {
    Downloaded,
    Skipped,
}

pub struct MediaWorker {
    client: Arc<dyn TgClient>,
    semaphore: Arc<Semaphore>,
}

impl MediaWorker {
    pub fn new(client: Arc<dyn TgClient>, concurrency: usize) -> Self {
        Self {
            client,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub fn file_name(media_ref: &MediaReference) -> String {
        format!(
            "{}.{}",
            media_ref.message_id,
            media_ref.media_type.extension()
        )
    }

    /// Download every reference into `dest_dir` and wait for all of them.
    pub async fn download_all(
        &self,
        refs: Vec<MediaReference>,
        dest_dir: &Path,
    ) -> Result<MediaStats, DomainError> {
        let mut stats = MediaStats::default();
        if refs.is_empty() {
            return Ok(stats);
        }
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|e| DomainError::Media(format!("create {}: {}", dest_dir.display(), e)))?;

        let mut tasks = JoinSet::new();
        for media_ref in refs {
            let sem = Arc::clone(&self.semaphore);
            let client = Arc::clone(&self.client);
            let dest = dest_dir.join(Self::file_name(&media_ref));
            tasks.spawn(async move {
                let _permit = sem
                    .acquire_owned()
                    .await
                    .map_err(|e| DomainError::Media(e.to_string()))?;
                let result = Self::download_one(client.as_ref(), &media_ref, dest).await;
                if let Err(e) = &result {
                    error!(
                        group_id = media_ref.group_id,
                        msg_id = media_ref.message_id,
                        error = %e,
                        "media download failed"
                    );
                }
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Fetched::Downloaded)) => stats.downloaded += 1,
                Ok(Ok(Fetched::Skipped)) => stats.skipped += 1,
                Ok(Err(_)) | Err(_) => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn download_one(
        client: &dyn TgClient,
        media_ref: &MediaReference,
        dest: PathBuf,
    ) -> Result<Fetched, DomainError> {
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            debug!(path = %dest.display(), "file already exists: skipping download");
            return Ok(Fetched::Skipped);
        }
        client.download_media(media_ref, &dest).await?;
        debug!(
            group_id = media_ref.group_id,
            msg_id = media_ref.message_id,
            path = %dest.display(),
            "media downloaded"
        );
        Ok(Fetched::Downloaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SessionHandle;
    use crate::ports::TgClientFactory;
    use crate::test_support::{MockFactory, message};
    use chrono::Utc;

    #[tokio::test]
    async fn downloads_skips_existing_and_counts_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let factory = MockFactory::default();
        factory.telegram.failing_media.lock().unwrap().insert(3);
        let client = factory.create(&SessionHandle {
            user: "alice".into(),
            operation_id: Some("op".into()),
            created_at: Utc::now(),
            path: tmp.path().join("alice.session"),
        });
        client.connect().await.unwrap();

        let dest = tmp.path().join("media");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("2.jpg"), b"old").unwrap();

        let refs: Vec<MediaReference> = (1..=4)
            .filter_map(|id| message(5, id, true).media)
            .collect();
        let worker = MediaWorker::new(client, 2);
        let stats = worker.download_all(refs, &dest).await.unwrap();

        assert_eq!(
            stats,
            MediaStats {
                downloaded: 2,
                skipped: 1,
                failed: 1
            }
        );
        assert_eq!(std::fs::read(dest.join("2.jpg")).unwrap(), b"old");
        assert_eq!(std::fs::read(dest.join("4.jpg")).unwrap(), b"media-4");
        assert!(!dest.join("3.jpg").exists());
    }
}
