//! Full-history download of one group, run as a background operation.
//!
//! Messages go to the archive repository page by page; media of each page is downloaded
//! before the next page is requested.

use crate::domain::{DomainError, Group, OperationKind, OperationRecord, OperationStatus, Topic};
use crate::ports::{ArchiveRepo, TgClient, TgClientFactory};
use crate::usecases::history::HistoryPager;
use crate::usecases::media_worker::{MediaStats, MediaWorker};
use crate::usecases::operation_runner::{LaunchSpec, RunContext, TaskOutcome};
use crate::usecases::{GroupService, OperationRegistry, OperationRunner};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArchiveSettings {
    pub download_concurrency: usize,
    pub page_delay: Duration,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            download_concurrency: 3,
            page_delay: Duration::from_millis(500),
        }
    }
}

pub struct ArchiveService {
    runner: Arc<OperationRunner>,
    registry: Arc<OperationRegistry>,
    groups: Arc<GroupService>,
    clients: Arc<dyn TgClientFactory>,
    repo: Arc<dyn ArchiveRepo>,
    settings: ArchiveSettings,
}

impl ArchiveService {
    pub fn new(
        runner: Arc<OperationRunner>,
        registry: Arc<OperationRegistry>,
        groups: Arc<GroupService>,
        clients: Arc<dyn TgClientFactory>,
        repo: Arc<dyn ArchiveRepo>,
        settings: ArchiveSettings,
    ) -> Self {
        Self {
            runner,
            registry,
            groups,
            clients,
            repo,
            settings,
        }
    }

    /// Validate the request and start the download. Returns the `started` record.
    pub async fn start(
        self: &Arc<Self>,
        user: &str,
        group_id: i64,
    ) -> Result<OperationRecord, DomainError> {
        let user = user.trim();
        if user.is_empty() {
            return Err(DomainError::InvalidInput("user is required".into()));
        }
        let group = self.groups.find(user, group_id).await?;

        let spec = LaunchSpec {
            id: format!("archive-{}", Uuid::new_v4().simple()),
            kind: OperationKind::ArchiveDownload,
            topic: Topic::ArchiveStatus,
            error_topic: Topic::ArchiveStatus,
            id_field: "operation_id",
            user: Some(user.to_string()),
            metadata: BTreeMap::from([
                ("user".to_string(), user.to_string()),
                ("group".to_string(), group.name.clone()),
                ("group_id".to_string(), group.id.to_string()),
            ]),
        };
        let this = Arc::clone(self);
        let owner = user.to_string();
        self.runner
            .launch(spec, move |ctx| async move { this.download(ctx, owner, group).await })
            .await
    }

    pub async fn list(&self) -> Vec<OperationRecord> {
        self.registry
            .list_by_kind(OperationKind::ArchiveDownload)
            .await
    }

    async fn download(
        &self,
        ctx: RunContext,
        user: String,
        group: Group,
    ) -> Result<TaskOutcome, DomainError> {
        ctx.advance(&[OperationStatus::Started], OperationStatus::Downloading)
            .await?;
        let session = ctx
            .session()
            .cloned()
            .ok_or_else(|| DomainError::Session("no session allocated".into()))?;
        let client = self.clients.create(&session);
        client.connect().await?;

        let result = self.archive_history(&ctx, Arc::clone(&client), &user, &group).await;
        if let Err(e) = client.disconnect().await {
            warn!(operation_id = ctx.operation_id(), error = %e, "disconnect failed");
        }
        result
    }

    async fn archive_history(
        &self,
        ctx: &RunContext,
        client: Arc<dyn TgClient>,
        user: &str,
        group: &Group,
    ) -> Result<TaskOutcome, DomainError> {
        if !client.is_authorized().await? {
            return Ok(TaskOutcome::Failed(format!(
                "user '{}' is not authorized",
                user
            )));
        }

        self.repo.clear_messages(user, group.id).await?;
        let media_dir = self.repo.media_dir(user, group.id);
        let worker = MediaWorker::new(Arc::clone(&client), self.settings.download_concurrency);
        let mut pager = HistoryPager::new(group.id, 0).page_delay(self.settings.page_delay);
        let mut messages = 0usize;
        let mut media = MediaStats::default();

        while let Some(page) = pager.next_page(client.as_ref()).await? {
            if ctx.is_cancelled() {
                return Ok(TaskOutcome::Stopped);
            }
            self.repo.save_messages(user, group.id, &page).await?;
            messages += page.len();

            let refs = page.into_iter().filter_map(|m| m.media).collect();
            media.add(worker.download_all(refs, &media_dir).await?);

            ctx.set_metadata("messages", messages).await;
            ctx.set_metadata("media_downloaded", media.downloaded).await;
            ctx.set_metadata("media_failed", media.failed).await;
            ctx.publish(
                Topic::ArchiveStatus,
                json!({
                    "status": OperationStatus::Downloading.as_str(),
                    "messages": messages,
                    "media_downloaded": media.downloaded,
                    "media_skipped": media.skipped,
                    "media_failed": media.failed,
                }),
            );
        }

        info!(
            operation_id = ctx.operation_id(),
            user,
            group_id = group.id,
            messages,
            media_downloaded = media.downloaded,
            media_failed = media.failed,
            "archive complete"
        );
        Ok(TaskOutcome::Completed)
    }
}
