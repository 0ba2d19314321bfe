//! Monitoring: a background loop that downloads new media of every stored group.
//!
//! Each instance holds an entry in the `running_instances` document while it runs and
//! keeps per-group progress in `monitor_state`. Stopping is cooperative: [`MonitorService::stop`]
//! marks the record `stopping` and cancels the token the loop sleeps on.

use crate::domain::{DomainError, Group, OperationKind, OperationRecord, OperationStatus, Topic};
use crate::ports::store::docs;
use crate::ports::{KvStore, TgClient, TgClientFactory};
use crate::usecases::history::HistoryPager;
use crate::usecases::media_worker::MediaWorker;
use crate::usecases::operation_runner::{LaunchSpec, RunContext, TaskOutcome};
use crate::usecases::user_service::validate_nickname;
use crate::usecases::{EventBus, GroupService, OperationRegistry, OperationRunner, UserService};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub cycle: Duration,
    pub downloads_dir: PathBuf,
    pub download_concurrency: usize,
}

/// Lock entry held in `running_instances` while an instance runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceLock {
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub user: Option<String>,
}

struct Watched {
    user: String,
    client: Arc<dyn TgClient>,
}

pub struct MonitorService {
    runner: Arc<OperationRunner>,
    registry: Arc<OperationRegistry>,
    events: Arc<EventBus>,
    store: Arc<dyn KvStore>,
    clients: Arc<dyn TgClientFactory>,
    users: Arc<UserService>,
    groups: Arc<GroupService>,
    settings: MonitorSettings,
    write_lock: Mutex<()>,
}

impl MonitorService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runner: Arc<OperationRunner>,
        registry: Arc<OperationRegistry>,
        events: Arc<EventBus>,
        store: Arc<dyn KvStore>,
        clients: Arc<dyn TgClientFactory>,
        users: Arc<UserService>,
        groups: Arc<GroupService>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            runner,
            registry,
            events,
            store,
            clients,
            users,
            groups,
            settings,
            write_lock: Mutex::new(()),
        }
    }

    /// Start an instance watching `user` (or every known user). Returns the `started` record.
    pub async fn start(self: &Arc<Self>, user: Option<&str>) -> Result<OperationRecord, DomainError> {
        let user = user.map(str::trim).filter(|u| !u.is_empty());
        if let Some(u) = user {
            validate_nickname(u)?;
            if self.users.phone_of(u).await?.is_none() {
                return Err(DomainError::NotFound(format!("user '{}'", u)));
            }
        }

        let instance_id = format!("mon-{}", Uuid::new_v4().simple());
        let mut metadata = BTreeMap::new();
        if let Some(u) = user {
            metadata.insert("user".to_string(), u.to_string());
        }
        let spec = LaunchSpec {
            id: instance_id.clone(),
            kind: OperationKind::Monitoring,
            topic: Topic::MonitoringStatus,
            error_topic: Topic::MonitoringError,
            id_field: "instance_id",
            user: user.map(String::from),
            metadata,
        };

        self.lock_instance(&instance_id, user).await?;
        let this = Arc::clone(self);
        let scope = user.map(String::from);
        let launched = self
            .runner
            .launch(spec, move |ctx| async move {
                let outcome = this.run_instance(&ctx, scope).await;
                this.unlock_instance(ctx.operation_id()).await;
                outcome
            })
            .await;
        if launched.is_err() {
            self.unlock_instance(&instance_id).await;
        }
        launched
    }

    /// Ask a running instance to stop. Only `started`/`active` instances can be stopped.
    pub async fn stop(&self, instance_id: &str) -> Result<OperationRecord, DomainError> {
        let record = self.registry.get(instance_id).await?;
        if record.kind != OperationKind::Monitoring {
            return Err(DomainError::NotFound(format!("monitoring instance {}", instance_id)));
        }
        let record = self
            .registry
            .compare_and_set(
                instance_id,
                &[OperationStatus::Started, OperationStatus::Active],
                OperationStatus::Stopping,
            )
            .await
            .map_err(|e| match e {
                DomainError::TerminalStatus { id, status } => DomainError::Conflict {
                    message: format!("monitoring instance {} is not running", id),
                    status: status.to_string(),
                },
                other => other,
            })?;

        self.unlock_instance(instance_id).await;
        self.events.publish(
            Topic::MonitoringStatus,
            json!({
                "instance_id": instance_id,
                "status": OperationStatus::Stopping.as_str(),
            }),
        );
        self.runner.cancel(instance_id).await;
        info!(instance_id, "monitoring stop requested");
        Ok(record)
    }

    pub async fn list(&self) -> Vec<OperationRecord> {
        self.registry.list_by_kind(OperationKind::Monitoring).await
    }

    /// Ids currently holding a `running_instances` entry.
    pub async fn running_instances(&self) -> Result<Vec<String>, DomainError> {
        Ok(self
            .store
            .load(docs::RUNNING_INSTANCES)
            .await?
            .keys()
            .cloned()
            .collect())
    }

    /// Drop `running_instances` entries written by another process. Returns how many.
    pub async fn reclaim_stale_locks(&self) -> Result<usize, DomainError> {
        let _guard = self.write_lock.lock().await;
        let mut running: BTreeMap<String, InstanceLock> =
            self.store.load_as(docs::RUNNING_INSTANCES).await?;
        let pid = std::process::id();
        let before = running.len();
        running.retain(|id, lock| {
            let keep = lock.pid == pid;
            if !keep {
                info!(instance_id = %id, pid = lock.pid, "releasing stale monitoring lock");
            }
            keep
        });
        let removed = before - running.len();
        if removed > 0 {
            self.store.save_as(docs::RUNNING_INSTANCES, &running).await?;
        }
        Ok(removed)
    }

    async fn lock_instance(&self, instance_id: &str, user: Option<&str>) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;
        let mut running: BTreeMap<String, InstanceLock> =
            self.store.load_as(docs::RUNNING_INSTANCES).await?;
        running.insert(
            instance_id.to_string(),
            InstanceLock {
                pid: std::process::id(),
                started_at: Utc::now(),
                user: user.map(String::from),
            },
        );
        self.store.save_as(docs::RUNNING_INSTANCES, &running).await
    }

    /// Idempotent.
    async fn unlock_instance(&self, instance_id: &str) {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let mut running = self.store.load(docs::RUNNING_INSTANCES).await?;
            if running.remove(instance_id).is_some() {
                self.store.save(docs::RUNNING_INSTANCES, &running).await?;
            }
            Ok::<_, DomainError>(())
        }
        .await;
        if let Err(e) = result {
            warn!(instance_id, error = %e, "failed to release instance lock");
        }
    }

    async fn run_instance(
        &self,
        ctx: &RunContext,
        scope: Option<String>,
    ) -> Result<TaskOutcome, DomainError> {
        if let Err(e) = ctx
            .advance(&[OperationStatus::Started], OperationStatus::Active)
            .await
        {
            debug!(instance_id = ctx.operation_id(), error = %e, "not activated");
            return Ok(TaskOutcome::Stopped);
        }

        let watched = self.connect_users(ctx, scope).await;
        if watched.is_empty() {
            return Ok(TaskOutcome::Failed("no authorized users to monitor".into()));
        }

        let mut cycle = 0u64;
        while !ctx.is_cancelled() {
            cycle += 1;
            let mut new_media = 0usize;
            let mut failures = 0usize;
            for w in &watched {
                let groups = self.groups.groups_of(&w.user).await.unwrap_or_default();
                for group in &groups {
                    if ctx.is_cancelled() {
                        break;
                    }
                    match self.poll_group(&w.user, &w.client, group).await {
                        Ok(n) => new_media += n,
                        Err(e) => {
                            failures += 1;
                            warn!(instance_id = ctx.operation_id(), user = %w.user, group_id = group.id, error = %e, "monitoring poll failed");
                            ctx.publish(
                                Topic::MonitoringError,
                                json!({
                                    "status": "group_error",
                                    "user": w.user,
                                    "group_id": group.id,
                                    "error": e.to_string(),
                                }),
                            );
                        }
                    }
                }
            }
            ctx.set_metadata("cycles", cycle).await;
            if ctx.is_cancelled() {
                break;
            }
            ctx.publish(
                Topic::MonitoringStatus,
                json!({
                    "status": OperationStatus::Active.as_str(),
                    "cycle": cycle,
                    "new_media": new_media,
                    "failures": failures,
                }),
            );
            debug!(instance_id = ctx.operation_id(), cycle, new_media, "monitoring cycle complete");

            tokio::select! {
                _ = ctx.cancel_token().cancelled() => {}
                _ = tokio::time::sleep(self.settings.cycle) => {}
            }
        }

        for w in &watched {
            if let Err(e) = w.client.disconnect().await {
                warn!(user = %w.user, error = %e, "disconnect failed");
            }
        }
        Ok(TaskOutcome::Stopped)
    }

    async fn connect_users(&self, ctx: &RunContext, scope: Option<String>) -> Vec<Watched> {
        let names: Vec<String> = match scope {
            Some(user) => vec![user],
            None => match self.users.list().await {
                Ok(users) => users.into_iter().map(|u| u.nickname).collect(),
                Err(e) => {
                    warn!(error = %e, "cannot list users");
                    Vec::new()
                }
            },
        };

        let mut watched = Vec::new();
        for user in names {
            let session = match ctx.session() {
                Some(handle) if handle.user == user => handle.clone(),
                _ => ctx.session_for(&user).await,
            };
            let client = self.clients.create(&session);
            let ready = async {
                client.connect().await?;
                client.is_authorized().await
            }
            .await;
            let reason = match ready {
                Ok(true) => {
                    watched.push(Watched { user, client });
                    continue;
                }
                Ok(false) => "not authorized".to_string(),
                Err(e) => e.to_string(),
            };
            warn!(user = %user, reason = %reason, "user skipped by monitoring");
            ctx.publish(
                Topic::MonitoringError,
                json!({ "status": "user_skipped", "user": user, "error": reason }),
            );
            if let Err(e) = client.disconnect().await {
                warn!(user = %user, error = %e, "disconnect failed");
            }
        }
        watched
    }

    /// Download media of messages newer than the last seen id. The first poll of a group
    /// only records its newest id, so history is not re-downloaded.
    async fn poll_group(
        &self,
        user: &str,
        client: &Arc<dyn TgClient>,
        group: &Group,
    ) -> Result<usize, DomainError> {
        let key = format!("{}:{}", user, group.id);
        let states: BTreeMap<String, i32> = self.store.load_as(docs::MONITOR_STATE).await?;

        let Some(&last_seen) = states.get(&key) else {
            let newest = client
                .get_messages(group.id, 0, 0, 1)
                .await?
                .first()
                .map(|m| m.id)
                .unwrap_or(0);
            self.save_state(&key, newest).await?;
            return Ok(0);
        };

        let dest = self
            .settings
            .downloads_dir
            .join(user)
            .join(group.id.to_string());
        let worker = MediaWorker::new(Arc::clone(client), self.settings.download_concurrency);
        let mut pager = HistoryPager::new(group.id, last_seen);
        let mut downloaded = 0;
        while let Some(page) = pager.next_page(client.as_ref()).await? {
            let refs = page.into_iter().filter_map(|m| m.media).collect();
            let stats = worker.download_all(refs, &dest).await?;
            downloaded += stats.downloaded;
        }
        if pager.newest_seen() > last_seen {
            self.save_state(&key, pager.newest_seen()).await?;
        }
        Ok(downloaded)
    }

    async fn save_state(&self, key: &str, last_id: i32) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;
        let mut states: BTreeMap<String, i32> = self.store.load_as(docs::MONITOR_STATE).await?;
        states.insert(key.to_string(), last_id);
        self.store.save_as(docs::MONITOR_STATE, &states).await
    }
}
