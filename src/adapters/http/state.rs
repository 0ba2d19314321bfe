//! Shared state handed to every route handler.

use crate::ports::{ArchiveRepo, KvStore, TgClientFactory};
use crate::usecases::{
    ArchiveService, ArchiveSettings, AuthService, AuthSettings, EventBus, GroupService,
    MonitorService, MonitorSettings, OperationRegistry, OperationRunner, SessionStore,
    TokenService, UserService,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Timings and limits for the services behind the API.
#[derive(Debug, Clone)]
pub struct CoreSettings {
    pub auth: AuthSettings,
    pub archive: ArchiveSettings,
    pub monitor: MonitorSettings,
    pub event_capacity: usize,
}

/// Cloned per request; every field is an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub users: Arc<UserService>,
    pub groups: Arc<GroupService>,
    pub archives: Arc<ArchiveService>,
    pub monitor: Arc<MonitorService>,
    pub registry: Arc<OperationRegistry>,
    pub runner: Arc<OperationRunner>,
    pub events: Arc<EventBus>,
    pub tokens: Arc<TokenService>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build every service on top of the given infrastructure.
    pub fn build(
        store: Arc<dyn KvStore>,
        sessions: Arc<SessionStore>,
        clients: Arc<dyn TgClientFactory>,
        archive: Arc<dyn ArchiveRepo>,
        settings: CoreSettings,
    ) -> Self {
        let registry = Arc::new(OperationRegistry::new());
        let events = Arc::new(EventBus::new(settings.event_capacity));
        let runner = Arc::new(OperationRunner::new(
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&sessions),
        ));
        let users = Arc::new(UserService::new(
            Arc::clone(&store),
            Arc::clone(&sessions),
            Arc::clone(&clients),
        ));
        let groups = Arc::new(GroupService::new(
            Arc::clone(&store),
            Arc::clone(&sessions),
            Arc::clone(&clients),
            Arc::clone(&users),
        ));
        let auth = Arc::new(AuthService::new(
            Arc::clone(&sessions),
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&clients),
            Arc::clone(&users),
            settings.auth,
        ));
        let archives = Arc::new(ArchiveService::new(
            Arc::clone(&runner),
            Arc::clone(&registry),
            Arc::clone(&groups),
            Arc::clone(&clients),
            archive,
            settings.archive,
        ));
        let monitor = Arc::new(MonitorService::new(
            Arc::clone(&runner),
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&store),
            clients,
            Arc::clone(&users),
            Arc::clone(&groups),
            settings.monitor,
        ));
        let tokens = Arc::new(TokenService::new(store));

        Self {
            auth,
            users,
            groups,
            archives,
            monitor,
            registry,
            runner,
            events,
            tokens,
            started_at: Utc::now(),
        }
    }
}
