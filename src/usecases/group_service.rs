//! Per-user group lists, fetched from Telegram and cached in the `user_groups` document.

use crate::domain::{DomainError, Group};
use crate::ports::store::docs;
use crate::ports::{KvStore, TgClient, TgClientFactory};
use crate::usecases::{SessionStore, UserService};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// A group together with the account that sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserGroup {
    pub user: String,
    #[serde(flatten)]
    pub group: Group,
}

pub struct GroupService {
    store: Arc<dyn KvStore>,
    sessions: Arc<SessionStore>,
    clients: Arc<dyn TgClientFactory>,
    users: Arc<UserService>,
}

impl GroupService {
    pub fn new(
        store: Arc<dyn KvStore>,
        sessions: Arc<SessionStore>,
        clients: Arc<dyn TgClientFactory>,
        users: Arc<UserService>,
    ) -> Self {
        Self {
            store,
            sessions,
            clients,
            users,
        }
    }

    /// Re-fetch the groups of every known user and return the flattened list.
    ///
    /// Users that fail (not authorized, network) keep their previously stored groups.
    pub async fn refresh(&self) -> Result<Vec<UserGroup>, DomainError> {
        let mut fetched = BTreeMap::new();
        for user in self.users.list().await? {
            match self.fetch_for(&user.nickname).await {
                Ok(groups) => {
                    info!(user = %user.nickname, count = groups.len(), "groups fetched");
                    fetched.insert(user.nickname, groups);
                }
                Err(e) => warn!(user = %user.nickname, error = %e, "skipping user during group refresh"),
            }
        }

        {
            let _guard = self.users.lock_documents().await;
            // Users deleted while their groups were being fetched stay deleted.
            let known: BTreeSet<String> = self
                .users
                .list()
                .await?
                .into_iter()
                .map(|u| u.nickname)
                .collect();
            let mut stored: BTreeMap<String, Vec<Group>> =
                self.store.load_as(docs::USER_GROUPS).await?;
            stored.retain(|user, _| known.contains(user));
            stored.extend(fetched.into_iter().filter(|(user, _)| known.contains(user)));
            self.store.save_as(docs::USER_GROUPS, &stored).await?;
        }
        self.list().await
    }

    /// Shareable link of a stored group: `t.me/<username>` for public groups, otherwise
    /// an invite exported through the first account that sees the group.
    pub async fn link(&self, group_id: i64) -> Result<String, DomainError> {
        let stored: BTreeMap<String, Vec<Group>> = self.store.load_as(docs::USER_GROUPS).await?;
        let (user, group) = stored
            .into_iter()
            .find_map(|(user, groups)| {
                groups
                    .into_iter()
                    .find(|g| g.id == group_id)
                    .map(|g| (user, g))
            })
            .ok_or_else(|| DomainError::NotFound(format!("group {}", group_id)))?;

        if let Some(username) = group.username.as_deref().filter(|u| !u.is_empty()) {
            return Ok(format!("https://t.me/{}", username));
        }
        self.with_authorized(&user, |client| async move {
            client.export_invite_link(group_id).await
        })
        .await
    }

    /// Stored groups of every user.
    pub async fn list(&self) -> Result<Vec<UserGroup>, DomainError> {
        let stored: BTreeMap<String, Vec<Group>> = self.store.load_as(docs::USER_GROUPS).await?;
        Ok(stored
            .into_iter()
            .flat_map(|(user, groups)| {
                groups.into_iter().map(move |group| UserGroup {
                    user: user.clone(),
                    group,
                })
            })
            .collect())
    }

    pub async fn groups_of(&self, user: &str) -> Result<Vec<Group>, DomainError> {
        let mut stored: BTreeMap<String, Vec<Group>> =
            self.store.load_as(docs::USER_GROUPS).await?;
        Ok(stored.remove(user).unwrap_or_default())
    }

    /// Look up one stored group of a user.
    pub async fn find(&self, user: &str, group_id: i64) -> Result<Group, DomainError> {
        if self.users.phone_of(user).await?.is_none() {
            return Err(DomainError::NotFound(format!("user '{}'", user)));
        }
        self.groups_of(user)
            .await?
            .into_iter()
            .find(|g| g.id == group_id)
            .ok_or_else(|| {
                DomainError::NotFound(format!("group {} for user '{}'", group_id, user))
            })
    }

    async fn fetch_for(&self, user: &str) -> Result<Vec<Group>, DomainError> {
        self.with_authorized(user, |client| async move { client.get_groups().await })
            .await
    }

    /// Run `op` on a connected, authorized client over an isolated copy of `user`'s session.
    async fn with_authorized<T, F, Fut>(&self, user: &str, op: F) -> Result<T, DomainError>
    where
        F: FnOnce(Arc<dyn TgClient>) -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let op_id = format!("groups-{}", Uuid::new_v4().simple());
        let session = self.sessions.create_isolated(user, &op_id).await;
        let client = self.clients.create(&session);

        let result = async {
            client.connect().await?;
            if !client.is_authorized().await? {
                return Err(DomainError::Conflict {
                    message: format!("user '{}' has no authorized session", user),
                    status: "not_authorized".into(),
                });
            }
            op(Arc::clone(&client)).await
        }
        .await;

        if let Err(e) = client.disconnect().await {
            warn!(user, error = %e, "disconnect failed");
        }
        self.sessions.release(&op_id, None).await;
        result
    }
}
