//! Known accounts: the nickname -> phone mapping and account removal.

use crate::domain::DomainError;
use crate::ports::store::docs;
use crate::ports::{KvStore, TgClientFactory};
use crate::usecases::SessionStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

const MAX_NICKNAME_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntry {
    pub nickname: String,
    pub phone: String,
}

pub struct UserService {
    store: Arc<dyn KvStore>,
    sessions: Arc<SessionStore>,
    clients: Arc<dyn TgClientFactory>,
    /// Serializes read-modify-write of `phone_numbers` and `user_groups`.
    write_lock: Mutex<()>,
}

impl UserService {
    pub fn new(
        store: Arc<dyn KvStore>,
        sessions: Arc<SessionStore>,
        clients: Arc<dyn TgClientFactory>,
    ) -> Self {
        Self {
            store,
            sessions,
            clients,
            write_lock: Mutex::new(()),
        }
    }

    /// Held by every writer of the user documents.
    pub(crate) async fn lock_documents(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub async fn list(&self) -> Result<Vec<UserEntry>, DomainError> {
        let phones: BTreeMap<String, String> = self.store.load_as(docs::PHONE_NUMBERS).await?;
        Ok(phones
            .into_iter()
            .map(|(nickname, phone)| UserEntry { nickname, phone })
            .collect())
    }

    pub async fn phone_of(&self, nickname: &str) -> Result<Option<String>, DomainError> {
        let phones: BTreeMap<String, String> = self.store.load_as(docs::PHONE_NUMBERS).await?;
        Ok(phones.get(nickname).cloned())
    }

    /// Register an account whose session file is already signed in.
    ///
    /// The check runs on an isolated copy; an unauthorized session is a user error.
    pub async fn add(&self, nickname: &str, phone: &str) -> Result<UserEntry, DomainError> {
        let nickname = nickname.trim();
        let phone = phone.trim();
        validate_nickname(nickname)?;
        validate_phone(phone)?;

        let op_id = format!("users-{}", Uuid::new_v4().simple());
        let session = self.sessions.create_isolated(nickname, &op_id).await;
        let client = self.clients.create(&session);
        let authorized = async {
            client.connect().await?;
            client.is_authorized().await
        }
        .await;
        if let Err(e) = client.disconnect().await {
            warn!(nickname, error = %e, "disconnect failed");
        }
        self.sessions.release(&op_id, None).await;

        if !authorized? {
            return Err(DomainError::InvalidInput(format!(
                "no authorized session for '{}'; authenticate first",
                nickname
            )));
        }
        self.save_phone(nickname, phone).await?;
        Ok(UserEntry {
            nickname: nickname.to_string(),
            phone: phone.to_string(),
        })
    }

    /// Persist the nickname -> phone mapping (after a successful login).
    pub async fn save_phone(&self, nickname: &str, phone: &str) -> Result<(), DomainError> {
        let _guard = self.lock_documents().await;
        let mut phones: BTreeMap<String, String> =
            self.store.load_as(docs::PHONE_NUMBERS).await?;
        phones.insert(nickname.to_string(), phone.to_string());
        self.store.save_as(docs::PHONE_NUMBERS, &phones).await?;
        info!(nickname, "user mapping saved");
        Ok(())
    }

    /// Forget a user: mapping, stored groups and canonical session files.
    pub async fn delete(&self, nickname: &str) -> Result<(), DomainError> {
        {
            let _guard = self.lock_documents().await;
            let mut phones: BTreeMap<String, String> =
                self.store.load_as(docs::PHONE_NUMBERS).await?;
            if phones.remove(nickname).is_none() {
                return Err(DomainError::NotFound(format!("user '{}'", nickname)));
            }
            self.store.save_as(docs::PHONE_NUMBERS, &phones).await?;

            let mut groups = self.store.load(docs::USER_GROUPS).await?;
            if groups.remove(nickname).is_some() {
                self.store.save(docs::USER_GROUPS, &groups).await?;
            }
        }
        self.sessions.remove_canonical(nickname).await;
        info!(nickname, "user removed");
        Ok(())
    }
}

/// Nicknames become file names, so they are restricted to `[A-Za-z0-9_-]`.
pub fn validate_nickname(nickname: &str) -> Result<(), DomainError> {
    if nickname.is_empty() || nickname.len() > MAX_NICKNAME_LEN {
        return Err(DomainError::InvalidInput(format!(
            "nickname must be 1-{} characters",
            MAX_NICKNAME_LEN
        )));
    }
    if !nickname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::InvalidInput(
            "nickname may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

/// International format: optional leading '+', then 5-15 digits.
pub fn validate_phone(phone: &str) -> Result<(), DomainError> {
    let digits = phone.strip_prefix('+').unwrap_or(phone);
    if digits.len() < 5 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(DomainError::InvalidInput(format!(
            "'{}' is not a valid phone number",
            phone
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AUTH_MARKER, MemoryStore, MockFactory};
    use crate::usecases::SessionStoreSettings;

    fn service(dir: &std::path::Path) -> (UserService, Arc<SessionStore>) {
        let sessions = Arc::new(SessionStore::new(dir, SessionStoreSettings::default()));
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let users = UserService::new(
            store,
            Arc::clone(&sessions),
            Arc::new(MockFactory::default()),
        );
        (users, sessions)
    }

    #[tokio::test]
    async fn save_list_and_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let (users, sessions) = service(tmp.path());
        users.save_phone("alice", "+391234567").await.unwrap();
        users.save_phone("bob", "+391111111").await.unwrap();
        std::fs::write(sessions.canonical("alice").path(), b"creds").unwrap();

        let list = users.list().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].nickname, "alice");

        users.delete("alice").await.unwrap();
        assert!(!sessions.canonical("alice").path().exists());
        assert_eq!(users.phone_of("alice").await.unwrap(), None);
        assert!(matches!(
            users.delete("alice").await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn add_requires_a_signed_in_session() {
        let tmp = tempfile::tempdir().unwrap();
        let (users, sessions) = service(tmp.path());

        assert!(matches!(
            users.add("erin", "+391234567").await,
            Err(DomainError::InvalidInput(_))
        ));
        assert_eq!(users.phone_of("erin").await.unwrap(), None);

        std::fs::write(sessions.canonical("erin").path(), AUTH_MARKER).unwrap();
        let entry = users.add(" erin ", "+391234567").await.unwrap();
        assert_eq!(entry.nickname, "erin");
        assert_eq!(
            users.phone_of("erin").await.unwrap().as_deref(),
            Some("+391234567")
        );
        assert!(sessions.live_handles().await.is_empty());
        assert_eq!(
            std::fs::read(sessions.canonical("erin").path()).unwrap(),
            AUTH_MARKER
        );
        assert!(matches!(
            users.add("../erin", "+391234567").await,
            Err(DomainError::InvalidInput(_))
        ));
    }

    #[test]
    fn input_validation() {
        assert!(validate_nickname("alice_01").is_ok());
        assert!(validate_nickname("").is_err());
        assert!(validate_nickname("../root").is_err());
        assert!(validate_phone("+391234567").is_ok());
        assert!(validate_phone("39-12").is_err());
        assert!(validate_phone("+").is_err());
    }
}
