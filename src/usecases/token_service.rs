//! API tokens: creation, validation, revocation and the first-start admin token.
//!
//! Raw tokens are returned once and only their SHA-256 hash is stored.

use crate::domain::{ApiPrincipal, DomainError, Role, TokenRecord};
use crate::ports::KvStore;
use crate::ports::store::docs;
use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

const TOKEN_BYTES: usize = 32;
const ADMIN_USERNAME: &str = "admin";
/// Minimum age of `last_used` before a request writes it again.
const LAST_USED_RESOLUTION_SECS: i64 = 60;

pub struct TokenService {
    store: Arc<dyn KvStore>,
    write_lock: Mutex<()>,
}

impl TokenService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Issue a token for `username`, replacing any previous one. Returns the raw token.
    pub async fn create(
        &self,
        username: &str,
        role: Role,
        expiration_days: Option<u32>,
    ) -> Result<(String, TokenRecord), DomainError> {
        if username.trim().is_empty() {
            return Err(DomainError::InvalidInput("username is required".into()));
        }
        let token = generate_token();
        let now = Utc::now();
        let record = TokenRecord {
            token_hash: hash_token(&token),
            created: now,
            role,
            expiration: expiration_days.map(|d| now + ChronoDuration::days(i64::from(d))),
            last_used: None,
        };

        let _guard = self.write_lock.lock().await;
        let mut tokens: BTreeMap<String, TokenRecord> =
            self.store.load_as(docs::API_TOKENS).await?;
        tokens.insert(username.to_string(), record.clone());
        self.store.save_as(docs::API_TOKENS, &tokens).await?;
        info!(username, ?role, "API token created");
        Ok((token, record))
    }

    /// Resolve a raw token to its owner.
    ///
    /// Lookups read the document without locking; `last_used` is written back at most
    /// once a minute per token.
    pub async fn validate(&self, token: &str) -> Result<ApiPrincipal, DomainError> {
        let hash = hash_token(token);
        let tokens: BTreeMap<String, TokenRecord> = self.store.load_as(docs::API_TOKENS).await?;
        let (username, record) = find_by_hash(&tokens, &hash)
            .ok_or_else(|| DomainError::Unauthorized("invalid or expired API token".into()))?;

        let now = Utc::now();
        if record.expiration.is_some_and(|exp| now > exp) {
            return Err(DomainError::Unauthorized("invalid or expired API token".into()));
        }
        let principal = ApiPrincipal {
            username: username.clone(),
            role: record.role,
        };
        if record
            .last_used
            .is_none_or(|used| now - used >= ChronoDuration::seconds(LAST_USED_RESOLUTION_SECS))
        {
            self.touch(&principal.username, &hash, now).await?;
        }
        Ok(principal)
    }

    async fn touch(
        &self,
        username: &str,
        hash: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let _guard = self.write_lock.lock().await;
        let mut tokens: BTreeMap<String, TokenRecord> =
            self.store.load_as(docs::API_TOKENS).await?;
        // Revoked or reissued in the meantime: nothing to refresh.
        match tokens.get_mut(username) {
            Some(record) if record.token_hash == hash => record.last_used = Some(now),
            _ => return Ok(()),
        }
        self.store.save_as(docs::API_TOKENS, &tokens).await
    }

    /// Returns whether a token existed for `username`.
    pub async fn revoke(&self, username: &str) -> Result<bool, DomainError> {
        let _guard = self.write_lock.lock().await;
        let mut tokens: BTreeMap<String, TokenRecord> =
            self.store.load_as(docs::API_TOKENS).await?;
        if tokens.remove(username).is_none() {
            return Ok(false);
        }
        self.store.save_as(docs::API_TOKENS, &tokens).await?;
        info!(username, "API token revoked");
        Ok(true)
    }

    /// Create the admin token when no admin exists yet. Returns it only when freshly created.
    pub async fn initialize(&self) -> Result<Option<String>, DomainError> {
        let tokens: BTreeMap<String, TokenRecord> = self.store.load_as(docs::API_TOKENS).await?;
        if tokens.values().any(|r| r.role == Role::Admin) {
            return Ok(None);
        }
        let (token, _) = self.create(ADMIN_USERNAME, Role::Admin, None).await?;
        Ok(Some(token))
    }
}

fn find_by_hash<'a>(
    tokens: &'a BTreeMap<String, TokenRecord>,
    hash: &str,
) -> Option<(&'a String, &'a TokenRecord)> {
    tokens
        .iter()
        .find(|(_, r)| constant_time_eq(r.token_hash.as_bytes(), hash.as_bytes()))
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    to_hex(&bytes)
}

fn hash_token(token: &str) -> String {
    to_hex(&Sha256::digest(token.as_bytes()))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Compares all bytes regardless of where the first mismatch is.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MemoryStore;

    fn service() -> TokenService {
        TokenService::new(Arc::new(MemoryStore::default()))
    }

    async fn last_used(tokens: &TokenService, username: &str) -> Option<chrono::DateTime<Utc>> {
        let stored: BTreeMap<String, TokenRecord> =
            tokens.store.load_as(docs::API_TOKENS).await.unwrap();
        stored[username].last_used
    }

    #[tokio::test]
    async fn created_token_validates_and_is_stored_hashed() {
        let tokens = service();
        let (raw, record) = tokens.create("carol", Role::User, None).await.unwrap();
        assert_eq!(raw.len(), TOKEN_BYTES * 2);
        assert_ne!(record.token_hash, raw);

        let principal = tokens.validate(&raw).await.unwrap();
        assert_eq!(principal.username, "carol");
        assert_eq!(principal.role, Role::User);
        assert!(matches!(
            tokens.validate("not-a-token").await,
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn last_used_is_written_at_most_once_a_minute() {
        let tokens = service();
        let (raw, _) = tokens.create("carol", Role::User, None).await.unwrap();
        assert!(last_used(&tokens, "carol").await.is_none());

        tokens.validate(&raw).await.unwrap();
        let first = last_used(&tokens, "carol").await.unwrap();
        tokens.validate(&raw).await.unwrap();
        assert_eq!(last_used(&tokens, "carol").await, Some(first));

        // An old timestamp is refreshed on the next request.
        let mut stored: BTreeMap<String, TokenRecord> =
            tokens.store.load_as(docs::API_TOKENS).await.unwrap();
        let stale = first - ChronoDuration::minutes(5);
        stored.get_mut("carol").unwrap().last_used = Some(stale);
        tokens.store.save_as(docs::API_TOKENS, &stored).await.unwrap();
        tokens.validate(&raw).await.unwrap();
        assert!(last_used(&tokens, "carol").await.unwrap() > stale);
    }

    #[tokio::test]
    async fn revoked_token_stops_working() {
        let tokens = service();
        let (raw, _) = tokens.create("dave", Role::User, Some(30)).await.unwrap();
        assert!(tokens.revoke("dave").await.unwrap());
        assert!(!tokens.revoke("dave").await.unwrap());
        assert!(tokens.validate(&raw).await.is_err());
    }

    #[tokio::test]
    async fn expired_token_is_rejected() {
        let tokens = service();
        let (raw, _) = tokens.create("erin", Role::User, Some(0)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(tokens.validate(&raw).await.is_err());
    }

    #[tokio::test]
    async fn admin_is_bootstrapped_once() {
        let tokens = service();
        let first = tokens.initialize().await.unwrap();
        assert!(first.is_some());
        assert!(tokens.initialize().await.unwrap().is_none());
        let principal = tokens.validate(&first.unwrap()).await.unwrap();
        assert_eq!(principal.role, Role::Admin);
    }
}
