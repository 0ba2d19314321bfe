//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{
    Challenge, DomainError, Group, MediaReference, Message, SessionHandle, SignInOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Remote protocol capability bound to one session file.
///
/// One instance per session handle; instances never share connection state.
#[async_trait::async_trait]
pub trait TgClient: Send + Sync {
    async fn connect(&self) -> Result<(), DomainError>;

    /// Idempotent. Safe to call on a client that never connected.
    async fn disconnect(&self) -> Result<(), DomainError>;

    async fn is_authorized(&self) -> Result<bool, DomainError>;

    /// Ask the remote service to send a login code to `phone`.
    async fn send_code(&self, phone: &str) -> Result<Challenge, DomainError>;

    /// Complete sign-in with the code the user received.
    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        challenge: &Challenge,
    ) -> Result<SignInOutcome, DomainError>;

    /// Groups and channels the account participates in.
    async fn get_groups(&self) -> Result<Vec<Group>, DomainError>;

    /// Create (or fetch the primary) invite link of a group the account administers.
    async fn export_invite_link(&self, group_id: i64) -> Result<String, DomainError>;

    /// Fetch messages from a group with `min_id < id < max_id` (`max_id == 0`: no upper bound).
    async fn get_messages(
        &self,
        group_id: i64,
        min_id: i32,
        max_id: i32,
        limit: i32,
    ) -> Result<Vec<Message>, DomainError>;

    /// Download media file to the given path.
    async fn download_media(
        &self,
        media_ref: &MediaReference,
        dest_path: &Path,
    ) -> Result<(), DomainError>;
}

/// Builds a client for a session handle. Construction does no I/O; call `connect()` next.
pub trait TgClientFactory: Send + Sync {
    fn create(&self, session: &SessionHandle) -> Arc<dyn TgClient>;
}

/// Archive storage for downloaded history.
#[async_trait::async_trait]
pub trait ArchiveRepo: Send + Sync {
    /// Append messages to the archive of `(user, group_id)`.
    async fn save_messages(
        &self,
        user: &str,
        group_id: i64,
        messages: &[Message],
    ) -> Result<(), DomainError>;

    /// Drop previously archived messages so a new run starts from an empty file.
    async fn clear_messages(&self, user: &str, group_id: i64) -> Result<(), DomainError>;

    /// Directory that receives media files of `(user, group_id)`.
    fn media_dir(&self, user: &str, group_id: i64) -> PathBuf;
}
