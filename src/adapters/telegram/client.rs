//! Implements TgClient using grammers.
//!
//! One `GrammersTgClient` per session handle: it opens its own SQLite session file and
//! runs its own sender pool, so clients on different handles never share connection
//! state. FloodWait on history requests is handled by sleeping and retrying.

use crate::adapters::telegram::{mapper, session};
use crate::domain::{
    Challenge, DomainError, Group, MediaReference, Message, SessionHandle, SignInOutcome,
};
use crate::ports::{TgClient, TgClientFactory};
use async_trait::async_trait;
use grammers_client::client::LoginToken;
use grammers_client::peer::Peer;
use grammers_client::{Client, InvocationError, SignInError, tl};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const FLOOD_WAIT_RETRIES: u32 = 3;

/// Builds one grammers client per session handle.
pub struct GrammersClientFactory {
    api_id: i32,
    api_hash: String,
    /// Optional pause before each history request.
    request_delay: Option<Duration>,
}

impl GrammersClientFactory {
    pub fn new(api_id: i32, api_hash: impl Into<String>, request_delay: Option<Duration>) -> Self {
        Self {
            api_id,
            api_hash: api_hash.into(),
            request_delay,
        }
    }
}

impl TgClientFactory for GrammersClientFactory {
    fn create(&self, session: &SessionHandle) -> Arc<dyn TgClient> {
        Arc::new(GrammersTgClient::new(
            session.path.clone(),
            self.api_id,
            self.api_hash.clone(),
            self.request_delay,
        ))
    }
}

struct Connection {
    client: Client,
    runner: JoinHandle<()>,
}

pub struct GrammersTgClient {
    session_path: PathBuf,
    api_id: i32,
    api_hash: String,
    request_delay: Option<Duration>,
    conn: Mutex<Option<Connection>>,
    /// Login tokens from `send_code`, keyed by the challenge's opaque hash.
    login_tokens: Mutex<HashMap<String, LoginToken>>,
    /// Resolved peers by bot-API dialog id; avoids a dialog walk per request.
    peers: Mutex<HashMap<i64, Peer>>,
}

impl GrammersTgClient {
    pub fn new(
        session_path: PathBuf,
        api_id: i32,
        api_hash: String,
        request_delay: Option<Duration>,
    ) -> Self {
        Self {
            session_path,
            api_id,
            api_hash,
            request_delay,
            conn: Mutex::new(None),
            login_tokens: Mutex::new(HashMap::new()),
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// Clone of the connected client. The lock is not held across network calls.
    async fn client(&self) -> Result<Client, DomainError> {
        self.conn
            .lock()
            .await
            .as_ref()
            .map(|c| c.client.clone())
            .ok_or_else(|| DomainError::Telegram("client is not connected".into()))
    }

    async fn resolve_peer(&self, group_id: i64) -> Result<Peer, DomainError> {
        if let Some(peer) = self.peers.lock().await.get(&group_id) {
            return Ok(peer.clone());
        }
        let client = self.client().await?;
        let mut dialogs = client.iter_dialogs();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::Telegram(e.to_string()))?
        {
            let peer = dialog.peer();
            if peer.id().bot_api_dialog_id() == group_id {
                self.peers.lock().await.insert(group_id, peer.clone());
                return Ok(peer.clone());
            }
        }
        Err(DomainError::NotFound(format!("group {} not in dialogs", group_id)))
    }
}

#[async_trait]
impl TgClient for GrammersTgClient {
    async fn connect(&self) -> Result<(), DomainError> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Ok(());
        }
        let session = Arc::new(session::open_file_session(&self.session_path).await?);
        let pool = grammers_client::SenderPool::new(session, self.api_id);
        let handle = pool.handle.clone();
        let runner = tokio::spawn(async move {
            pool.runner.run().await;
        });
        *conn = Some(Connection {
            client: Client::new(handle),
            runner,
        });
        debug!(path = %self.session_path.display(), "telegram client connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        if let Some(conn) = self.conn.lock().await.take() {
            drop(conn.client);
            conn.runner.abort();
            self.login_tokens.lock().await.clear();
            self.peers.lock().await.clear();
            debug!(path = %self.session_path.display(), "telegram client disconnected");
        }
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, DomainError> {
        self.client()
            .await?
            .is_authorized()
            .await
            .map_err(|e| DomainError::Telegram(e.to_string()))
    }

    async fn send_code(&self, phone: &str) -> Result<Challenge, DomainError> {
        let token = self
            .client()
            .await?
            .request_login_code(phone, &self.api_hash)
            .await
            .map_err(|e| DomainError::Telegram(format!("request_login_code: {}", e)))?;
        let key = Uuid::new_v4().simple().to_string();
        self.login_tokens.lock().await.insert(key.clone(), token);
        Ok(Challenge { opaque_hash: key })
    }

    async fn sign_in(
        &self,
        _phone: &str,
        code: &str,
        challenge: &Challenge,
    ) -> Result<SignInOutcome, DomainError> {
        let token = self
            .login_tokens
            .lock()
            .await
            .remove(&challenge.opaque_hash)
            .ok_or_else(|| DomainError::Telegram("unknown or expired login challenge".into()))?;
        match self.client().await?.sign_in(&token, code).await {
            Ok(_user) => {
                info!(path = %self.session_path.display(), "signed in");
                Ok(SignInOutcome::Authorized)
            }
            Err(SignInError::PasswordRequired(pt)) => Ok(SignInOutcome::TwoFactorRequired {
                hint: pt.hint().map(String::from),
            }),
            Err(SignInError::InvalidCode) => {
                Err(DomainError::Telegram("invalid login code".into()))
            }
            Err(SignInError::SignUpRequired) => Err(DomainError::Telegram(
                "sign-up required; create the account with an official app first".into(),
            )),
            Err(e) => Err(DomainError::Telegram(format!("sign in: {}", e))),
        }
    }

    async fn get_groups(&self) -> Result<Vec<Group>, DomainError> {
        let client = self.client().await?;
        let mut dialogs = client.iter_dialogs();
        let mut groups = Vec::new();
        while let Some(dialog) = dialogs
            .next()
            .await
            .map_err(|e| DomainError::Telegram(e.to_string()))?
        {
            let peer = dialog.peer();
            let Some(kind) = mapper::group_kind_from_peer(peer) else {
                continue;
            };
            let id = peer.id().bot_api_dialog_id();
            groups.push(Group {
                id,
                name: peer
                    .name()
                    .map(String::from)
                    .unwrap_or_else(|| id.to_string()),
                username: peer.username().map(String::from),
                kind,
            });
            self.peers.lock().await.insert(id, peer.clone());
        }
        Ok(groups)
    }

    async fn export_invite_link(&self, group_id: i64) -> Result<String, DomainError> {
        use tl::enums::ExportedChatInvite;

        let peer_ref = self
            .resolve_peer(group_id)
            .await?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::Telegram("peer not in session cache".into()))?;
        let client = self.client().await?;
        let req = tl::functions::messages::ExportChatInvite {
            legacy_revoke_permanent: false,
            request_needed: false,
            peer: peer_ref.into(),
            expire_date: None,
            usage_limit: None,
            title: None,
            subscription_pricing: None,
        };
        match client
            .invoke(&req)
            .await
            .map_err(|e| DomainError::Telegram(format!("export invite: {}", e)))?
        {
            ExportedChatInvite::ChatInviteExported(invite) => Ok(invite.link),
            ExportedChatInvite::ChatInvitePublicJoinRequests => Err(DomainError::NotFound(
                format!("group {} only accepts join requests", group_id),
            )),
        }
    }

    async fn get_messages(
        &self,
        group_id: i64,
        min_id: i32,
        max_id: i32,
        limit: i32,
    ) -> Result<Vec<Message>, DomainError> {
        use tl::enums::messages::Messages;

        if let Some(delay) = self.request_delay {
            tokio::time::sleep(delay).await;
        }

        let peer_ref = self
            .resolve_peer(group_id)
            .await?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::Telegram("peer not in session cache".into()))?;
        let input_peer: tl::enums::InputPeer = peer_ref.into();
        let client = self.client().await?;

        // Paging backwards needs offset_id = max_id, otherwise the newest page comes back.
        let offset_id = if max_id > 0 { max_id } else { 0 };

        let mut last_wait = 0u64;
        for attempt in 0..FLOOD_WAIT_RETRIES {
            let req = tl::functions::messages::GetHistory {
                peer: input_peer.clone(),
                offset_id,
                offset_date: 0,
                add_offset: 0,
                limit,
                max_id,
                min_id,
                hash: 0,
            };

            match client.invoke(&req).await {
                Ok(raw) => {
                    let messages = match raw {
                        Messages::Messages(m) => m.messages,
                        Messages::Slice(m) => m.messages,
                        Messages::ChannelMessages(m) => m.messages,
                        Messages::NotModified(_) => return Ok(vec![]),
                    };
                    return Ok(messages
                        .iter()
                        .filter_map(|m| mapper::message_to_domain(m, group_id))
                        .collect());
                }
                Err(InvocationError::Rpc(rpc)) if rpc.code == 420 => {
                    let wait_secs = rpc.value.unwrap_or(60) as u64;
                    warn!(group_id, attempt, wait_secs, "FloodWait, sleeping");
                    last_wait = wait_secs;
                    tokio::time::sleep(Duration::from_secs(wait_secs)).await;
                }
                Err(e) => return Err(DomainError::Telegram(e.to_string())),
            }
        }
        Err(DomainError::FloodWait {
            seconds: last_wait,
        })
    }

    async fn download_media(
        &self,
        media_ref: &MediaReference,
        dest_path: &Path,
    ) -> Result<(), DomainError> {
        let peer_ref = self
            .resolve_peer(media_ref.group_id)
            .await?
            .to_ref()
            .await
            .ok_or_else(|| DomainError::Media("peer not in session cache".into()))?;
        let client = self.client().await?;

        let msg = client
            .get_messages_by_id(peer_ref, &[media_ref.message_id])
            .await
            .map_err(|e| DomainError::Media(e.to_string()))?
            .into_iter()
            .next()
            .flatten()
            .ok_or_else(|| DomainError::Media("message not found".into()))?;
        let media = msg
            .media()
            .ok_or_else(|| DomainError::Media("message has no media".into()))?;

        client
            .download_media(&media, dest_path)
            .await
            .map_err(|e| DomainError::Media(e.to_string()))?;
        debug!(
            group_id = media_ref.group_id,
            msg_id = media_ref.message_id,
            path = %dest_path.display(),
            "media downloaded"
        );
        Ok(())
    }
}
