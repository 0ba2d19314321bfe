//! In-memory store and scripted Telegram client shared by unit tests.

use crate::domain::{
    Challenge, DomainError, Group, GroupKind, MediaReference, MediaType, Message, SessionHandle,
    SignInOutcome,
};
use crate::ports::{KvStore, TgClient, TgClientFactory};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Written into a session file by a successful mock sign-in.
pub const AUTH_MARKER: &[u8] = b"authorized";

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Map<String, Value>>>,
}

#[async_trait::async_trait]
impl KvStore for MemoryStore {
    async fn load(&self, name: &str) -> Result<Map<String, Value>, DomainError> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn save(&self, name: &str, doc: &Map<String, Value>) -> Result<(), DomainError> {
        self.docs
            .lock()
            .unwrap()
            .insert(name.to_string(), doc.clone());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum MockSignIn {
    Authorize,
    TwoFactor,
    Fail(String),
}

/// Behaviour and call log shared by every client a [`MockFactory`] creates.
pub struct MockTelegram {
    pub always_authorized: AtomicBool,
    pub sign_in: Mutex<MockSignIn>,
    pub send_code_error: Mutex<Option<String>>,
    pub groups: Mutex<Vec<Group>>,
    pub history: Mutex<HashMap<i64, Vec<Message>>>,
    pub failing_groups: Mutex<HashSet<i64>>,
    pub failing_media: Mutex<HashSet<i32>>,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub session_paths: Mutex<Vec<PathBuf>>,
    pub codes: Mutex<Vec<String>>,
    /// When set, the next `get_groups`/`get_messages` call parks here until notified.
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub gate_hits: AtomicUsize,
}

impl Default for MockTelegram {
    fn default() -> Self {
        Self {
            always_authorized: AtomicBool::new(false),
            sign_in: Mutex::new(MockSignIn::Authorize),
            send_code_error: Mutex::new(None),
            groups: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            failing_groups: Mutex::new(HashSet::new()),
            failing_media: Mutex::new(HashSet::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            session_paths: Mutex::new(Vec::new()),
            codes: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
            gate_hits: AtomicUsize::new(0),
        }
    }
}

impl MockTelegram {
    pub fn set_groups(&self, groups: Vec<Group>) {
        *self.groups.lock().unwrap() = groups;
    }

    pub fn push_messages(&self, group_id: i64, messages: Vec<Message>) {
        self.history
            .lock()
            .unwrap()
            .entry(group_id)
            .or_default()
            .extend(messages);
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Park the next remote read until the returned handle is notified.
    pub fn close_gate(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Wait until a call is parked at the gate.
    pub async fn wait_at_gate(&self) {
        for _ in 0..300 {
            if self.gate_hits.load(Ordering::SeqCst) > 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("no call reached the gate");
    }

    async fn pass_gate(&self) {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.gate_hits.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
        }
    }
}

#[derive(Clone, Default)]
pub struct MockFactory {
    pub telegram: Arc<MockTelegram>,
}

impl TgClientFactory for MockFactory {
    fn create(&self, session: &SessionHandle) -> Arc<dyn TgClient> {
        self.telegram
            .session_paths
            .lock()
            .unwrap()
            .push(session.path.clone());
        Arc::new(MockClient {
            telegram: Arc::clone(&self.telegram),
            path: session.path.clone(),
            connected: AtomicBool::new(false),
        })
    }
}

pub struct MockClient {
    telegram: Arc<MockTelegram>,
    path: PathBuf,
    connected: AtomicBool,
}

impl MockClient {
    fn ensure_connected(&self) -> Result<(), DomainError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DomainError::Telegram("not connected".into()))
        }
    }
}

#[async_trait::async_trait]
impl TgClient for MockClient {
    async fn connect(&self) -> Result<(), DomainError> {
        self.telegram.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        self.telegram.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool, DomainError> {
        self.ensure_connected()?;
        if self.telegram.always_authorized.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let content = tokio::fs::read(&self.path).await.unwrap_or_default();
        Ok(content == AUTH_MARKER)
    }

    async fn send_code(&self, phone: &str) -> Result<Challenge, DomainError> {
        self.ensure_connected()?;
        if let Some(err) = self.telegram.send_code_error.lock().unwrap().clone() {
            return Err(DomainError::Telegram(err));
        }
        Ok(Challenge {
            opaque_hash: format!("hash-{}", phone),
        })
    }

    async fn sign_in(
        &self,
        phone: &str,
        code: &str,
        challenge: &Challenge,
    ) -> Result<SignInOutcome, DomainError> {
        self.ensure_connected()?;
        assert_eq!(challenge.opaque_hash, format!("hash-{}", phone));
        self.telegram.codes.lock().unwrap().push(code.to_string());
        let behaviour = self.telegram.sign_in.lock().unwrap().clone();
        match behaviour {
            MockSignIn::Authorize => {
                tokio::fs::write(&self.path, AUTH_MARKER)
                    .await
                    .map_err(|e| DomainError::Session(e.to_string()))?;
                Ok(SignInOutcome::Authorized)
            }
            MockSignIn::TwoFactor => Ok(SignInOutcome::TwoFactorRequired {
                hint: Some("pet name".into()),
            }),
            MockSignIn::Fail(msg) => Err(DomainError::Telegram(msg)),
        }
    }

    async fn get_groups(&self) -> Result<Vec<Group>, DomainError> {
        self.ensure_connected()?;
        self.telegram.pass_gate().await;
        Ok(self.telegram.groups.lock().unwrap().clone())
    }

    async fn get_messages(
        &self,
        group_id: i64,
        min_id: i32,
        max_id: i32,
        limit: i32,
    ) -> Result<Vec<Message>, DomainError> {
        self.ensure_connected()?;
        self.telegram.pass_gate().await;
        if self.telegram.failing_groups.lock().unwrap().contains(&group_id) {
            return Err(DomainError::Telegram(format!("CHANNEL_PRIVATE {}", group_id)));
        }
        let mut out: Vec<Message> = self
            .telegram
            .history
            .lock()
            .unwrap()
            .get(&group_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.id > min_id && (max_id == 0 || m.id < max_id))
            .collect();
        out.sort_by(|a, b| b.id.cmp(&a.id));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn export_invite_link(&self, group_id: i64) -> Result<String, DomainError> {
        self.ensure_connected()?;
        Ok(format!("https://t.me/+invite{}", group_id.unsigned_abs()))
    }

    async fn download_media(
        &self,
        media_ref: &MediaReference,
        dest_path: &Path,
    ) -> Result<(), DomainError> {
        self.ensure_connected()?;
        if self
            .telegram
            .failing_media
            .lock()
            .unwrap()
            .contains(&media_ref.message_id)
        {
            return Err(DomainError::Media("FILE_REFERENCE_EXPIRED".into()));
        }
        tokio::fs::write(dest_path, format!("media-{}", media_ref.message_id))
            .await
            .map_err(|e| DomainError::Media(e.to_string()))
    }
}

pub fn group(id: i64, name: &str) -> Group {
    Group {
        id,
        name: name.to_string(),
        username: None,
        kind: GroupKind::Supergroup,
    }
}

pub fn message(group_id: i64, id: i32, with_media: bool) -> Message {
    Message {
        id,
        group_id,
        date: 1_700_000_000 + i64::from(id),
        text: format!("message {}", id),
        media: with_media.then_some(MediaReference {
            message_id: id,
            group_id,
            media_type: MediaType::Photo,
        }),
        from_user_id: Some(42),
        reply_to_msg_id: None,
    }
}
