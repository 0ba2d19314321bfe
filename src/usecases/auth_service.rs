//! Authentication orchestrator.
//!
//! Drives one login per auth id on its own task:
//! `WaitingForCode -> CodeSent -> VerifyingCode -> terminal`.
//! The verification code arrives later through [`AuthService::supply_code`]; the task waits
//! for it on a [`Notify`] with a hard deadline. Every transition is mirrored into the
//! operation registry and published on the `auth_status` topic before the next one starts.

use crate::domain::{
    AuthPhase, Challenge, DomainError, OperationKind, OperationStatus, SessionHandle,
    SignInOutcome, Topic,
};
use crate::ports::{TgClient, TgClientFactory};
use crate::usecases::user_service::{validate_nickname, validate_phone};
use crate::usecases::{EventBus, OperationRegistry, SessionStore, UserService};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// How long the flow waits for the verification code.
    pub code_timeout: Duration,
    /// How long a finished context stays queryable.
    pub retention: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            code_timeout: Duration::from_secs(300),
            retention: Duration::from_secs(600),
        }
    }
}

/// Returned by [`AuthService::start`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthTicket {
    pub auth_id: String,
    pub status: OperationStatus,
}

/// Caller-facing view of an authentication attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatusView {
    pub auth_id: String,
    pub nickname: String,
    pub phone: String,
    pub status: OperationStatus,
    pub error: Option<String>,
}

struct AuthContext {
    nickname: String,
    phone: String,
    phase: AuthPhase,
    code: Option<String>,
    code_received: bool,
    challenge: Option<Challenge>,
    error: Option<String>,
}

struct AuthEntry {
    auth_id: String,
    ctx: Mutex<AuthContext>,
    code_arrived: Notify,
}

impl AuthEntry {
    /// Move forward to `phase`. Backward moves and moves out of a terminal phase are refused.
    async fn transition(&self, phase: AuthPhase, error: Option<String>) -> bool {
        let mut ctx = self.ctx.lock().await;
        if ctx.phase.is_terminal() || phase < ctx.phase {
            warn!(
                auth_id = %self.auth_id,
                from = %ctx.phase,
                to = %phase,
                "refusing backward auth transition"
            );
            return false;
        }
        ctx.phase = phase;
        if error.is_some() {
            ctx.error = error;
        }
        true
    }
}

enum CodeWait {
    Received(String),
    TimedOut,
}

pub struct AuthService {
    sessions: Arc<SessionStore>,
    registry: Arc<OperationRegistry>,
    events: Arc<EventBus>,
    clients: Arc<dyn TgClientFactory>,
    users: Arc<UserService>,
    settings: AuthSettings,
    contexts: Arc<Mutex<HashMap<String, Arc<AuthEntry>>>>,
}

impl AuthService {
    pub fn new(
        sessions: Arc<SessionStore>,
        registry: Arc<OperationRegistry>,
        events: Arc<EventBus>,
        clients: Arc<dyn TgClientFactory>,
        users: Arc<UserService>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            sessions,
            registry,
            events,
            clients,
            users,
            settings,
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register an authentication attempt and start driving it in the background.
    pub async fn start(
        self: &Arc<Self>,
        nickname: &str,
        phone: &str,
    ) -> Result<AuthTicket, DomainError> {
        let nickname = nickname.trim();
        let phone = phone.trim();
        validate_nickname(nickname)?;
        validate_phone(phone)?;

        let auth_id = format!("auth-{}", Uuid::new_v4().simple());
        let entry = Arc::new(AuthEntry {
            auth_id: auth_id.clone(),
            ctx: Mutex::new(AuthContext {
                nickname: nickname.to_string(),
                phone: phone.to_string(),
                phase: AuthPhase::WaitingForCode,
                code: None,
                code_received: false,
                challenge: None,
                error: None,
            }),
            code_arrived: Notify::new(),
        });

        {
            let mut contexts = self.contexts.lock().await;
            for other in contexts.values() {
                let ctx = other.ctx.lock().await;
                if ctx.nickname == nickname && !ctx.phase.is_terminal() {
                    return Err(DomainError::Conflict {
                        message: format!(
                            "authentication {} for '{}' is still in progress",
                            other.auth_id, nickname
                        ),
                        status: ctx.phase.to_string(),
                    });
                }
            }
            let metadata = BTreeMap::from([
                ("nickname".to_string(), nickname.to_string()),
                ("phone".to_string(), phone.to_string()),
            ]);
            self.registry
                .register(&auth_id, OperationKind::Authentication, metadata)
                .await?;
            contexts.insert(auth_id.clone(), Arc::clone(&entry));
        }

        info!(auth_id = %auth_id, nickname, "authentication started");
        self.events.publish(
            Topic::AuthStatus,
            json!({
                "auth_id": auth_id,
                "nickname": nickname,
                "status": "starting",
                "message": "Authentication starting",
            }),
        );

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(entry).await });

        Ok(AuthTicket {
            auth_id,
            status: OperationStatus::Pending,
        })
    }

    /// Hand the verification code to a waiting flow.
    ///
    /// Accepted once, and only while the flow is `waiting_for_code` or `code_sent`.
    pub async fn supply_code(&self, auth_id: &str, code: &str) -> Result<(), DomainError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(DomainError::InvalidInput("code is required".into()));
        }
        let entry = match self.entry(auth_id).await {
            Ok(entry) => entry,
            Err(e) => {
                // Disposed contexts are finished; answer from the registry record.
                let record = self.registry.get(auth_id).await.map_err(|_| e)?;
                if record.kind != OperationKind::Authentication {
                    return Err(DomainError::NotFound(format!("authentication {}", auth_id)));
                }
                return Err(DomainError::Conflict {
                    message: format!("cannot accept code: current status is {}", record.status),
                    status: record.status.to_string(),
                });
            }
        };
        let nickname = {
            let mut ctx = entry.ctx.lock().await;
            if !ctx.phase.accepts_code() || ctx.code_received {
                return Err(DomainError::Conflict {
                    message: format!("cannot accept code: current status is {}", ctx.phase),
                    status: ctx.phase.to_string(),
                });
            }
            ctx.code = Some(code.to_string());
            ctx.code_received = true;
            ctx.nickname.clone()
        };
        entry.code_arrived.notify_one();

        info!(auth_id, "verification code received");
        self.events.publish(
            Topic::AuthStatus,
            json!({
                "auth_id": auth_id,
                "nickname": nickname,
                "status": "code_received",
                "message": "Verification code received",
            }),
        );
        Ok(())
    }

    /// Current phase of an attempt. Falls back to the registry once the context was disposed.
    pub async fn status(&self, auth_id: &str) -> Result<AuthStatusView, DomainError> {
        if let Ok(entry) = self.entry(auth_id).await {
            let ctx = entry.ctx.lock().await;
            return Ok(AuthStatusView {
                auth_id: auth_id.to_string(),
                nickname: ctx.nickname.clone(),
                phone: ctx.phone.clone(),
                status: ctx.phase.into(),
                error: ctx.error.clone(),
            });
        }
        let record = self.registry.get(auth_id).await?;
        if record.kind != OperationKind::Authentication {
            return Err(DomainError::NotFound(format!("authentication {}", auth_id)));
        }
        Ok(AuthStatusView {
            auth_id: record.id,
            nickname: record.metadata.get("nickname").cloned().unwrap_or_default(),
            phone: record.metadata.get("phone").cloned().unwrap_or_default(),
            status: record.status,
            error: record.error,
        })
    }

    async fn entry(&self, auth_id: &str) -> Result<Arc<AuthEntry>, DomainError> {
        self.contexts
            .lock()
            .await
            .get(auth_id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("authentication {}", auth_id)))
    }

    async fn run(self: Arc<Self>, entry: Arc<AuthEntry>) {
        let auth_id = entry.auth_id.clone();
        let nickname = entry.ctx.lock().await.nickname.clone();

        let session = self.sessions.create_isolated(&nickname, &auth_id).await;
        let client = self.clients.create(&session);
        self.announce(&entry, AuthPhase::WaitingForCode, "Waiting for verification code", None)
            .await;

        let mut connected = false;
        let result = self
            .drive(&entry, client.as_ref(), &session, &mut connected)
            .await;

        if let Err(e) = result {
            let message = e.to_string();
            error!(auth_id = %auth_id, error = %message, "authentication failed");
            if entry
                .transition(AuthPhase::Error, Some(message.clone()))
                .await
            {
                self.announce(&entry, AuthPhase::Error, "Authentication failed", Some(message))
                    .await;
            }
        }

        if connected {
            if let Err(e) = client.disconnect().await {
                warn!(auth_id = %auth_id, error = %e, "disconnect failed");
            }
        }
        self.sessions.release(&auth_id, Some(&nickname)).await;
        self.schedule_disposal(auth_id);
    }

    /// The state machine proper. Returns `Err` for failures that end in `Error`.
    async fn drive(
        &self,
        entry: &AuthEntry,
        client: &dyn TgClient,
        session: &SessionHandle,
        connected: &mut bool,
    ) -> Result<(), DomainError> {
        let (nickname, phone) = {
            let ctx = entry.ctx.lock().await;
            (ctx.nickname.clone(), ctx.phone.clone())
        };

        client.connect().await?;
        *connected = true;

        if client.is_authorized().await? {
            if entry
                .transition(AuthPhase::AlreadyAuthenticated, None)
                .await
            {
                self.announce(entry, AuthPhase::AlreadyAuthenticated, "Already authenticated", None)
                    .await;
            }
            self.users.save_phone(&nickname, &phone).await?;
            return Ok(());
        }

        let challenge = client.send_code(&phone).await?;
        entry.ctx.lock().await.challenge = Some(challenge.clone());
        if entry.transition(AuthPhase::CodeSent, None).await {
            self.publish_phase(
                entry,
                AuthPhase::CodeSent,
                "Verification code sent",
                json!({ "phone_code_hash": challenge.opaque_hash }),
            )
            .await;
        }

        let code = match self.wait_for_code(entry).await {
            CodeWait::Received(code) => code,
            CodeWait::TimedOut => {
                info!(auth_id = %entry.auth_id, "no verification code before deadline");
                self.announce(entry, AuthPhase::Timeout, "Timed out waiting for code", None)
                    .await;
                return Ok(());
            }
        };

        if entry.transition(AuthPhase::VerifyingCode, None).await {
            self.announce(entry, AuthPhase::VerifyingCode, "Verifying code", None)
                .await;
        }

        match client.sign_in(&phone, &code, &challenge).await? {
            SignInOutcome::Authorized => {
                // Flush the working copy before it replaces the canonical session.
                client.disconnect().await?;
                *connected = false;
                self.sessions.promote(session).await?;
                if entry.transition(AuthPhase::Authenticated, None).await {
                    self.announce(entry, AuthPhase::Authenticated, "Authentication successful", None)
                        .await;
                }
                self.users.save_phone(&nickname, &phone).await?;
            }
            SignInOutcome::TwoFactorRequired { hint } => {
                if entry
                    .transition(AuthPhase::PasswordRequired, None)
                    .await
                {
                    self.publish_phase(
                        entry,
                        AuthPhase::PasswordRequired,
                        "Two-factor password required",
                        json!({ "hint": hint }),
                    )
                    .await;
                }
            }
        }
        Ok(())
    }

    /// Wait until a code is supplied or the deadline passes. On timeout the phase is
    /// switched to `Timeout` under the context lock, so a concurrent `supply_code`
    /// either lands before (and is used) or is rejected.
    async fn wait_for_code(&self, entry: &AuthEntry) -> CodeWait {
        let deadline = Instant::now() + self.settings.code_timeout;
        loop {
            {
                let mut ctx = entry.ctx.lock().await;
                if ctx.code_received {
                    if let Some(code) = ctx.code.take() {
                        return CodeWait::Received(code);
                    }
                }
            }
            if tokio::time::timeout_at(deadline, entry.code_arrived.notified())
                .await
                .is_err()
            {
                let mut ctx = entry.ctx.lock().await;
                if ctx.code_received {
                    if let Some(code) = ctx.code.take() {
                        return CodeWait::Received(code);
                    }
                }
                ctx.phase = AuthPhase::Timeout;
                return CodeWait::TimedOut;
            }
        }
    }

    async fn announce(
        &self,
        entry: &AuthEntry,
        phase: AuthPhase,
        message: &str,
        error: Option<String>,
    ) {
        let extra = match &error {
            Some(e) => json!({ "error": e }),
            None => json!({}),
        };
        self.mirror(entry, phase, error).await;
        self.publish(entry, phase, message, extra).await;
    }

    async fn publish_phase(&self, entry: &AuthEntry, phase: AuthPhase, message: &str, extra: Value) {
        self.mirror(entry, phase, None).await;
        self.publish(entry, phase, message, extra).await;
    }

    async fn mirror(&self, entry: &AuthEntry, phase: AuthPhase, error: Option<String>) {
        if let Err(e) = self
            .registry
            .update_status(&entry.auth_id, phase.into(), error)
            .await
        {
            warn!(auth_id = %entry.auth_id, error = %e, "registry update refused");
        }
    }

    async fn publish(&self, entry: &AuthEntry, phase: AuthPhase, message: &str, extra: Value) {
        let nickname = entry.ctx.lock().await.nickname.clone();
        let mut payload = json!({
            "auth_id": entry.auth_id,
            "nickname": nickname,
            "status": phase.as_str(),
            "message": message,
        });
        if let (Value::Object(target), Value::Object(extra)) = (&mut payload, extra) {
            target.extend(extra);
        }
        info!(auth_id = %entry.auth_id, status = %phase, "auth status");
        self.events.publish(Topic::AuthStatus, payload);
    }

    fn schedule_disposal(&self, auth_id: String) {
        let contexts = Arc::clone(&self.contexts);
        let retention = self.settings.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            if contexts.lock().await.remove(&auth_id).is_some() {
                debug!(auth_id = %auth_id, "auth context disposed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Event;
    use crate::ports::KvStore;
    use crate::test_support::{AUTH_MARKER, MemoryStore, MockFactory, MockSignIn};
    use crate::usecases::SessionStoreSettings;
    use crate::usecases::event_bus::Subscription;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        auth: Arc<AuthService>,
        factory: MockFactory,
        sessions: Arc<SessionStore>,
        users: Arc<UserService>,
        registry: Arc<OperationRegistry>,
        events: Arc<EventBus>,
    }

    fn harness(settings: AuthSettings) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(
            tmp.path(),
            SessionStoreSettings {
                release_attempts: 2,
                release_backoff: Duration::from_millis(5),
            },
        ));
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::default());
        let factory = MockFactory::default();
        let users = Arc::new(UserService::new(
            store,
            Arc::clone(&sessions),
            Arc::new(factory.clone()),
        ));
        let registry = Arc::new(OperationRegistry::new());
        let events = Arc::new(EventBus::default());
        let auth = Arc::new(AuthService::new(
            Arc::clone(&sessions),
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::new(factory.clone()),
            Arc::clone(&users),
            settings,
        ));
        Harness {
            _tmp: tmp,
            auth,
            factory,
            sessions,
            users,
            registry,
            events,
        }
    }

    fn quick() -> AuthSettings {
        AuthSettings {
            code_timeout: Duration::from_secs(5),
            retention: Duration::from_secs(60),
        }
    }

    async fn wait_for(auth: &AuthService, auth_id: &str, status: OperationStatus) {
        for _ in 0..200 {
            if auth.status(auth_id).await.unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "{} never reached {}, last status {}",
            auth_id,
            status,
            auth.status(auth_id).await.unwrap().status
        );
    }

    async fn next_status(sub: &mut Subscription) -> String {
        let event: Event = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        event.payload["status"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn code_flow_authenticates_and_persists_mapping() {
        let h = harness(quick());
        let mut sub = h.events.subscribe(Some(Topic::AuthStatus));

        let ticket = h.auth.start("alice", "+391234567891").await.unwrap();
        assert_eq!(ticket.status, OperationStatus::Pending);

        let mut seen = Vec::new();
        while seen.last().map(String::as_str) != Some("code_sent") {
            seen.push(next_status(&mut sub).await);
        }
        h.auth.supply_code(&ticket.auth_id, "12345").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::Authenticated).await;

        while seen.last().map(String::as_str) != Some("authenticated") {
            seen.push(next_status(&mut sub).await);
        }
        assert_eq!(
            seen,
            [
                "starting",
                "waiting_for_code",
                "code_sent",
                "code_received",
                "verifying_code",
                "authenticated"
            ]
        );

        assert_eq!(
            h.users.phone_of("alice").await.unwrap().as_deref(),
            Some("+391234567891")
        );
        assert_eq!(*h.factory.telegram.codes.lock().unwrap(), ["12345"]);
        let canonical = std::fs::read(h.sessions.canonical("alice").path()).unwrap();
        assert_eq!(canonical, AUTH_MARKER);
        assert_eq!(
            h.registry.get(&ticket.auth_id).await.unwrap().status,
            OperationStatus::Authenticated
        );
    }

    #[tokio::test]
    async fn late_code_after_disposal_reports_final_phase() {
        let h = harness(AuthSettings {
            code_timeout: Duration::from_secs(5),
            retention: Duration::from_millis(20),
        });
        let ticket = h.auth.start("alice", "+391234567891").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::CodeSent).await;
        h.auth.supply_code(&ticket.auth_id, "12345").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::Authenticated).await;

        for _ in 0..100 {
            if h.auth.entry(&ticket.auth_id).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(h.auth.entry(&ticket.auth_id).await.is_err());
        match h.auth.supply_code(&ticket.auth_id, "12345").await {
            Err(DomainError::Conflict { status, .. }) => assert_eq!(status, "authenticated"),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert!(matches!(
            h.auth.supply_code("auth-missing", "12345").await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn second_code_submission_is_rejected_with_current_phase() {
        let h = harness(quick());
        let ticket = h.auth.start("alice", "+391234567891").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::CodeSent).await;

        h.auth.supply_code(&ticket.auth_id, "12345").await.unwrap();
        let err = h
            .auth
            .supply_code(&ticket.auth_id, "54321")
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));

        wait_for(&h.auth, &ticket.auth_id, OperationStatus::Authenticated).await;
        match h.auth.supply_code(&ticket.auth_id, "54321").await {
            Err(DomainError::Conflict { status, .. }) => assert_eq!(status, "authenticated"),
            other => panic!("expected conflict, got {:?}", other),
        }
        assert_eq!(*h.factory.telegram.codes.lock().unwrap(), ["12345"]);
    }

    #[tokio::test]
    async fn missing_code_times_out_and_disconnects_once() {
        let h = harness(AuthSettings {
            code_timeout: Duration::from_millis(100),
            retention: Duration::from_secs(60),
        });
        let ticket = h.auth.start("bob", "+391111111111").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::Timeout).await;

        // The finally block runs right after the terminal transition.
        for _ in 0..100 {
            if h.sessions.live_handles().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.factory.telegram.connect_count(), 1);
        assert_eq!(h.factory.telegram.disconnect_count(), 1);
        assert!(h.sessions.live_handles().await.is_empty());

        let err = h.auth.supply_code(&ticket.auth_id, "12345").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
        assert_eq!(
            h.auth.status(&ticket.auth_id).await.unwrap().status,
            OperationStatus::Timeout
        );
        assert_eq!(h.users.phone_of("bob").await.unwrap(), None);
    }

    #[tokio::test]
    async fn authorized_session_short_circuits() {
        let h = harness(quick());
        h.factory
            .telegram
            .always_authorized
            .store(true, Ordering::SeqCst);
        let ticket = h.auth.start("carol", "+392222222222").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::AlreadyAuthenticated).await;

        let err = h.auth.supply_code(&ticket.auth_id, "1").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
        for _ in 0..100 {
            if h.users.phone_of("carol").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            h.users.phone_of("carol").await.unwrap().as_deref(),
            Some("+392222222222")
        );
    }

    #[tokio::test]
    async fn two_factor_account_ends_in_password_required() {
        let h = harness(quick());
        *h.factory.telegram.sign_in.lock().unwrap() = MockSignIn::TwoFactor;
        let ticket = h.auth.start("dave", "+393333333333").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::CodeSent).await;
        h.auth.supply_code(&ticket.auth_id, "11111").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::PasswordRequired).await;
        assert!(!h.sessions.canonical_exists("dave").await);
    }

    #[tokio::test]
    async fn sign_in_failure_records_error() {
        let h = harness(quick());
        *h.factory.telegram.sign_in.lock().unwrap() =
            MockSignIn::Fail("PHONE_CODE_INVALID".into());
        let ticket = h.auth.start("erin", "+394444444444").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::CodeSent).await;
        h.auth.supply_code(&ticket.auth_id, "00000").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::Error).await;

        let view = h.auth.status(&ticket.auth_id).await.unwrap();
        assert!(view.error.unwrap().contains("PHONE_CODE_INVALID"));
        let record = h.registry.get(&ticket.auth_id).await.unwrap();
        assert!(record.ended_at.is_some());
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn invalid_input_creates_nothing() {
        let h = harness(quick());
        assert!(matches!(
            h.auth.start("", "+391234567891").await,
            Err(DomainError::InvalidInput(_))
        ));
        assert!(matches!(
            h.auth.start("alice", "not-a-phone").await,
            Err(DomainError::InvalidInput(_))
        ));
        assert!(h.registry.list().await.is_empty());
        assert!(matches!(
            h.auth.supply_code("auth-missing", "123").await,
            Err(DomainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_attempt_for_same_user_is_rejected() {
        let h = harness(quick());
        let first = h.auth.start("frank", "+395555555555").await.unwrap();
        let err = h.auth.start("frank", "+395555555555").await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict { .. }));
        wait_for(&h.auth, &first.auth_id, OperationStatus::CodeSent).await;
    }

    #[tokio::test]
    async fn disposed_context_is_still_answered_from_registry() {
        let h = harness(AuthSettings {
            code_timeout: Duration::from_millis(50),
            retention: Duration::from_millis(50),
        });
        let ticket = h.auth.start("gina", "+396666666666").await.unwrap();
        wait_for(&h.auth, &ticket.auth_id, OperationStatus::Timeout).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(h.auth.entry(&ticket.auth_id).await.is_err());
        let view = h.auth.status(&ticket.auth_id).await.unwrap();
        assert_eq!(view.status, OperationStatus::Timeout);
        assert_eq!(view.nickname, "gina");
    }
}
