//! Generic lifecycle for long background operations (archive download, monitoring).
//!
//! register -> isolated session -> `starting` event -> work -> terminal status + event ->
//! release sessions. The release runs on every exit path, panics included.

use crate::domain::{DomainError, OperationKind, OperationRecord, OperationStatus, SessionHandle, Topic};
use crate::usecases::{EventBus, OperationRegistry, SessionStore};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How the work of an operation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Ran to the end but did not achieve its goal (e.g. user not authorized).
    Failed(String),
    /// Observed cancellation and wound down.
    Stopped,
}

/// What to launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub id: String,
    pub kind: OperationKind,
    /// Topic of status events.
    pub topic: Topic,
    /// Topic of the event published when the work errors out.
    pub error_topic: Topic,
    /// Name of the identifier field in event payloads (`operation_id`, `instance_id`).
    pub id_field: &'static str,
    /// Session owner allocated before the work starts, if any.
    pub user: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Handed to the work closure. Cheap to clone.
#[derive(Clone)]
pub struct RunContext {
    operation_id: String,
    topic: Topic,
    id_field: &'static str,
    session: Option<SessionHandle>,
    registry: Arc<OperationRegistry>,
    events: Arc<EventBus>,
    sessions: Arc<SessionStore>,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    /// The session allocated for [`LaunchSpec::user`].
    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    /// Allocate another isolated session owned by this operation; released with it.
    pub async fn session_for(&self, user: &str) -> SessionHandle {
        self.sessions.create_isolated(user, &self.operation_id).await
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move from one of `from` to `to` and publish it. Fails if the record moved on
    /// meanwhile (e.g. a stop request won the race).
    pub async fn advance(
        &self,
        from: &[OperationStatus],
        to: OperationStatus,
    ) -> Result<(), DomainError> {
        self.registry
            .compare_and_set(&self.operation_id, from, to)
            .await?;
        self.publish(self.topic, json!({ "status": to.as_str() }));
        Ok(())
    }

    pub async fn set_metadata(&self, key: &str, value: impl ToString) {
        if let Err(e) = self
            .registry
            .set_metadata(&self.operation_id, key, value.to_string())
            .await
        {
            warn!(operation_id = %self.operation_id, error = %e, "metadata update failed");
        }
    }

    /// Publish on `topic`; the operation identifier is added to the payload.
    pub fn publish(&self, topic: Topic, payload: Value) {
        self.events
            .publish(topic, with_id(self.id_field, &self.operation_id, payload));
    }
}

fn with_id(field: &str, id: &str, payload: Value) -> Value {
    let mut out = Map::new();
    out.insert(field.to_string(), Value::String(id.to_string()));
    if let Value::Object(extra) = payload {
        out.extend(extra);
    }
    Value::Object(out)
}

pub struct OperationRunner {
    registry: Arc<OperationRegistry>,
    events: Arc<EventBus>,
    sessions: Arc<SessionStore>,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl OperationRunner {
    pub fn new(
        registry: Arc<OperationRegistry>,
        events: Arc<EventBus>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            registry,
            events,
            sessions,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Register the record and spawn the work. Returns the freshly registered record.
    pub async fn launch<F, Fut>(
        self: &Arc<Self>,
        spec: LaunchSpec,
        work: F,
    ) -> Result<OperationRecord, DomainError>
    where
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutcome, DomainError>> + Send + 'static,
    {
        let record = self
            .registry
            .register(&spec.id, spec.kind, spec.metadata.clone())
            .await?;
        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .await
            .insert(spec.id.clone(), cancel.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move { this.drive(spec, cancel, work).await });
        Ok(record)
    }

    /// Request cooperative cancellation. Returns whether the operation was still running.
    pub async fn cancel(&self, id: &str) -> bool {
        match self.cancels.lock().await.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel everything still running (shutdown).
    pub async fn cancel_all(&self) {
        for token in self.cancels.lock().await.values() {
            token.cancel();
        }
    }

    async fn drive<F, Fut>(self: Arc<Self>, spec: LaunchSpec, cancel: CancellationToken, work: F)
    where
        F: FnOnce(RunContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutcome, DomainError>> + Send + 'static,
    {
        let session = match &spec.user {
            Some(user) => Some(self.sessions.create_isolated(user, &spec.id).await),
            None => None,
        };
        let ctx = RunContext {
            operation_id: spec.id.clone(),
            topic: spec.topic,
            id_field: spec.id_field,
            session,
            registry: Arc::clone(&self.registry),
            events: Arc::clone(&self.events),
            sessions: Arc::clone(&self.sessions),
            cancel,
        };
        ctx.publish(spec.topic, json!({ "status": "starting" }));
        info!(operation_id = %spec.id, kind = ?spec.kind, "operation started");

        // Nested task so a panic in the work still reaches the cleanup below.
        let (status, message) = match tokio::spawn(work(ctx.clone())).await {
            Ok(Ok(TaskOutcome::Completed)) => (OperationStatus::Completed, None),
            Ok(Ok(TaskOutcome::Failed(msg))) => (OperationStatus::Failed, Some(msg)),
            Ok(Ok(TaskOutcome::Stopped)) => (OperationStatus::Stopped, None),
            Ok(Err(e)) => (OperationStatus::Error, Some(e.to_string())),
            Err(join) => (OperationStatus::Error, Some(format!("task aborted: {}", join))),
        };

        if let Err(e) = self
            .registry
            .update_status(&spec.id, status, message.clone())
            .await
        {
            warn!(operation_id = %spec.id, error = %e, "final status refused");
        }

        let mut payload = json!({ "status": status.as_str() });
        if let Some(msg) = &message {
            payload["error"] = json!(msg);
        }
        let topic = if status == OperationStatus::Error {
            error!(operation_id = %spec.id, error = ?message, "operation errored");
            spec.error_topic
        } else {
            info!(operation_id = %spec.id, status = %status, "operation finished");
            spec.topic
        };
        ctx.publish(topic, payload);

        self.sessions.release(&spec.id, None).await;
        self.cancels.lock().await.remove(&spec.id);
    }
}
