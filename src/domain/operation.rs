//! Operation records and the status vocabulary shared by every long-running task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Authentication,
    ArchiveDownload,
    Monitoring,
}

/// Status of an operation. Authentication records mirror the [`AuthPhase`] values;
/// archive and monitoring records use the runner statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Started,
    Downloading,
    Active,
    Stopping,
    WaitingForCode,
    CodeSent,
    VerifyingCode,
    Authenticated,
    AlreadyAuthenticated,
    PasswordRequired,
    Completed,
    Failed,
    Stopped,
    Error,
    Timeout,
}

impl OperationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationStatus::Pending => "pending",
            OperationStatus::Started => "started",
            OperationStatus::Downloading => "downloading",
            OperationStatus::Active => "active",
            OperationStatus::Stopping => "stopping",
            OperationStatus::WaitingForCode => "waiting_for_code",
            OperationStatus::CodeSent => "code_sent",
            OperationStatus::VerifyingCode => "verifying_code",
            OperationStatus::Authenticated => "authenticated",
            OperationStatus::AlreadyAuthenticated => "already_authenticated",
            OperationStatus::PasswordRequired => "password_required",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Stopped => "stopped",
            OperationStatus::Error => "error",
            OperationStatus::Timeout => "timeout",
        }
    }

    /// Terminal statuses are sticky: the registry refuses any later transition.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OperationStatus::Completed
                | OperationStatus::Failed
                | OperationStatus::Stopped
                | OperationStatus::Error
                | OperationStatus::Timeout
                | OperationStatus::Authenticated
                | OperationStatus::AlreadyAuthenticated
                | OperationStatus::PasswordRequired
        )
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work tracked by the operation registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

/// Phases of the authentication state machine. Only ever moves forward:
/// `WaitingForCode -> CodeSent -> VerifyingCode -> terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    WaitingForCode,
    CodeSent,
    VerifyingCode,
    Authenticated,
    AlreadyAuthenticated,
    PasswordRequired,
    Timeout,
    Error,
}

impl AuthPhase {
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            AuthPhase::WaitingForCode | AuthPhase::CodeSent | AuthPhase::VerifyingCode
        )
    }

    /// Whether a verification code may still be supplied in this phase.
    pub fn accepts_code(self) -> bool {
        matches!(self, AuthPhase::WaitingForCode | AuthPhase::CodeSent)
    }

    pub fn as_str(self) -> &'static str {
        OperationStatus::from(self).as_str()
    }
}

impl From<AuthPhase> for OperationStatus {
    fn from(phase: AuthPhase) -> Self {
        match phase {
            AuthPhase::WaitingForCode => OperationStatus::WaitingForCode,
            AuthPhase::CodeSent => OperationStatus::CodeSent,
            AuthPhase::VerifyingCode => OperationStatus::VerifyingCode,
            AuthPhase::Authenticated => OperationStatus::Authenticated,
            AuthPhase::AlreadyAuthenticated => OperationStatus::AlreadyAuthenticated,
            AuthPhase::PasswordRequired => OperationStatus::PasswordRequired,
            AuthPhase::Timeout => OperationStatus::Timeout,
            AuthPhase::Error => OperationStatus::Error,
        }
    }
}

impl fmt::Display for AuthPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
