//! Session handles: identify a credential working copy on disk.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// A user's credential state backed by a session file.
///
/// `operation_id == None` marks the canonical, long-lived session of the user.
/// Every other handle is a disposable copy owned by one operation.
#[derive(Debug, Clone, Serialize)]
pub struct SessionHandle {
    pub user: String,
    pub operation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub path: PathBuf,
}

impl SessionHandle {
    pub fn is_canonical(&self) -> bool {
        self.operation_id.is_none()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
