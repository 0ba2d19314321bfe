//! Opens grammers session files.
//!
//! Uses grammers-session's SqliteSession so authorization survives restarts. Each
//! session handle issued by the session store maps to exactly one such file.

use crate::domain::DomainError;
use grammers_session::storages::SqliteSession;
use std::path::Path;

/// Opens (or creates) the SQLite session file at `path`, creating parent directories.
pub async fn open_file_session(path: impl AsRef<Path>) -> Result<SqliteSession, DomainError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DomainError::Session(format!("create session directory: {}", e)))?;
    }
    SqliteSession::open(path)
        .await
        .map_err(|e| DomainError::Session(format!("open session file {}: {}", path.display(), e)))
}
