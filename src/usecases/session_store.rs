//! Per-operation session isolation.
//!
//! Every operation works on its own copy of a user's session file so that concurrent
//! clients never open the canonical file at the same time. Copies are tracked in a
//! live-handle map; the map lock is held for bookkeeping only, never across file I/O.
//!
//! File layout inside the sessions directory:
//! - canonical: `<user>.session`
//! - operation copy: `<user>.op-<operation_id>-<millis>-<rand>.session`
//! - SQLite companions of either: `-journal`, `-wal`, `-shm` suffixes

use crate::domain::{DomainError, SessionHandle};
use chrono::Utc;
use fs2::FileExt;
use rand::Rng;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const SESSION_EXT: &str = ".session";
/// Marks an operation-scoped copy in a file name.
const OP_MARKER: &str = ".op-";
/// Companion files SQLite may keep next to a session database.
const COMPANION_SUFFIXES: &[&str] = &["-journal", "-wal", "-shm"];

/// Retry policy for deleting session files.
#[derive(Debug, Clone)]
pub struct SessionStoreSettings {
    pub release_attempts: u32,
    /// Delay before the second attempt; doubles on every further attempt.
    pub release_backoff: Duration,
}

impl Default for SessionStoreSettings {
    fn default() -> Self {
        Self {
            release_attempts: 3,
            release_backoff: Duration::from_millis(500),
        }
    }
}

/// Owns the lifecycle of session files: clone, track, delete with retry, sweep orphans.
pub struct SessionStore {
    dir: PathBuf,
    settings: SessionStoreSettings,
    live: Mutex<HashMap<PathBuf, SessionHandle>>,
}

impl SessionStore {
    pub fn new(dir: impl AsRef<Path>, settings: SessionStoreSettings) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            settings,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Handle for the user's canonical session. Not tracked; never released.
    pub fn canonical(&self, user: &str) -> SessionHandle {
        SessionHandle {
            user: user.to_string(),
            operation_id: None,
            created_at: Utc::now(),
            path: self.dir.join(format!("{}{}", sanitize(user), SESSION_EXT)),
        }
    }

    pub async fn canonical_exists(&self, user: &str) -> bool {
        fs::try_exists(self.canonical(user).path())
            .await
            .unwrap_or(false)
    }

    /// Create an operation-scoped copy of the user's canonical session.
    ///
    /// Never fails: without a canonical session (or if copying fails) the copy simply
    /// starts empty and the operation will have to authenticate.
    pub async fn create_isolated(&self, user: &str, operation_id: &str) -> SessionHandle {
        let handle = {
            let mut live = self.live.lock().await;
            let path = loop {
                let candidate = self.dir.join(format!(
                    "{}{}{}-{}-{:04}{}",
                    sanitize(user),
                    OP_MARKER,
                    sanitize(operation_id),
                    Utc::now().timestamp_millis(),
                    rand::thread_rng().gen_range(0..10_000),
                    SESSION_EXT
                ));
                if !live.contains_key(&candidate) {
                    break candidate;
                }
            };
            let handle = SessionHandle {
                user: user.to_string(),
                operation_id: Some(operation_id.to_string()),
                created_at: Utc::now(),
                path,
            };
            live.insert(handle.path.clone(), handle.clone());
            handle
        };

        let canonical = self.canonical(user);
        if fs::try_exists(canonical.path()).await.unwrap_or(false) {
            if let Err(e) = copy_session_files(canonical.path(), handle.path()).await {
                warn!(user, operation_id, error = %e, "failed to copy canonical session; continuing without it");
            }
        }
        debug!(user, operation_id, path = %handle.path.display(), "isolated session created");
        handle
    }

    /// Replace the canonical session with the contents of an operation copy.
    /// Used after a successful login so the new credentials outlive the operation.
    pub async fn promote(&self, handle: &SessionHandle) -> Result<(), DomainError> {
        if handle.is_canonical() {
            return Ok(());
        }
        let canonical = self.canonical(&handle.user);
        copy_session_files(handle.path(), canonical.path())
            .await
            .map_err(|e| DomainError::Session(format!("promote session: {}", e)))?;
        info!(user = %handle.user, path = %canonical.path.display(), "session promoted to canonical");
        Ok(())
    }

    /// Delete every copy owned by `operation_id` (optionally only `user`'s).
    /// Returns the number of handles released. Releasing twice is a no-op.
    pub async fn release(&self, operation_id: &str, user: Option<&str>) -> usize {
        let released: Vec<SessionHandle> = {
            let mut live = self.live.lock().await;
            let keys: Vec<PathBuf> = live
                .iter()
                .filter(|(_, h)| {
                    h.operation_id.as_deref() == Some(operation_id)
                        && user.is_none_or(|u| h.user == u)
                })
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| live.remove(k)).collect()
        };

        for handle in &released {
            self.remove_with_retry(handle.path()).await;
        }
        if !released.is_empty() {
            info!(operation_id, count = released.len(), "released sessions");
        }
        released.len()
    }

    /// Remove the canonical session of a user (account deletion).
    pub async fn remove_canonical(&self, user: &str) -> bool {
        let canonical = self.canonical(user);
        self.remove_with_retry(canonical.path()).await
    }

    /// Snapshot of the live operation copies.
    pub async fn live_handles(&self) -> Vec<SessionHandle> {
        self.live.lock().await.values().cloned().collect()
    }

    /// Reclaim operation copies left behind by an earlier process.
    ///
    /// Each untracked copy is probed with a non-blocking exclusive lock and removed if
    /// free. Returns the copies still held by someone else.
    pub async fn sweep_orphans(&self) -> Vec<PathBuf> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot list sessions directory");
                return Vec::new();
            }
        };

        let mut candidates = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.ends_with(SESSION_EXT) && name.contains(OP_MARKER) {
                        candidates.push(entry.path());
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "error while listing sessions directory");
                    break;
                }
            }
        }

        let tracked: Vec<PathBuf> = self.live.lock().await.keys().cloned().collect();
        let mut still_locked = Vec::new();
        let mut removed = 0usize;
        for path in candidates {
            if tracked.contains(&path) {
                continue;
            }
            match probe_unlocked(&path) {
                Ok(()) => match remove_session_files(&path).await {
                    Ok(()) => {
                        removed += 1;
                        debug!(path = %path.display(), "orphaned session removed");
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "cannot remove orphaned session");
                        still_locked.push(path);
                    }
                },
                Err(e) => {
                    info!(path = %path.display(), error = %e, "orphaned session is still in use");
                    still_locked.push(path);
                }
            }
        }
        if removed > 0 {
            info!(removed, "orphaned sessions reclaimed");
        }
        still_locked
    }

    /// Delete a session and its companions, retrying with exponential backoff.
    /// Exhaustion is logged, never raised.
    async fn remove_with_retry(&self, path: &Path) -> bool {
        let attempts = self.settings.release_attempts.max(1);
        let mut delay = self.settings.release_backoff;
        for attempt in 1..=attempts {
            match remove_session_files(path).await {
                Ok(()) => return true,
                Err(e) if attempt < attempts => {
                    warn!(path = %path.display(), attempt, attempts, error = %e, "session file busy, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => {
                    warn!(path = %path.display(), attempts, error = %e, "giving up on session file removal");
                }
            }
        }
        false
    }
}

/// Replace characters that would escape the sessions directory or break the name layout.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '+' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

/// Copy a session and its companions. Each file is written to a temp name, then renamed,
/// so a reader never observes a half-written copy.
async fn copy_session_files(src: &Path, dest: &Path) -> std::io::Result<()> {
    copy_atomic(src, dest).await?;
    for suffix in COMPANION_SUFFIXES {
        let from = with_suffix(src, suffix);
        let to = with_suffix(dest, suffix);
        if fs::try_exists(&from).await.unwrap_or(false) {
            copy_atomic(&from, &to).await?;
        } else if let Err(e) = fs::remove_file(&to).await {
            if e.kind() != ErrorKind::NotFound {
                return Err(e);
            }
        }
    }
    Ok(())
}

async fn copy_atomic(src: &Path, dest: &Path) -> std::io::Result<()> {
    let tmp = with_suffix(dest, ".tmp");
    fs::copy(src, &tmp).await?;
    fs::rename(&tmp, dest).await
}

async fn remove_session_files(path: &Path) -> std::io::Result<()> {
    let mut files = vec![path.to_path_buf()];
    files.extend(COMPANION_SUFFIXES.iter().map(|s| with_suffix(path, s)));
    for file in files {
        match fs::remove_file(&file).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Try to take an exclusive lock without blocking. Success means nobody holds the file.
fn probe_unlocked(path: &Path) -> std::io::Result<()> {
    let file = std::fs::OpenOptions::new().write(true).open(path)?;
    file.try_lock_exclusive()?;
    file.unlock()
}
