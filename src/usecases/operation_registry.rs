//! Process-wide registry of operations and their status.
//!
//! The map is private; callers only get atomic register/update/get/list operations and
//! cloned snapshots. Terminal statuses are sticky.

use crate::domain::{DomainError, OperationKind, OperationRecord, OperationStatus};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
pub struct OperationRegistry {
    records: RwLock<HashMap<String, OperationRecord>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with status `started` (or `pending` for authentication).
    /// Fails with `Conflict` if the id is already taken.
    pub async fn register(
        &self,
        id: &str,
        kind: OperationKind,
        metadata: BTreeMap<String, String>,
    ) -> Result<OperationRecord, DomainError> {
        let status = match kind {
            OperationKind::Authentication => OperationStatus::Pending,
            OperationKind::ArchiveDownload | OperationKind::Monitoring => OperationStatus::Started,
        };
        let record = OperationRecord {
            id: id.to_string(),
            kind,
            status,
            started_at: Utc::now(),
            ended_at: None,
            error: None,
            metadata,
        };
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(id) {
            return Err(DomainError::Conflict {
                message: format!("operation {} already exists", id),
                status: existing.status.to_string(),
            });
        }
        records.insert(id.to_string(), record.clone());
        debug!(operation_id = id, ?kind, "operation registered");
        Ok(record)
    }

    /// Set a new status. Entering a terminal status stamps `ended_at`.
    /// Refused with `TerminalStatus` once the record is terminal.
    pub async fn update_status(
        &self,
        id: &str,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<OperationRecord, DomainError> {
        self.transition(id, None, status, error).await
    }

    /// Compare-and-swap: only transition if the current status is one of `expected`.
    /// A mismatch yields `Conflict` carrying the current status.
    pub async fn compare_and_set(
        &self,
        id: &str,
        expected: &[OperationStatus],
        status: OperationStatus,
    ) -> Result<OperationRecord, DomainError> {
        self.transition(id, Some(expected), status, None).await
    }

    async fn transition(
        &self,
        id: &str,
        expected: Option<&[OperationStatus]>,
        status: OperationStatus,
        error: Option<String>,
    ) -> Result<OperationRecord, DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("operation {}", id)))?;
        if record.status.is_terminal() {
            return Err(DomainError::TerminalStatus {
                id: id.to_string(),
                status: record.status,
            });
        }
        if let Some(expected) = expected {
            if !expected.contains(&record.status) {
                return Err(DomainError::Conflict {
                    message: format!("operation {} is {}", id, record.status),
                    status: record.status.to_string(),
                });
            }
        }
        let mut next = record.clone();
        next.status = status;
        if error.is_some() {
            next.error = error;
        }
        if status.is_terminal() {
            next.ended_at = Some(Utc::now());
        }
        *record = next.clone();
        debug!(operation_id = id, status = %status, "operation status updated");
        Ok(next)
    }

    /// Attach or replace one metadata entry (e.g. progress counters).
    pub async fn set_metadata(&self, id: &str, key: &str, value: String) -> Result<(), DomainError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("operation {}", id)))?;
        record.metadata.insert(key.to_string(), value);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<OperationRecord, DomainError> {
        self.records
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("operation {}", id)))
    }

    /// Records of one kind, oldest first.
    pub async fn list_by_kind(&self, kind: OperationKind) -> Vec<OperationRecord> {
        let mut out: Vec<OperationRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.started_at);
        out
    }

    pub async fn list(&self) -> Vec<OperationRecord> {
        let mut out: Vec<OperationRecord> = self.records.read().await.values().cloned().collect();
        out.sort_by_key(|r| r.started_at);
        out
    }

    /// Explicit deletion. Returns whether a record was removed.
    pub async fn remove(&self, id: &str) -> bool {
        self.records.write().await.remove(id).is_some()
    }

    /// Drop terminal records that ended more than `retention` ago. Returns how many.
    pub async fn prune(&self, retention: Duration) -> usize {
        let cutoff = Utc::now()
            - ChronoDuration::from_std(retention).unwrap_or_else(|_| ChronoDuration::days(365));
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| match r.ended_at {
            Some(ended) if r.status.is_terminal() => ended > cutoff,
            _ => true,
        });
        before - records.len()
    }
}
