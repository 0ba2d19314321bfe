//! Events broadcast to external observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named notification topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    AuthStatus,
    ArchiveStatus,
    MonitoringStatus,
    MonitoringError,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::AuthStatus => "auth_status",
            Topic::ArchiveStatus => "archive_status",
            Topic::MonitoringStatus => "monitoring_status",
            Topic::MonitoringError => "monitoring_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auth_status" => Some(Topic::AuthStatus),
            "archive_status" => Some(Topic::ArchiveStatus),
            "monitoring_status" => Some(Topic::MonitoringStatus),
            "monitoring_error" => Some(Topic::MonitoringError),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A (topic, payload, timestamp) tuple. Not persisted; no replay.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub topic: Topic,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}
