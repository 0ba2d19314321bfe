//! API token records and the authenticated caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "user" => Some(Role::User),
            _ => None,
        }
    }
}

/// Stored token metadata. The raw token is never persisted, only its SHA-256 hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_hash: String,
    pub created: DateTime<Utc>,
    pub role: Role,
    pub expiration: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

/// Caller identity attached to a request after token validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiPrincipal {
    pub username: String,
    pub role: Role,
}
