//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use crate::domain::OperationStatus;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    /// Bad or missing input from the caller. Nothing was created.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Request is not valid in the current state; `status` reports that state.
    #[error("{message}")]
    Conflict { message: String, status: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Telegram error: {0}")]
    Telegram(String),

    /// FloodWait error: caller should retry after `seconds` seconds.
    #[error("FloodWait: retry after {seconds} seconds")]
    FloodWait { seconds: u64 },

    #[error("Media download failed: {0}")]
    Media(String),

    #[error("Session store error: {0}")]
    Session(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A terminal status is sticky; late updates are refused.
    #[error("Operation {id} already finished with status {status}")]
    TerminalStatus { id: String, status: OperationStatus },

    #[error("Configuration error: {0}")]
    Config(String),

    /// Remote API call failed (used by the HTTP client adapter).
    #[error("API request failed: {0}")]
    Api(String),
}
