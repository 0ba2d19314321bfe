//! Infrastructure adapters. Implement outbound ports and expose the service over HTTP.
//!
//! Telegram, filesystem, REST API, API client. Map errors to DomainError.

pub mod api_client;
pub mod http;
pub mod persistence;
pub mod telegram;
pub mod ui;
