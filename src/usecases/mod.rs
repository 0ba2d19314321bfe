//! Application use cases. Orchestrate domain logic via ports.
//!
//! The concurrency core (session isolation, registry, events, auth state machine,
//! operation runner) and the services built on top of it.

pub mod archive_service;
pub mod auth_service;
pub mod event_bus;
pub mod group_service;
pub mod history;
pub mod media_worker;
pub mod monitor_service;
pub mod operation_registry;
pub mod operation_runner;
pub mod session_store;
pub mod token_service;
pub mod user_service;

pub use archive_service::{ArchiveService, ArchiveSettings};
pub use auth_service::{AuthService, AuthSettings};
pub use event_bus::EventBus;
pub use group_service::GroupService;
pub use monitor_service::{MonitorService, MonitorSettings};
pub use operation_registry::OperationRegistry;
pub use operation_runner::OperationRunner;
pub use session_store::{SessionStore, SessionStoreSettings};
pub use token_service::TokenService;
pub use user_service::UserService;
