//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod event;
pub mod operation;
pub mod session;
pub mod token;

pub use entities::{
    Challenge, Group, GroupKind, MediaReference, MediaType, Message, SignInOutcome,
};
pub use errors::DomainError;
pub use event::{Event, Topic};
pub use operation::{AuthPhase, OperationKind, OperationRecord, OperationStatus};
pub use session::SessionHandle;
pub use token::{ApiPrincipal, Role, TokenRecord};
