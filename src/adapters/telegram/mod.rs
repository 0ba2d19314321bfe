//! Telegram (MTProto) adapter built on grammers.

pub mod client;
pub mod mapper;
pub mod session;

pub use client::{GrammersClientFactory, GrammersTgClient};
