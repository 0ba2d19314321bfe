//! tg-conductor: HTTP service that authenticates Telegram accounts and runs archive and
//! monitoring jobs against them, with per-operation session isolation. Hexagonal layout.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;

#[cfg(test)]
mod test_support;
