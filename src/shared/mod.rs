//! Cross-cutting helpers shared by the binary and the library.

pub mod config;
