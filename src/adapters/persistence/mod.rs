//! File-backed persistence: JSON key/value documents and the JSONL message archive.

pub mod archive_writer;
pub mod json_store;

pub use archive_writer::JsonlArchive;
pub use json_store::JsonFileStore;
