//! Implements KvStore with one pretty-printed JSON file per document.
//!
//! `<dir>/<name>.json`. A missing or unparsable file loads as an empty mapping.

use crate::domain::DomainError;
use crate::ports::KvStore;
use serde_json::{Map, Value};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn doc_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait::async_trait]
impl KvStore for JsonFileStore {
    async fn load(&self, name: &str) -> Result<Map<String, Value>, DomainError> {
        let path = self.doc_path(name);
        let raw = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(DomainError::Storage(format!("read {}: {}", path.display(), e))),
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) | Err(_) => {
                warn!(path = %path.display(), "document is not a JSON object; treating as empty");
                Ok(Map::new())
            }
        }
    }

    /// Atomic save: write a temp file, fsync, then rename over the target.
    async fn save(&self, name: &str, doc: &Map<String, Value>) -> Result<(), DomainError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DomainError::Storage(format!("create {}: {}", self.dir.display(), e)))?;
        let path = self.doc_path(name);
        let json =
            serde_json::to_string_pretty(doc).map_err(|e| DomainError::Storage(e.to_string()))?;

        let temp_path = path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Storage(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| DomainError::Storage(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Storage(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &path)
            .await
            .map_err(|e| DomainError::Storage(format!("atomic rename failed: {}", e)))
    }
}
