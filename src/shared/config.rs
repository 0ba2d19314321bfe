//! Application configuration. API credentials, paths, timings.
//!
//! Read from `TG_CONDUCTOR_*` environment variables and an optional file named by
//! `TG_CONDUCTOR_CONFIG`. The unprefixed `API_ID`, `API_HASH`, `API_HOST` and `API_PORT`
//! are honoured as well so an existing `.env` keeps working.

use crate::adapters::http::CoreSettings;
use crate::domain::DomainError;
use crate::usecases::{ArchiveSettings, AuthSettings, MonitorSettings, SessionStoreSettings};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 5000;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct AppConfig {
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,

    /// Root for every file the service writes. Defaults to `./data`.
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub sessions_dir: Option<String>,
    #[serde(default)]
    pub downloads_dir: Option<String>,
    #[serde(default)]
    pub archive_dir: Option<String>,

    #[serde(default)]
    pub api_host: Option<String>,
    #[serde(default)]
    pub api_port: Option<u16>,
    /// Comma separated; `*` allows any origin.
    #[serde(default)]
    pub cors_origins: Option<String>,

    /// How long an authentication waits for the verification code.
    #[serde(default)]
    pub code_timeout_secs: Option<u64>,
    /// How long a finished authentication stays queryable by id.
    #[serde(default)]
    pub auth_retention_secs: Option<u64>,
    /// Terminal operation records older than this are pruned.
    #[serde(default)]
    pub operation_retention_secs: Option<u64>,

    #[serde(default)]
    pub release_attempts: Option<u32>,
    #[serde(default)]
    pub release_backoff_ms: Option<u64>,

    #[serde(default)]
    pub monitor_cycle_secs: Option<u64>,
    #[serde(default)]
    pub download_concurrency: Option<usize>,
    /// Pause between history pages during archive downloads (FloodWait avoidance).
    #[serde(default)]
    pub page_delay_ms: Option<u64>,
    /// Optional pause before each history request made by the Telegram client.
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub event_capacity: Option<usize>,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

impl AppConfig {
    pub fn load() -> Result<Self, DomainError> {
        dotenv::dotenv().ok();
        let mut c = config::Config::builder();
        if let Ok(path) = std::env::var("TG_CONDUCTOR_CONFIG") {
            c = c.add_source(config::File::with_name(&path));
        }
        c = c.add_source(config::Environment::with_prefix("TG_CONDUCTOR"));
        let mut cfg: Self = c
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| DomainError::Config(e.to_string()))?;

        // Unprefixed names fill in whatever the prefixed sources left unset.
        if cfg.api_id.is_none() {
            cfg.api_id = env_parse("API_ID");
        }
        if cfg.api_hash.is_none() {
            cfg.api_hash = std::env::var("API_HASH").ok().filter(|s| !s.is_empty());
        }
        if cfg.api_host.is_none() {
            cfg.api_host = std::env::var("API_HOST").ok().filter(|s| !s.is_empty());
        }
        if cfg.api_port.is_none() {
            cfg.api_port = env_parse("API_PORT");
        }
        Ok(cfg)
    }

    /// Telegram application credentials; both must be present.
    pub fn credentials(&self) -> Result<(i32, String), DomainError> {
        match (self.api_id, self.api_hash.as_deref()) {
            (Some(id), Some(hash)) if id != 0 && !hash.is_empty() => Ok((id, hash.to_string())),
            _ => Err(DomainError::Config(
                "Set API_ID and API_HASH (env or .env). Get them from https://my.telegram.org"
                    .into(),
            )),
        }
    }

    pub fn data_dir_or_default(&self) -> PathBuf {
        PathBuf::from(self.data_dir.as_deref().unwrap_or("./data"))
    }

    pub fn sessions_dir_or_default(&self) -> PathBuf {
        self.sessions_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir_or_default().join("sessions"))
    }

    pub fn downloads_dir_or_default(&self) -> PathBuf {
        self.downloads_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir_or_default().join("downloads"))
    }

    pub fn archive_dir_or_default(&self) -> PathBuf {
        self.archive_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir_or_default().join("archive"))
    }

    /// `host:port` the API binds to.
    pub fn listen_addr(&self) -> String {
        format!(
            "{}:{}",
            self.api_host.as_deref().unwrap_or(DEFAULT_API_HOST),
            self.api_port.unwrap_or(DEFAULT_API_PORT)
        )
    }

    pub fn cors_origins_or_default(&self) -> Vec<String> {
        let raw = self.cors_origins.as_deref().unwrap_or("*");
        raw.split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn code_timeout_secs_or_default(&self) -> u64 {
        self.code_timeout_secs.unwrap_or(300)
    }

    pub fn auth_retention_secs_or_default(&self) -> u64 {
        self.auth_retention_secs.unwrap_or(600)
    }

    pub fn operation_retention_secs_or_default(&self) -> u64 {
        self.operation_retention_secs.unwrap_or(86_400)
    }

    pub fn release_attempts_or_default(&self) -> u32 {
        self.release_attempts.unwrap_or(3).max(1)
    }

    pub fn release_backoff_ms_or_default(&self) -> u64 {
        self.release_backoff_ms.unwrap_or(500)
    }

    pub fn monitor_cycle_secs_or_default(&self) -> u64 {
        self.monitor_cycle_secs.unwrap_or(60).max(1)
    }

    pub fn download_concurrency_or_default(&self) -> usize {
        self.download_concurrency.unwrap_or(3).max(1)
    }

    pub fn page_delay_ms_or_default(&self) -> u64 {
        self.page_delay_ms.unwrap_or(500)
    }

    pub fn request_delay(&self) -> Option<Duration> {
        self.request_delay_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn event_capacity_or_default(&self) -> usize {
        self.event_capacity
            .unwrap_or(crate::usecases::event_bus::DEFAULT_EVENT_CAPACITY)
    }

    pub fn session_store_settings(&self) -> SessionStoreSettings {
        SessionStoreSettings {
            release_attempts: self.release_attempts_or_default(),
            release_backoff: Duration::from_millis(self.release_backoff_ms_or_default()),
        }
    }

    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            code_timeout: Duration::from_secs(self.code_timeout_secs_or_default()),
            retention: Duration::from_secs(self.auth_retention_secs_or_default()),
        }
    }

    pub fn archive_settings(&self) -> ArchiveSettings {
        ArchiveSettings {
            download_concurrency: self.download_concurrency_or_default(),
            page_delay: Duration::from_millis(self.page_delay_ms_or_default()),
        }
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            cycle: Duration::from_secs(self.monitor_cycle_secs_or_default()),
            downloads_dir: self.downloads_dir_or_default(),
            download_concurrency: self.download_concurrency_or_default(),
        }
    }

    pub fn core_settings(&self) -> CoreSettings {
        CoreSettings {
            auth: self.auth_settings(),
            archive: self.archive_settings(),
            monitor: self.monitor_settings(),
            event_capacity: self.event_capacity_or_default(),
        }
    }
}
