use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::PollSettings;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "imgproc.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub database_url: String,
    pub poll_interval_ms: u64,
    pub max_poll_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            database_url: "sqlite://./data/imgproc.db".into(),
            poll_interval_ms: 3000,
            max_poll_attempts: 60,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    database_url: Option<String>,
    poll_interval_ms: Option<u64>,
    max_poll_attempts: Option<u32>,
}

impl Settings {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.poll_interval_ms.max(1)),
            self.max_poll_attempts,
        )
    }
}

pub fn load_settings() -> anyhow::Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

/// Defaults, then the optional settings file, then environment overrides.
/// Later `APP__*` variables win over the plain names.
pub fn load_settings_from(
    path: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        let file_cfg: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?;
        if let Some(v) = file_cfg.server_url {
            settings.server_url = v;
        }
        if let Some(v) = file_cfg.database_url {
            settings.database_url = v;
        }
        if let Some(v) = file_cfg.poll_interval_ms {
            settings.poll_interval_ms = v;
        }
        if let Some(v) = file_cfg.max_poll_attempts {
            settings.max_poll_attempts = v;
        }
    }

    if let Some(v) = env("IMGPROC_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = env("APP__SERVER_URL") {
        settings.server_url = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__POLL_INTERVAL_MS") {
        settings.poll_interval_ms = v
            .trim()
            .parse()
            .with_context(|| format!("APP__POLL_INTERVAL_MS must be a number, got '{v}'"))?;
    }
    if let Some(v) = env("APP__MAX_POLL_ATTEMPTS") {
        settings.max_poll_attempts = v
            .trim()
            .parse()
            .with_context(|| format!("APP__MAX_POLL_ATTEMPTS must be a number, got '{v}'"))?;
    }

    settings.database_url = normalize_database_url(&settings.database_url);
    Ok(settings)
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
