use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use tracing::warn;

use crate::connection::{Backoff, ReconnectPolicy};

const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub server_url: String,
    pub credential_path: PathBuf,
    pub reconnect: ReconnectPolicy,
    pub history_page_size: u32,
    pub broadcast_fetch_limit: u32,
    pub broadcast_preview_len: usize,
    pub broadcast_history_capacity: usize,
    pub seen_message_capacity: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            credential_path: default_credential_path(),
            reconnect: ReconnectPolicy::default(),
            history_page_size: 50,
            broadcast_fetch_limit: 20,
            broadcast_preview_len: 10,
            broadcast_history_capacity: 100,
            seen_message_capacity: 10_000,
        }
    }
}

fn default_credential_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("chat_client")
        .join("credential")
}

pub fn load_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(SETTINGS_FILE) {
        apply_file_settings(&mut settings, &raw);
    }
    apply_env_settings(&mut settings, |key| std::env::var(key).ok());

    settings
}

pub(crate) fn apply_file_settings(settings: &mut ClientSettings, raw: &str) {
    let file_cfg = match toml::from_str::<HashMap<String, String>>(raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!("settings: ignoring unreadable {SETTINGS_FILE}: {err}");
            return;
        }
    };

    for (key, value) in file_cfg {
        apply_setting(settings, &key, value);
    }
}

pub(crate) fn apply_env_settings<F>(settings: &mut ClientSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(v) = lookup("CHAT_SERVER_URL") {
        apply_setting(settings, "server_url", v);
    }

    for key in [
        "server_url",
        "credential_path",
        "reconnect_delay_ms",
        "reconnect_max_delay_ms",
        "reconnect_backoff",
        "history_page_size",
        "broadcast_fetch_limit",
        "broadcast_preview_len",
        "broadcast_history_capacity",
        "seen_message_capacity",
    ] {
        if let Some(v) = lookup(&format!("APP__{}", key.to_ascii_uppercase())) {
            apply_setting(settings, key, v);
        }
    }
}

fn apply_setting(settings: &mut ClientSettings, key: &str, value: String) {
    match key {
        "server_url" => settings.server_url = value.trim_end_matches('/').to_string(),
        "credential_path" => settings.credential_path = PathBuf::from(value),
        "reconnect_delay_ms" => {
            if let Some(ms) = parse_number::<u64>(key, &value) {
                settings.reconnect.base_delay = Duration::from_millis(ms);
            }
        }
        "reconnect_max_delay_ms" => {
            if let Some(ms) = parse_number::<u64>(key, &value) {
                settings.reconnect.max_delay = Duration::from_millis(ms);
            }
        }
        "reconnect_backoff" => match value.to_ascii_lowercase().as_str() {
            "constant" => settings.reconnect.backoff = Backoff::Constant,
            "exponential" => settings.reconnect.backoff = Backoff::Exponential,
            other => warn!("settings: unknown reconnect_backoff '{other}'"),
        },
        "history_page_size" => {
            if let Some(v) = parse_number::<u32>(key, &value) {
                settings.history_page_size = v.clamp(1, 100);
            }
        }
        "broadcast_fetch_limit" => {
            if let Some(v) = parse_number::<u32>(key, &value) {
                settings.broadcast_fetch_limit = v.clamp(1, 100);
            }
        }
        "broadcast_preview_len" => {
            if let Some(v) = parse_number(key, &value) {
                settings.broadcast_preview_len = v;
            }
        }
        "broadcast_history_capacity" => {
            if let Some(v) = parse_number(key, &value) {
                settings.broadcast_history_capacity = v;
            }
        }
        "seen_message_capacity" => {
            if let Some(v) = parse_number::<usize>(key, &value) {
                settings.seen_message_capacity = v.max(1);
            }
        }
        other => warn!("settings: unknown key '{other}'"),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse::<T>().ok();
    if parsed.is_none() {
        warn!("settings: '{key}' expects a number, got '{value}'");
    }
    parsed
}

#[cfg(test)]
#[path = "tests/settings_tests.rs"]
mod tests;
