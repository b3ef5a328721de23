use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::{
    connection::RetryPolicy,
    render::{DisplaySize, RendererConfig},
};

pub const DEFAULT_SETTINGS_FILE: &str = "engraver.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: String,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    pub retry_multiplier: f64,
    pub debounce_ms: u64,
    pub ruler_margin: f64,
    pub reserved_height: f64,
    pub width_factor: f64,
    pub display_width: f64,
    pub display_height: f64,
    pub move_distance_mm: f64,
    pub power: u8,
    pub depth: u8,
}

impl Default for ClientSettings {
    fn default() -> Self {
        let renderer = RendererConfig::default();
        Self {
            server_url: "http://127.0.0.1:8008".into(),
            retry_initial_delay_ms: 0,
            retry_max_delay_ms: 0,
            retry_multiplier: 1.0,
            debounce_ms: 750,
            ruler_margin: renderer.margin,
            reserved_height: renderer.reserved,
            width_factor: renderer.width_factor,
            display_width: 1920.0,
            display_height: 1080.0,
            move_distance_mm: 1.0,
            power: 100,
            depth: 10,
        }
    }
}

impl ClientSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            multiplier: self.retry_multiplier,
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            margin: self.ruler_margin,
            reserved: self.reserved_height,
            width_factor: self.width_factor,
        }
    }

    pub fn display_size(&self) -> DisplaySize {
        DisplaySize {
            width: self.display_width,
            height: self.display_height,
        }
    }
}

/// Defaults, then `engraver.toml` (or `path`), then environment variables.
///
/// A missing default file is fine; an explicitly named file must exist and parse.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<ClientSettings> {
    let mut settings = match path {
        Some(path) => read_settings_file(path)?,
        None => {
            let default_path = PathBuf::from(DEFAULT_SETTINGS_FILE);
            if default_path.exists() {
                read_settings_file(&default_path)?
            } else {
                ClientSettings::default()
            }
        }
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<ClientSettings> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

pub fn apply_env_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("ENGRAVER_SERVER_URL") {
        settings.server_url = v;
    }
    if let Some(v) = lookup("APP__SERVER_URL") {
        settings.server_url = v;
    }

    parse_env(&lookup, "ENGRAVER_DEBOUNCE_MS", &mut settings.debounce_ms);
    parse_env(
        &lookup,
        "ENGRAVER_RETRY_DELAY_MS",
        &mut settings.retry_initial_delay_ms,
    );
    parse_env(
        &lookup,
        "ENGRAVER_RETRY_MAX_DELAY_MS",
        &mut settings.retry_max_delay_ms,
    );
    parse_env(
        &lookup,
        "ENGRAVER_RETRY_MULTIPLIER",
        &mut settings.retry_multiplier,
    );
    parse_env(&lookup, "ENGRAVER_DISPLAY_WIDTH", &mut settings.display_width);
    parse_env(&lookup, "ENGRAVER_DISPLAY_HEIGHT", &mut settings.display_height);
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable setting override"),
    }
}
