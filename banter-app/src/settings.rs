//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use banter_core::{codec::DEFAULT_PCM_SCALE, SessionConfig, WireSchema};
use serde::{Deserialize, Serialize};

pub const PROFILE_PLATFORM: &str = "voice_ai_platform";
pub const PROFILE_RELAY: &str = "local_relay";

const MIN_BLOCK_SIZE: usize = 256;
const MAX_BLOCK_SIZE: usize = 16_384;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Deployment preset the other fields override.
    pub profile: String,
    pub endpoint_url: Option<String>,
    /// HTTP login endpoint; required when credentials are supplied.
    pub login_url: Option<String>,
    pub email: Option<String>,
    pub block_size: Option<usize>,
    pub pcm_scale: f32,
    /// Field-name overrides for the wire envelopes.
    pub schema: Option<WireSchema>,
    pub preferred_input_device: Option<String>,
    pub preferred_output_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            profile: PROFILE_PLATFORM.into(),
            endpoint_url: None,
            login_url: None,
            email: None,
            block_size: None,
            pcm_scale: DEFAULT_PCM_SCALE,
            schema: None,
            preferred_input_device: None,
            preferred_output_device: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.profile = normalize_profile(&self.profile);
        self.endpoint_url = non_blank(self.endpoint_url.take());
        self.login_url = non_blank(self.login_url.take());
        self.email = non_blank(self.email.take());
        self.block_size = self.block_size.map(normalize_block_size);
        self.pcm_scale = if self.pcm_scale.is_finite() {
            self.pcm_scale.clamp(1.0, DEFAULT_PCM_SCALE)
        } else {
            DEFAULT_PCM_SCALE
        };
        self.preferred_input_device = non_blank(self.preferred_input_device.take());
        self.preferred_output_device = non_blank(self.preferred_output_device.take());
    }

    /// Build the session configuration: profile preset, then file overrides.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = if self.profile == PROFILE_RELAY {
            SessionConfig::local_relay()
        } else {
            SessionConfig::voice_ai_platform()
        };
        if let Some(url) = &self.endpoint_url {
            config.endpoint_url = url.clone();
        }
        if let Some(block_size) = self.block_size {
            config.block_size = block_size;
        }
        if let Some(schema) = &self.schema {
            config.schema = schema.clone();
        }
        config.pcm_scale = self.pcm_scale;
        config.preferred_input_device = self.preferred_input_device.clone();
        config.preferred_output_device = self.preferred_output_device.clone();
        config
    }
}

pub fn normalize_profile(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "relay" | "local" | "local_relay" | "local-relay" | "b" => PROFILE_RELAY.into(),
        _ => PROFILE_PLATFORM.into(),
    }
}

/// Round up to a power of two within `256..=16384`.
pub fn normalize_block_size(raw: usize) -> usize {
    raw.clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE).next_power_of_two()
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Apply `BANTER_*` environment overrides on top of file values.
pub fn apply_env_overrides(settings: &mut AppSettings) {
    if let Ok(profile) = std::env::var("BANTER_PROFILE") {
        settings.profile = profile;
    }
    if let Ok(url) = std::env::var("BANTER_ENDPOINT_URL") {
        settings.endpoint_url = Some(url);
    }
    if let Ok(url) = std::env::var("BANTER_LOGIN_URL") {
        settings.login_url = Some(url);
    }
    if let Some(block_size) = std::env::var("BANTER_BLOCK_SIZE")
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
    {
        settings.block_size = Some(block_size);
    }
    if let Ok(device) = std::env::var("BANTER_INPUT_DEVICE") {
        settings.preferred_input_device = Some(device);
    }
    if let Ok(device) = std::env::var("BANTER_OUTPUT_DEVICE") {
        settings.preferred_output_device = Some(device);
    }
    settings.normalize();
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Banter")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("banter")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
