use crate::domain::input::InputModes;
use crate::domain::models::EncodingMode;
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "easy_keyboard_link".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // BLE Profile (Nordic UART Service by default, must match the firmware)
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_text_uuid")]
    pub ble_text_char_uuid: String,
    #[serde(default = "default_status_uuid")]
    pub ble_status_char_uuid: String,

    // Scanning
    #[serde(default = "default_name_hints")]
    pub scan_name_hints: Vec<String>,
    #[serde(default = "default_true")]
    pub accept_any_named_device: bool,

    // Reconnection
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub reconnect_max_attempts: Option<u32>,

    // Input Modes
    #[serde(default = "default_false")]
    pub immediate_send_enabled: bool,
    #[serde(default = "default_false")]
    pub immediate_clear_enabled: bool,
    #[serde(default = "default_false")]
    pub unicode_mode_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            ble_service_uuid: default_service_uuid(),
            ble_text_char_uuid: default_text_uuid(),
            ble_status_char_uuid: default_status_uuid(),
            scan_name_hints: default_name_hints(),
            accept_any_named_device: default_true(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            reconnect_max_attempts: None,
            immediate_send_enabled: default_false(),
            immediate_clear_enabled: default_false(),
            unicode_mode_enabled: default_false(),
        }
    }
}

impl Settings {
    pub fn input_modes(&self) -> InputModes {
        InputModes {
            immediate_send: self.immediate_send_enabled,
            immediate_clear: self.immediate_clear_enabled,
            encoding: EncodingMode::from_unicode_flag(self.unicode_mode_enabled),
        }
    }
}

fn default_service_uuid() -> String {
    protocol::SERVICE_UUID.to_string()
}
fn default_text_uuid() -> String {
    protocol::TEXT_CHAR_UUID.to_string()
}
fn default_status_uuid() -> String {
    protocol::STATUS_CHAR_UUID.to_string()
}
fn default_name_hints() -> Vec<String> {
    vec![
        "xiao".to_string(),
        "keyboard".to_string(),
        "nordic".to_string(),
    ]
}
fn default_reconnect_delay_ms() -> u64 {
    2000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults if it is missing or unreadable
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("EasyKeyboardLink");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn set_unicode_mode(&mut self, enabled: bool) -> anyhow::Result<()> {
        if self.settings.unicode_mode_enabled != enabled {
            self.settings.unicode_mode_enabled = enabled;
            self.save()?;
        }
        Ok(())
    }
}
