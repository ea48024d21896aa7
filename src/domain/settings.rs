use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

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
    "valedo_home".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Which Bluetooth stack drives the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Native,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Advertised name a device must carry to be listed
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_chart_capacity")]
    pub chart_capacity: usize,
    #[serde(default = "default_render_max_frequency_hz")]
    pub render_max_frequency_hz: f32,
    #[serde(default)]
    pub ble_backend: BackendKind,

    // Device selection
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_max_scan_attempts")]
    pub max_scan_attempts: u32,
    #[serde(default)]
    pub last_connected_device: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            scan_timeout_ms: default_scan_timeout_ms(),
            chart_capacity: default_chart_capacity(),
            render_max_frequency_hz: default_render_max_frequency_hz(),
            ble_backend: BackendKind::default(),
            auto_connect: default_true(),
            max_scan_attempts: default_max_scan_attempts(),
            last_connected_device: None,
            log_settings: LogSettings::default(),
        }
    }
}

fn default_device_name() -> String {
    "ValedoHome".to_string()
}
fn default_scan_timeout_ms() -> u64 {
    2500
}
fn default_chart_capacity() -> usize {
    100
}
fn default_render_max_frequency_hz() -> f32 {
    60.0
}
fn default_max_scan_attempts() -> u32 {
    3
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is
    /// missing or unreadable.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("ValedoHome");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
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

    pub fn path(&self) -> &PathBuf {
        &self.settings_path
    }

    pub fn set_last_connected_device(&mut self, device_id: &str) -> anyhow::Result<()> {
        if self.settings.last_connected_device.as_deref() != Some(device_id) {
            self.settings.last_connected_device = Some(device_id.to_string());
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_settings_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("valedo_home_{}_{}.json", name, std::process::id()));
        path
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings: Settings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.device_name, "ValedoHome");
        assert_eq!(settings.scan_timeout_ms, 2500);
        assert_eq!(settings.chart_capacity, 100);
        assert_eq!(settings.ble_backend, BackendKind::Native);
        assert!(settings.auto_connect);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_backend_kind_is_lowercase() {
        let settings: Settings = serde_json::from_str(r#"{"ble_backend":"simulated"}"#).unwrap();
        assert_eq!(settings.ble_backend, BackendKind::Simulated);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let path = temp_settings_path("missing");
        let _ = fs::remove_file(&path);
        let service = SettingsService::from_path(path);
        assert_eq!(service.get().max_scan_attempts, 3);
    }

    #[test]
    fn test_last_connected_device_round_trips_through_file() {
        let path = temp_settings_path("roundtrip");
        let mut service = SettingsService::from_path(path.clone());
        service.set_last_connected_device("C0FFEE123456").unwrap();

        let reloaded = SettingsService::from_path(path.clone());
        assert_eq!(
            reloaded.get().last_connected_device.as_deref(),
            Some("C0FFEE123456")
        );
        let _ = fs::remove_file(&path);
    }
}
