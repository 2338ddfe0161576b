use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current settings schema version
pub const SETTINGS_VERSION: u32 = 1;

pub const PANEL_URL_ENV: &str = "GANTRY_PANEL_URL";
pub const API_KEY_ENV: &str = "GANTRY_API_KEY";

/// Client settings, persisted as `settings.json` in the config dir.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppSettings {
    /// Schema version, for migrations
    #[serde(default = "default_settings_version")]
    pub version: u32,

    /// Panel base URL, e.g. `https://panel.example.com`
    #[serde(default)]
    pub panel_url: String,

    /// Client API key sent as a bearer token
    #[serde(default)]
    pub api_key: String,

    /// Console lines kept per server view
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: u32,

    #[serde(default = "default_viewport_rows")]
    pub viewport_rows: u32,

    /// Print a telemetry line after every stats tick
    #[serde(default)]
    pub show_stats: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            panel_url: String::new(),
            api_key: String::new(),
            scrollback_lines: default_scrollback_lines(),
            viewport_rows: default_viewport_rows(),
            show_stats: false,
        }
    }
}

impl AppSettings {
    /// Apply `GANTRY_PANEL_URL` / `GANTRY_API_KEY` on top of the file.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(
            std::env::var(PANEL_URL_ENV).ok(),
            std::env::var(API_KEY_ENV).ok(),
        )
    }

    fn with_overrides(mut self, panel_url: Option<String>, api_key: Option<String>) -> Self {
        if let Some(url) = panel_url.filter(|v| !v.is_empty()) {
            self.panel_url = url;
        }
        if let Some(key) = api_key.filter(|v| !v.is_empty()) {
            self.api_key = key;
        }
        self
    }
}

fn default_settings_version() -> u32 {
    // Files written before versioning have no version field
    0
}

fn default_scrollback_lines() -> u32 {
    1000
}

fn default_viewport_rows() -> u32 {
    24
}

pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gantry")
}

pub fn get_settings_path() -> PathBuf {
    get_config_dir().join("settings.json")
}

pub fn load_settings() -> AppSettings {
    load_settings_from(&get_settings_path())
}

/// Load settings, recovering what can be recovered from a damaged file.
pub fn load_settings_from(path: &Path) -> AppSettings {
    if !path.exists() {
        log::info!("Settings file not found at {}, using defaults", path.display());
        return AppSettings::default();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::error!("Failed to read settings file {}: {}", path.display(), e);
            return AppSettings::default();
        }
    };

    match serde_json::from_str::<AppSettings>(&content) {
        Ok(settings) => return migrate_settings(settings, path),
        Err(e) => {
            log::warn!("Failed to parse settings directly: {}, attempting partial recovery", e);
        }
    }

    match recover_settings_from_json(&content) {
        Ok(settings) => {
            log::info!("Recovered settings with partial data");
            let settings = migrate_settings(settings, path);
            if let Err(e) = save_settings_to(&settings, path) {
                log::warn!("Failed to save recovered settings: {}", e);
            }
            settings
        }
        Err(e) => {
            log::error!("Failed to recover settings from {}: {}", path.display(), e);
            log::error!("Using default settings. The old settings file has been preserved.");
            AppSettings::default()
        }
    }
}

/// Pull valid fields out of a file that does not deserialize as a whole.
fn recover_settings_from_json(content: &str) -> Result<AppSettings> {
    use anyhow::Context;

    let value: serde_json::Value =
        serde_json::from_str(content).context("Settings file is not valid JSON")?;
    let obj = value
        .as_object()
        .context("Settings file root is not a JSON object")?;

    let mut settings = AppSettings::default();

    if let Some(v) = obj.get("version").and_then(|v| v.as_u64()) {
        settings.version = v as u32;
    }

    if let Some(v) = obj.get("panel_url").and_then(|v| v.as_str()) {
        settings.panel_url = v.to_string();
    }

    if let Some(v) = obj.get("api_key").and_then(|v| v.as_str()) {
        settings.api_key = v.to_string();
    }

    if let Some(v) = obj.get("scrollback_lines").and_then(|v| v.as_u64()) {
        settings.scrollback_lines = v.clamp(100, 100_000) as u32;
    } else if obj.contains_key("scrollback_lines") {
        log::warn!("Could not parse scrollback_lines, using default");
    }

    if let Some(v) = obj.get("viewport_rows").and_then(|v| v.as_u64()) {
        settings.viewport_rows = v.clamp(1, 1000) as u32;
    }

    if let Some(v) = obj.get("show_stats").and_then(|v| v.as_bool()) {
        settings.show_stats = v;
    }

    Ok(settings)
}

fn migrate_settings(mut settings: AppSettings, path: &Path) -> AppSettings {
    let original_version = settings.version;

    if settings.version == 0 {
        log::info!("Migrating settings from pre-versioning (v0) to v1");
        settings.version = 1;
    }

    settings.scrollback_lines = settings.scrollback_lines.clamp(100, 100_000);

    if original_version != settings.version {
        log::info!("Settings migrated from v{} to v{}", original_version, settings.version);
        if let Err(e) = save_settings_to(&settings, path) {
            log::warn!("Failed to save migrated settings: {}", e);
        }
    }

    settings
}

pub fn save_settings_to(settings: &AppSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    // The file holds an API key.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from(&dir.path().join("settings.json"));
        assert_eq!(settings, AppSettings::default());
        assert_eq!(settings.scrollback_lines, 1000);
    }

    #[test]
    fn saved_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = AppSettings {
            panel_url: "https://panel.example.com".to_string(),
            api_key: "ptlc_abc".to_string(),
            show_stats: true,
            ..Default::default()
        };
        save_settings_to(&settings, &path).unwrap();
        assert_eq!(load_settings_from(&path), settings);
    }

    #[test]
    fn partial_recovery_keeps_valid_fields_and_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"version":1,"panel_url":"https://p.example","scrollback_lines":"lots","show_stats":true,"viewport_rows":-3}"#,
        )
        .unwrap();

        let settings = load_settings_from(&path);
        assert_eq!(settings.panel_url, "https://p.example");
        assert_eq!(settings.scrollback_lines, 1000);
        assert!(settings.show_stats);
        assert_eq!(settings.viewport_rows, 24);

        let rewritten: AppSettings =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten, settings);
    }

    #[test]
    fn garbage_file_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert_eq!(load_settings_from(&path), AppSettings::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json at all");
    }

    #[test]
    fn unversioned_file_is_migrated_and_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"scrollback_lines":5}"#).unwrap();
        let settings = load_settings_from(&path);
        assert_eq!(settings.version, SETTINGS_VERSION);
        assert_eq!(settings.scrollback_lines, 100);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let settings = AppSettings {
            panel_url: "https://file.example".to_string(),
            api_key: "file-key".to_string(),
            ..Default::default()
        }
        .with_overrides(Some("https://env.example".to_string()), Some(String::new()));
        assert_eq!(settings.panel_url, "https://env.example");
        assert_eq!(settings.api_key, "file-key");
    }
}
