use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CURRENT_VERSION: u32 = 1;
const SETTINGS_FILENAME: &str = "config.yaml";
const APP_NAME: &str = "pagewise";

/// Errors raised while reading or writing the config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// DPI floors applied to final-quality renders, by zoom bracket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DpiTiers {
    /// Floor applied to every render
    #[serde(default = "default_min_dpi")]
    pub min_dpi: f32,
    /// Floor for base scale <= 1.0
    #[serde(default = "default_low_zoom_dpi")]
    pub low_zoom: f32,
    /// Floor for base scale <= 2.0
    #[serde(default = "default_mid_zoom_dpi")]
    pub mid_zoom: f32,
    /// Floor above that
    #[serde(default = "default_high_zoom_dpi")]
    pub high_zoom: f32,
}

impl Default for DpiTiers {
    fn default() -> Self {
        Self {
            min_dpi: default_min_dpi(),
            low_zoom: default_low_zoom_dpi(),
            mid_zoom: default_mid_zoom_dpi(),
            high_zoom: default_high_zoom_dpi(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// Rendered pages kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default = "default_render_workers")]
    pub render_workers: usize,

    /// Pages on each side of the current page rendered speculatively
    #[serde(default = "default_preload_window")]
    pub preload_window: usize,

    /// Extra pixels above and below the viewport counted as visible
    #[serde(default = "default_viewport_buffer")]
    pub viewport_buffer: f32,

    #[serde(default = "default_preload_debounce_ms")]
    pub preload_debounce_ms: u64,

    #[serde(default = "default_scroll_restore_delay_ms")]
    pub scroll_restore_delay_ms: u64,

    #[serde(default = "default_max_display_width")]
    pub max_display_width: f32,

    /// Vertical gap between pages in pixels
    #[serde(default = "default_page_spacing")]
    pub page_spacing: f32,

    #[serde(default = "default_zoom")]
    pub default_zoom: f32,

    #[serde(default = "default_min_zoom")]
    pub min_zoom: f32,

    #[serde(default = "default_max_zoom")]
    pub max_zoom: f32,

    #[serde(default = "default_zoom_step")]
    pub zoom_step: f32,

    #[serde(default = "default_dpi")]
    pub default_dpi: f32,

    #[serde(default = "default_preview_dpi")]
    pub preview_dpi: f32,

    #[serde(default)]
    pub dpi_tiers: DpiTiers,

    /// Vertical distance between word centres that starts a new line
    #[serde(default = "default_line_gap_threshold")]
    pub line_gap_threshold: f32,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

fn default_cache_capacity() -> usize {
    6
}

fn default_render_workers() -> usize {
    2
}

fn default_preload_window() -> usize {
    2
}

fn default_viewport_buffer() -> f32 {
    100.0
}

fn default_preload_debounce_ms() -> u64 {
    150
}

fn default_scroll_restore_delay_ms() -> u64 {
    50
}

fn default_max_display_width() -> f32 {
    1200.0
}

fn default_page_spacing() -> f32 {
    1.0
}

fn default_zoom() -> f32 {
    1.0
}

fn default_min_zoom() -> f32 {
    0.3
}

fn default_max_zoom() -> f32 {
    5.0
}

fn default_zoom_step() -> f32 {
    1.25
}

fn default_dpi() -> f32 {
    200.0
}

fn default_preview_dpi() -> f32 {
    96.0
}

fn default_min_dpi() -> f32 {
    150.0
}

fn default_low_zoom_dpi() -> f32 {
    200.0
}

fn default_mid_zoom_dpi() -> f32 {
    250.0
}

fn default_high_zoom_dpi() -> f32 {
    300.0
}

fn default_line_gap_threshold() -> f32 {
    15.0
}

fn default_shutdown_timeout_ms() -> u64 {
    2000
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            cache_capacity: default_cache_capacity(),
            render_workers: default_render_workers(),
            preload_window: default_preload_window(),
            viewport_buffer: default_viewport_buffer(),
            preload_debounce_ms: default_preload_debounce_ms(),
            scroll_restore_delay_ms: default_scroll_restore_delay_ms(),
            max_display_width: default_max_display_width(),
            page_spacing: default_page_spacing(),
            default_zoom: default_zoom(),
            min_zoom: default_min_zoom(),
            max_zoom: default_max_zoom(),
            zoom_step: default_zoom_step(),
            default_dpi: default_dpi(),
            preview_dpi: default_preview_dpi(),
            dpi_tiers: DpiTiers::default(),
            line_gap_threshold: default_line_gap_threshold(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl ViewerConfig {
    pub fn preload_debounce(&self) -> Duration {
        Duration::from_millis(self.preload_debounce_ms)
    }

    pub fn scroll_restore_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_restore_delay_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

pub fn preferred_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|config| config.join(APP_NAME).join(SETTINGS_FILENAME))
}

/// Load the config from the user's config directory.
///
/// A missing file is created with defaults; unreadable or invalid files are
/// logged and defaults are used.
pub fn load_config() -> ViewerConfig {
    let Some(path) = preferred_config_path() else {
        warn!("Could not determine config directory, using default settings");
        return ViewerConfig::default();
    };

    if path.exists() {
        load_config_or_default(&path)
    } else {
        info!("Settings file not found, creating with defaults at {path:?}");
        let config = ViewerConfig::default();
        if let Err(e) = save_config_to_file(&config, &path) {
            error!("Failed to save settings to {path:?}: {e}");
        }
        config
    }
}

/// Like [`load_config_from_path`] but never fails
pub fn load_config_or_default(path: &Path) -> ViewerConfig {
    match load_config_from_path(path) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load settings file {path:?}: {e}");
            ViewerConfig::default()
        }
    }
}

pub fn load_config_from_path(path: &Path) -> Result<ViewerConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config = serde_yaml::from_str::<ViewerConfig>(&content)?;
    debug!("Loaded settings from {path:?}");

    if config.version < CURRENT_VERSION {
        migrate_config(&mut config);
        save_config_to_file(&config, path)?;
    }

    Ok(config)
}

fn migrate_config(config: &mut ViewerConfig) {
    info!(
        "Migrating settings from v{} to v{}",
        config.version, CURRENT_VERSION
    );

    config.version = CURRENT_VERSION;
}

pub fn save_config_to_file(config: &ViewerConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut content = String::from(CONFIG_HEADER);
    content.push_str(&serde_yaml::to_string(config)?);
    fs::write(path, content)?;
    debug!("Saved settings to {path:?}");
    Ok(())
}

const CONFIG_HEADER: &str = r#"# ============================================================================
# pagewise viewer settings
# ============================================================================
# cache_capacity      rendered pages kept in memory
# preload_window      pages rendered ahead/behind the current page
# viewport_buffer     pixels above/below the viewport treated as visible
# dpi_tiers           DPI floors for final renders by zoom bracket
# line_gap_threshold  pixels between word centres that start a new line

"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config: ViewerConfig =
            serde_yaml::from_str("cache_capacity: 3\ndpi_tiers:\n  high_zoom: 400\n")
                .expect("valid yaml");

        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.preload_window, 2);
        assert_eq!(config.dpi_tiers.high_zoom, 400.0);
        assert_eq!(config.dpi_tiers.min_dpi, 150.0);
        assert_eq!(config.version, CURRENT_VERSION);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join(SETTINGS_FILENAME);
        let config = ViewerConfig {
            viewport_buffer: 42.0,
            preload_debounce_ms: 10,
            ..ViewerConfig::default()
        };

        save_config_to_file(&config, &path).expect("save");
        let loaded = load_config_from_path(&path).expect("load");

        assert_eq!(loaded, config);
        let raw = fs::read_to_string(&path).expect("read back");
        assert!(raw.starts_with("# ====="));
    }

    #[test]
    fn old_version_is_migrated_and_rewritten() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "version: 0\ncache_capacity: 9\n").expect("write");

        let loaded = load_config_from_path(&path).expect("load");
        assert_eq!(loaded.version, CURRENT_VERSION);
        assert_eq!(loaded.cache_capacity, 9);

        let raw = fs::read_to_string(&path).expect("read back");
        assert!(raw.contains(&format!("version: {CURRENT_VERSION}")));
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(SETTINGS_FILENAME);
        fs::write(&path, "cache_capacity: [not a number").expect("write");

        assert!(load_config_from_path(&path).is_err());
        assert_eq!(load_config_or_default(&path), ViewerConfig::default());
    }
}
