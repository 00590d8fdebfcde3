//! TOML-based configuration for the keymap daemon.
//!
//! Reads `AppConfig` from `--config <path>` or the platform-appropriate file:
//! - Windows:  `%APPDATA%\Keymapd\config.toml`
//! - Linux:    `~/.config/keymapd/config.toml`
//! - macOS:    `~/Library/Application Support/Keymapd/config.toml`
//!
//! A missing file yields [`AppConfig::default`].  Example:
//!
//! ```toml
//! [daemon]
//! log_level = "debug"
//! stream_listen = "127.0.0.1:24850"
//!
//! [storage]
//! backend = "entry"
//! path = "/var/lib/keymapd"
//!
//! [keymap]
//! layers = 2
//! keys_per_layer = 4
//!
//! [[keymap.layer]]
//! bindings = [
//!     { behavior = "KEY_PRESS", param1 = 0x04 },
//!     { behavior = "MOMENTARY_LAYER", param1 = 1 },
//! ]
//! ```
//!
//! The behavior table defaults to the built-in firmware table; a
//! `[[keymap.behaviors]]` list replaces it.  Layers and trailing keys with no
//! binding listed are unset.

use std::path::{Path, PathBuf};

use keymap_core::protocol::frame::MAX_KEYMAP_CELLS;
use keymap_core::{
    BehaviorDescriptor, BehaviorRegistry, GridDimensions, KeyBinding, RegistryError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::persistence::BackendKind;

/// Error type for configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid behavior table: {0}")]
    Registry(#[from] RegistryError),

    #[error("invalid keymap dimensions {layers}x{keys_per_layer}: {reason}")]
    Dimensions {
        layers: u8,
        keys_per_layer: u8,
        reason: String,
    },

    #[error("keymap.layer has {count} entries but only {layers} layers are configured")]
    TooManyLayers { count: usize, layers: u8 },

    #[error("layer {layer} lists {count} bindings but keys_per_layer is {max}")]
    TooManyBindings { layer: usize, count: usize, max: u8 },

    #[error("default binding at ({layer}, {key}) names unknown behavior {label:?}")]
    UnknownBehavior { layer: usize, key: usize, label: String },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub keymap: KeymapConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// TCP address for the framed command stream.
    #[serde(default = "default_stream_listen")]
    pub stream_listen: String,
    /// TCP address for the feature-report endpoint.
    #[serde(default = "default_report_listen")]
    pub report_listen: String,
}

/// Persistence settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,
    /// Directory holding the keymap records.  Defaults to a `data`
    /// directory next to the config file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Grid shape, behavior table, and default bindings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeymapConfig {
    #[serde(default = "default_layers")]
    pub layers: u8,
    #[serde(default = "default_keys_per_layer")]
    pub keys_per_layer: u8,
    /// Replaces the built-in behavior table when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub behaviors: Vec<BehaviorDescriptor>,
    /// Default bindings, one entry per layer.
    #[serde(default = "default_layer_bindings")]
    pub layer: Vec<LayerConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LayerConfig {
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// One default binding; an absent `behavior` leaves the key unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BindingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<String>,
    #[serde(default)]
    pub param1: u32,
    #[serde(default)]
    pub param2: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_log_level() -> String {
    "info".to_string()
}
fn default_stream_listen() -> String {
    "127.0.0.1:24850".to_string()
}
fn default_report_listen() -> String {
    "127.0.0.1:24851".to_string()
}
fn default_layers() -> u8 {
    2
}
fn default_keys_per_layer() -> u8 {
    4
}

fn binding(behavior: &str, param1: u32) -> BindingConfig {
    BindingConfig {
        behavior: Some(behavior.to_string()),
        param1,
        param2: 0,
    }
}

fn default_layer_bindings() -> Vec<LayerConfig> {
    vec![
        LayerConfig {
            bindings: vec![
                binding("KEY_PRESS", 0x04),
                binding("KEY_PRESS", 0x05),
                binding("KEY_PRESS", 0x06),
                binding("MOMENTARY_LAYER", 1),
            ],
        },
        LayerConfig {
            bindings: vec![
                binding("KEY_PRESS", 0x1E),
                binding("KEY_PRESS", 0x1F),
                binding("KEY_PRESS", 0x20),
                binding("TRANSPARENT", 0),
            ],
        },
    ]
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            stream_listen: default_stream_listen(),
            report_listen: default_report_listen(),
        }
    }
}

impl Default for KeymapConfig {
    fn default() -> Self {
        Self {
            layers: default_layers(),
            keys_per_layer: default_keys_per_layer(),
            behaviors: Vec::new(),
            layer: default_layer_bindings(),
        }
    }
}

// ── Keymap validation ─────────────────────────────────────────────────────────

impl KeymapConfig {
    /// Validated grid shape.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Dimensions`] for an empty grid, more than 64 layers, or
    /// a grid too large for a single `READ_KEYMAP` response.
    pub fn dimensions(&self) -> Result<GridDimensions, ConfigError> {
        let invalid = |reason: String| ConfigError::Dimensions {
            layers: self.layers,
            keys_per_layer: self.keys_per_layer,
            reason,
        };
        let dims = GridDimensions::new(self.layers, self.keys_per_layer)
            .map_err(|e| invalid(e.to_string()))?;
        if dims.cell_count() > MAX_KEYMAP_CELLS {
            return Err(invalid(format!(
                "{} cells exceed the limit of {MAX_KEYMAP_CELLS}",
                dims.cell_count()
            )));
        }
        Ok(dims)
    }

    /// Builds the behavior registry.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Registry`] for duplicate or empty entries.
    pub fn registry(&self) -> Result<BehaviorRegistry, ConfigError> {
        if self.behaviors.is_empty() {
            return Ok(BehaviorRegistry::builtin());
        }
        Ok(BehaviorRegistry::new(self.behaviors.iter().cloned())?)
    }

    /// Resolves the default bindings into a full layer-major grid.
    ///
    /// # Errors
    ///
    /// [`ConfigError::TooManyLayers`], [`ConfigError::TooManyBindings`], or
    /// [`ConfigError::UnknownBehavior`].
    pub fn default_bindings(
        &self,
        registry: &BehaviorRegistry,
        dims: GridDimensions,
    ) -> Result<Vec<KeyBinding>, ConfigError> {
        if self.layer.len() > dims.layers as usize {
            return Err(ConfigError::TooManyLayers {
                count: self.layer.len(),
                layers: dims.layers,
            });
        }

        let mut cells = vec![KeyBinding::unset(); dims.cell_count()];
        for (layer_idx, layer) in self.layer.iter().enumerate() {
            if layer.bindings.len() > dims.keys_per_layer as usize {
                return Err(ConfigError::TooManyBindings {
                    layer: layer_idx,
                    count: layer.bindings.len(),
                    max: dims.keys_per_layer,
                });
            }
            for (key_idx, entry) in layer.bindings.iter().enumerate() {
                let Some(label) = &entry.behavior else {
                    continue;
                };
                let id = registry.resolve_by_label(label).ok_or_else(|| {
                    ConfigError::UnknownBehavior {
                        layer: layer_idx,
                        key: key_idx,
                        label: label.clone(),
                    }
                })?;
                cells[layer_idx * dims.keys_per_layer as usize + key_idx] =
                    KeyBinding::new(id, entry.param1, entry.param2);
            }
        }
        Ok(cells)
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the
/// file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Renders `config` as TOML, as `--print-config` shows it.
///
/// # Errors
///
/// Returns [`ConfigError::Serialize`] if serialization fails.
pub fn render_config(config: &AppConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

/// Directory for keymap records when `storage.path` is unset.
pub fn default_data_dir(config_file: &Path) -> PathBuf {
    config_file
        .parent()
        .map(|dir| dir.join("data"))
        .unwrap_or_else(|| PathBuf::from("data"))
}

/// Resolves the platform config base directory, including the `keymapd` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Keymapd"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("keymapd"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME")
            .map(|h| PathBuf::from(h).join("Library").join("Application Support").join("Keymapd"))
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use keymap_core::BehaviorId;
    use uuid::Uuid;

    // ── Defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn test_app_config_default_is_two_by_four_blob() {
        // Arrange / Act
        let cfg = AppConfig::default();

        // Assert
        assert_eq!(cfg.keymap.layers, 2);
        assert_eq!(cfg.keymap.keys_per_layer, 4);
        assert_eq!(cfg.storage.backend, BackendKind::Blob);
        assert_eq!(cfg.daemon.log_level, "info");
    }

    #[test]
    fn test_default_keymap_resolves_against_builtin_table() {
        let keymap = KeymapConfig::default();
        let registry = keymap.registry().unwrap();
        let dims = keymap.dimensions().unwrap();

        let cells = keymap.default_bindings(&registry, dims).unwrap();

        assert_eq!(cells.len(), 8);
        assert_eq!(cells[2], KeyBinding::new(BehaviorId(5), 0x06, 0));
        assert_eq!(cells[3], KeyBinding::new(BehaviorId(16), 1, 0));
        assert_eq!(cells[7], KeyBinding::new(BehaviorId(27), 0, 0));
    }

    // ── TOML parsing ──────────────────────────────────────────────────────────

    #[test]
    fn test_deserialize_empty_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("").expect("deserialize empty");
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn test_deserialize_partial_sections_override_defaults() {
        // Arrange
        let toml_str = r#"
[storage]
backend = "entry"

[keymap]
layers = 3
keys_per_layer = 2

[[keymap.layer]]
bindings = [{ behavior = "KEY_PRESS", param1 = 4 }, {}]

[[keymap.layer]]
bindings = [{ behavior = "LAYER_TAP", param1 = 2, param2 = 0x29 }]
"#;

        // Act
        let cfg: AppConfig = toml::from_str(toml_str).expect("deserialize partial");
        let registry = cfg.keymap.registry().unwrap();
        let dims = cfg.keymap.dimensions().unwrap();
        let cells = cfg.keymap.default_bindings(&registry, dims).unwrap();

        // Assert
        assert_eq!(cfg.storage.backend, BackendKind::Entry);
        assert_eq!(cfg.daemon.stream_listen, "127.0.0.1:24850");
        assert_eq!(cells.len(), 6);
        assert_eq!(cells[0], KeyBinding::new(BehaviorId(5), 4, 0));
        assert!(cells[1].is_unset());
        assert_eq!(cells[2], KeyBinding::new(BehaviorId(8), 2, 0x29));
        assert!(cells[3].is_unset());
        assert!(cells[4].is_unset() && cells[5].is_unset());
    }

    #[test]
    fn test_custom_behavior_table_replaces_builtin() {
        let toml_str = r#"
[[keymap.behaviors]]
id = 0
label = "KP"

[[keymap.behaviors]]
id = 3
label = "MO"

[[keymap.layer]]
bindings = [{ behavior = "MO", param1 = 1 }]
"#;
        let cfg: AppConfig = toml::from_str(toml_str).unwrap();
        let registry = cfg.keymap.registry().unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve_by_label("MO"), Some(BehaviorId(3)));
        assert_eq!(registry.resolve_by_label("KEY_PRESS"), None);
    }

    #[test]
    fn test_unknown_backend_is_a_parse_error() {
        let result: Result<AppConfig, _> = toml::from_str("[storage]\nbackend = \"sqlite\"\n");
        assert!(result.is_err());
    }

    // ── Validation ────────────────────────────────────────────────────────────

    #[test]
    fn test_unknown_default_label_is_rejected() {
        let mut keymap = KeymapConfig::default();
        keymap.layer[1].bindings[0].behavior = Some("HYPER".to_string());
        let registry = keymap.registry().unwrap();

        let result = keymap.default_bindings(&registry, keymap.dimensions().unwrap());

        assert!(matches!(
            result,
            Err(ConfigError::UnknownBehavior { layer: 1, key: 0, .. })
        ));
    }

    #[test]
    fn test_too_many_bindings_in_layer_is_rejected() {
        let mut keymap = KeymapConfig::default();
        keymap.keys_per_layer = 3;
        let registry = keymap.registry().unwrap();

        let result = keymap.default_bindings(&registry, keymap.dimensions().unwrap());

        assert!(matches!(result, Err(ConfigError::TooManyBindings { layer: 0, count: 4, max: 3 })));
    }

    #[test]
    fn test_too_many_layers_is_rejected() {
        let mut keymap = KeymapConfig::default();
        keymap.layers = 1;
        let registry = keymap.registry().unwrap();

        let result = keymap.default_bindings(&registry, keymap.dimensions().unwrap());

        assert!(matches!(result, Err(ConfigError::TooManyLayers { count: 2, layers: 1 })));
    }

    #[test]
    fn test_oversized_grid_is_rejected() {
        let keymap = KeymapConfig {
            layers: 64,
            keys_per_layer: 255,
            ..KeymapConfig::default()
        };
        assert!(matches!(keymap.dimensions(), Err(ConfigError::Dimensions { .. })));
    }

    #[test]
    fn test_zero_layers_is_rejected() {
        let keymap = KeymapConfig {
            layers: 0,
            ..KeymapConfig::default()
        };
        assert!(matches!(keymap.dimensions(), Err(ConfigError::Dimensions { .. })));
    }

    // ── File loading ──────────────────────────────────────────────────────────

    #[test]
    fn test_load_config_from_missing_file_returns_default() {
        let path = PathBuf::from("/nonexistent/path/that/cannot/exist/config.toml");
        assert_eq!(load_config_from(&path).unwrap(), AppConfig::default());
    }

    #[test]
    fn test_render_and_load_round_trip_via_temp_dir() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("keymapd_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let mut cfg = AppConfig::default();
        cfg.daemon.log_level = "debug".to_string();
        cfg.storage.path = Some(dir.join("records"));

        // Act
        std::fs::write(&path, render_config(&cfg).unwrap()).unwrap();
        let loaded = load_config_from(&path).unwrap();

        // Assert
        assert_eq!(loaded, cfg);

        // Cleanup
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = std::env::temp_dir().join(format!("keymapd_test_{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[[[ not valid toml").unwrap();

        assert!(matches!(load_config_from(&path), Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_default_data_dir_sits_next_to_config() {
        let path = PathBuf::from("/etc/keymapd/config.toml");
        assert_eq!(default_data_dir(&path), PathBuf::from("/etc/keymapd/data"));
    }

    #[test]
    fn test_config_file_path_ends_with_config_toml() {
        if let Ok(path) = config_file_path() {
            assert!(
                path.ends_with("config.toml"),
                "config file must be named config.toml, got {path:?}"
            );
        }
    }
}
