//! Editor configuration.
//!
//! Handles loading, validating, and merging `portrait-kit.toml`. Stock
//! defaults are overridden by whatever keys the user file sets.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [output]
//! max_dimension = 512          # Longest side of every stored raster (always square)
//! quality = 90                 # JPEG quality (1-100)
//! background = [255, 255, 255] # Fill for fit regions that extend past the photo
//!
//! [similarity]
//! threshold = 4                # Max Hamming distance for "same picture"
//! grid = 32                    # Luma grid side the raster is reduced to
//! blocks = 8                   # Blocks per side; fingerprint has blocks² bits
//!
//! [store]
//! max_item_bytes = 8388608     # Largest single payload (8 MiB)
//! quota_bytes = 268435456      # Total store budget (256 MiB)
//! ```
//!
//! ## Partial Configuration
//!
//! Config files are sparse: override just the values you want:
//!
//! ```toml
//! [similarity]
//! threshold = 6
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Default config file name looked up next to the store.
pub const CONFIG_FILENAME: &str = "portrait-kit.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Editor configuration loaded from `portrait-kit.toml`.
///
/// All fields have sensible defaults. User config files need only specify
/// the values they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EditorConfig {
    /// Raster encoding settings for everything the transform engine emits.
    pub output: OutputConfig,
    /// Perceptual fingerprint and near-duplicate settings.
    pub similarity: SimilarityConfig,
    /// Admission limits of the bundled stores.
    pub store: StoreConfig,
}

impl EditorConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output.max_dimension < 16 {
            return Err(ConfigError::Validation(
                "output.max_dimension must be at least 16".into(),
            ));
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        let sim = &self.similarity;
        if sim.blocks < 2 {
            return Err(ConfigError::Validation(
                "similarity.blocks must be at least 2".into(),
            ));
        }
        if sim.grid < sim.blocks || sim.grid % sim.blocks != 0 {
            return Err(ConfigError::Validation(
                "similarity.grid must be a multiple of similarity.blocks".into(),
            ));
        }
        if sim.threshold >= sim.blocks * sim.blocks {
            return Err(ConfigError::Validation(
                "similarity.threshold must be smaller than the fingerprint length".into(),
            ));
        }
        if self.store.max_item_bytes > self.store.quota_bytes {
            return Err(ConfigError::Validation(
                "store.max_item_bytes must not exceed store.quota_bytes".into(),
            ));
        }
        Ok(())
    }
}

/// Raster output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// Side length cap of the square output raster, in pixels.
    pub max_dimension: u32,
    /// JPEG quality (1 = worst, 100 = best).
    pub quality: u32,
    /// RGB fill for fit regions that reach past the source.
    pub background: [u8; 3],
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_dimension: 512,
            quality: 90,
            background: [255, 255, 255],
        }
    }
}

/// Perceptual fingerprint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimilarityConfig {
    /// Maximum Hamming distance at which two fingerprints count as the same
    /// picture. A tuning knob, not a perceptual law.
    pub threshold: u32,
    /// Side of the luma grid the raster is reduced to.
    pub grid: u32,
    /// Blocks per side; the fingerprint is `blocks²` bits.
    pub blocks: u32,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            threshold: 4,
            grid: 32,
            blocks: 8,
        }
    }
}

/// Store admission limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Largest single payload accepted by `put`.
    pub max_item_bytes: usize,
    /// Total bytes the store may hold.
    pub quota_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_item_bytes: 8 * 1024 * 1024,
            quota_bytes: 256 * 1024 * 1024,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(EditorConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Merge an optional overlay onto the stock defaults, then deserialize and validate.
pub fn resolve_config(overlay: Option<toml::Value>) -> Result<EditorConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EditorConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from a TOML file.
///
/// A missing file yields the stock defaults; a present file is merged on top
/// of them, with unknown keys rejected and the result validated.
pub fn load_config(path: &Path) -> Result<EditorConfig, ConfigError> {
    if !path.exists() {
        return resolve_config(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    resolve_config(Some(value))
}

/// Returns a fully-commented stock `portrait-kit.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# portrait-kit configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Output rasters
# ---------------------------------------------------------------------------
[output]
# Every stored raster is square; this caps its side in pixels.
max_dimension = 512

# JPEG quality (1 = worst, 100 = best).
quality = 90

# Fill color for fit regions that reach past the edge of the photo.
background = [255, 255, 255]

# ---------------------------------------------------------------------------
# Similarity (average-hash fingerprint)
# ---------------------------------------------------------------------------
[similarity]
# Two photos whose fingerprints differ in at most this many bits are treated
# as the same picture.
threshold = 4

# The raster is reduced to a grid x grid luma image...
grid = 32

# ...then split into blocks x blocks cells, one fingerprint bit per cell.
blocks = 8

# ---------------------------------------------------------------------------
# Store limits
# ---------------------------------------------------------------------------
[store]
# Largest single payload (bytes).
max_item_bytes = 8388608

# Total store budget (bytes).
quota_bytes = 268435456
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = EditorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.output.max_dimension, 512);
        assert_eq!(config.similarity.threshold, 4);
        assert_eq!(config.similarity.blocks, 8);
    }

    #[test]
    fn stock_toml_parses_to_defaults() {
        let value: toml::Value = toml::from_str(stock_config_toml()).unwrap();
        let config = resolve_config(Some(value)).unwrap();
        assert_eq!(config, EditorConfig::default());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config, EditorConfig::default());
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "[similarity]\nthreshold = 6\n").unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.similarity.threshold, 6);
        assert_eq!(config.similarity.grid, 32);
        assert_eq!(config.output, OutputConfig::default());
    }

    #[test]
    fn unknown_key_rejected() {
        let value: toml::Value = toml::from_str("[output]\nmax_dim = 100\n").unwrap();
        assert!(matches!(
            resolve_config(Some(value)),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn merge_toml_overrides_nested_keys() {
        let base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"]["x"].as_integer(), Some(1));
        assert_eq!(merged["a"]["y"].as_integer(), Some(3));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = EditorConfig::default();
        config.output.quality = 0;
        assert!(config.validate().is_err());

        let mut config = EditorConfig::default();
        config.output.max_dimension = 8;
        assert!(config.validate().is_err());

        let mut config = EditorConfig::default();
        config.similarity.grid = 30;
        assert!(config.validate().is_err());

        let mut config = EditorConfig::default();
        config.similarity.threshold = 64;
        assert!(config.validate().is_err());

        let mut config = EditorConfig::default();
        config.store.max_item_bytes = config.store.quota_bytes + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_toml_reports_parse_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILENAME);
        fs::write(&path, "[output\n").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }
}
