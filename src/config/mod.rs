//! # Migration Configuration
//!
//! Settings are layered: built-in defaults → YAML file → CLI flags.
//!
//! ## Configuration File
//!
//! `migrate.yaml` in the working directory is picked up automatically; use
//! `--config` to point elsewhere. Every field is optional.
//!
//! ```yaml
//! batch_size: 25
//! max_retries: 3
//! backoff_base_ms: 250
//! bounding_region: { min_lon: 102.0, max_lon: 110.0, min_lat: 8.0, max_lat: 24.0 }
//! health_check_url: http://target-store:8080/health
//! ```

mod migration;

pub use migration::MigrationSettings;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Default config file name looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "migrate.yaml";

/// CLI-level overrides applied on top of the file
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub batch_size: Option<usize>,
    pub max_retries: Option<u32>,
    pub backoff_base: Option<Duration>,
    pub checkpoint_interval: Option<usize>,
    pub abort_threshold: Option<f64>,
    pub health_check_url: Option<String>,
    pub export_dir: Option<PathBuf>,
}

impl SettingsOverrides {
    pub fn apply(self, mut settings: MigrationSettings) -> MigrationSettings {
        if let Some(v) = self.batch_size {
            settings.batch_size = v;
        }
        if let Some(v) = self.max_retries {
            settings.max_retries = v;
        }
        if let Some(v) = self.backoff_base {
            settings.backoff_base_ms = u64::try_from(v.as_millis()).unwrap_or(u64::MAX);
        }
        if let Some(v) = self.checkpoint_interval {
            settings.checkpoint_interval = v;
        }
        if let Some(v) = self.abort_threshold {
            settings.abort_threshold = v;
        }
        if let Some(v) = self.health_check_url {
            settings.health_check_url = Some(v);
        }
        if let Some(v) = self.export_dir {
            settings.export_dir = v;
        }
        settings
    }
}

/// Parse settings from a YAML file
pub fn load_settings_file(path: &Path) -> Result<MigrationSettings> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let settings: MigrationSettings =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
            message: format!("{}: {}", path.display(), e),
        })?;
    Ok(settings)
}

/// Resolve settings: explicit file, else `migrate.yaml` if present, else defaults
pub fn load_settings(
    explicit: Option<&Path>,
    overrides: SettingsOverrides,
) -> Result<MigrationSettings> {
    let base = match explicit {
        Some(path) => load_settings_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                load_settings_file(default_path)?
            } else {
                MigrationSettings::default()
            }
        }
    };

    let settings = overrides.apply(base);
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.yaml");
        std::fs::write(&path, "batch_size: 20\nmax_retries: 1\n").unwrap();

        let overrides = SettingsOverrides {
            batch_size: Some(7),
            backoff_base: Some(Duration::from_millis(1500)),
            ..Default::default()
        };
        let settings = load_settings(Some(&path), overrides).unwrap();
        assert_eq!(settings.batch_size, 7);
        assert_eq!(settings.max_retries, 1);
        assert_eq!(settings.backoff_base_ms, 1500);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_settings(
            Some(Path::new("/definitely/not/here.yaml")),
            SettingsOverrides::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.yaml");
        std::fs::write(&path, "{}").unwrap();

        let overrides = SettingsOverrides {
            abort_threshold: Some(-0.5),
            ..Default::default()
        };
        assert!(load_settings(Some(&path), overrides).is_err());
    }

    #[test]
    fn test_malformed_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migrate.yaml");
        std::fs::write(&path, "batch_size: [not, a, number]").unwrap();
        let err = load_settings_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
