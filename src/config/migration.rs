//! Migration engine settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::{BackoffPolicy, BoundingRegion, ThrottlePolicy};
use crate::error::ConfigError;

/// Engine settings, all defaultable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSettings {
    /// Records per batch (also the bound on in-flight writes)
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Retries after the first attempt before a batch is failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff base in milliseconds (delay = base * 2^attempt)
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Committed batches between checkpoints
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Invalid-record fraction above which the run aborts
    #[serde(default = "default_abort_threshold")]
    pub abort_threshold: f64,

    #[serde(default)]
    pub bounding_region: BoundingRegion,

    /// Upper bound for `attributes.area`
    #[serde(default = "default_max_area")]
    pub max_area: f64,

    /// Timeout for every store call and connectivity check
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Inter-batch pause per record written, in milliseconds
    #[serde(default = "default_throttle_per_record_ms")]
    pub throttle_per_record_ms: u64,

    /// Parent records compared structurally after migration
    #[serde(default = "default_verify_sample_size")]
    pub verify_sample_size: usize,

    /// Target store health endpoint; no probe when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_url: Option<String>,

    /// Where human-downloadable snapshot exports are written
    #[serde(default = "default_export_dir")]
    pub export_dir: PathBuf,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            checkpoint_interval: default_checkpoint_interval(),
            abort_threshold: default_abort_threshold(),
            bounding_region: BoundingRegion::default(),
            max_area: default_max_area(),
            operation_timeout_secs: default_operation_timeout_secs(),
            throttle_per_record_ms: default_throttle_per_record_ms(),
            verify_sample_size: default_verify_sample_size(),
            health_check_url: None,
            export_dir: default_export_dir(),
        }
    }
}

impl MigrationSettings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", self.batch_size));
        }
        if self.checkpoint_interval == 0 {
            return Err(invalid("checkpoint_interval", self.checkpoint_interval));
        }
        if !(0.0..=1.0).contains(&self.abort_threshold) {
            return Err(invalid("abort_threshold", self.abort_threshold));
        }
        if self.max_area.is_nan() || self.max_area < 0.0 {
            return Err(invalid("max_area", self.max_area));
        }
        if self.operation_timeout_secs == 0 {
            return Err(invalid("operation_timeout_secs", self.operation_timeout_secs));
        }
        let region = &self.bounding_region;
        if region.min_lon > region.max_lon || region.min_lat > region.max_lat {
            return Err(invalid(
                "bounding_region",
                format!(
                    "[{}, {}] x [{}, {}]",
                    region.min_lon, region.max_lon, region.min_lat, region.max_lat
                ),
            ));
        }
        Ok(())
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }

    pub fn throttle(&self) -> ThrottlePolicy {
        ThrottlePolicy::new(Duration::from_millis(self.throttle_per_record_ms))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn invalid(field: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
}

fn default_batch_size() -> usize {
    50
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_checkpoint_interval() -> usize {
    10
}

fn default_abort_threshold() -> f64 {
    0.10
}

fn default_max_area() -> f64 {
    1_000_000_000.0
}

fn default_operation_timeout_secs() -> u64 {
    30
}

fn default_throttle_per_record_ms() -> u64 {
    2
}

fn default_verify_sample_size() -> usize {
    5
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = MigrationSettings::default();
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.max_retries, 5);
        assert_eq!(settings.checkpoint_interval, 10);
        assert!((settings.abort_threshold - 0.10).abs() < f64::EPSILON);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
batch_size: 5
max_retries: 2
bounding_region:
  min_lon: 100.0
  max_lon: 110.0
  min_lat: 10.0
  max_lat: 25.0
"#;
        let settings: MigrationSettings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.max_retries, 2);
        assert_eq!(settings.checkpoint_interval, 10);
        assert_eq!(settings.bounding_region.min_lon, 100.0);
        assert_eq!(settings.verify_sample_size, 5);
        assert!(settings.health_check_url.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_batch = MigrationSettings {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_batch.validate(),
            Err(ConfigError::InvalidValue { field, .. }) if field == "batch_size"
        ));

        let bad_threshold = MigrationSettings {
            abort_threshold: 1.5,
            ..Default::default()
        };
        assert!(bad_threshold.validate().is_err());

        let inverted = MigrationSettings {
            bounding_region: BoundingRegion {
                min_lon: 10.0,
                max_lon: -10.0,
                min_lat: 0.0,
                max_lat: 1.0,
            },
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_policies_from_settings() {
        let settings = MigrationSettings {
            backoff_base_ms: 100,
            throttle_per_record_ms: 3,
            ..Default::default()
        };
        assert_eq!(settings.backoff().delay(2), Duration::from_millis(400));
        assert_eq!(settings.throttle().delay_after(10), Duration::from_millis(30));
    }
}
