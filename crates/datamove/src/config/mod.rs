//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_properties;

use crate::error::Result;
use std::path::Path;

impl EngineConfig {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Render the configuration back to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LogicalType;
    use crate::error::TransferError;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_from_yaml_rejects_unrepresentable_timeout() {
        let err = EngineConfig::from_yaml("properties:\n  timeout_secs: 1e20\n  workers: 2\n")
            .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
dependency_resolution: true
properties:
  workers: 4
  fetch_size: 500
  timeout_secs: 60
  sample_interval_secs: 0.5
  target_policy: truncate_if_exists
  unsupported_types: [array, clob]
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.dependency_resolution);
        assert_eq!(config.properties.get_workers(), 4);
        assert_eq!(config.properties.get_queue_capacity(), 4_000);
        assert_eq!(config.properties.get_timeout(), Duration::from_secs(60));
        assert_eq!(
            config.properties.get_sample_interval(),
            Duration::from_millis(500)
        );
        assert_eq!(
            config.properties.get_target_policy(),
            TargetPolicy::TruncateIfExists
        );
        assert_eq!(
            config.properties.get_unsupported_types(),
            &[LogicalType::Array, LogicalType::Clob]
        );
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = "properties:\n  batch_size: 0\n";
        assert!(EngineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = EngineConfig::from_yaml("{}").unwrap();
        assert!(!config.dependency_resolution);
        assert_eq!(config.properties, TransferProperties::default());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "properties:\n  workers: 2").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.properties.get_workers(), 2);
    }

    #[test]
    fn test_yaml_round_trip_keeps_unset_fields_unset() {
        let config = EngineConfig::from_yaml("properties:\n  workers: 3\n").unwrap();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("workers: 3"));
        assert!(!yaml.contains("fetch_size"));
    }
}
